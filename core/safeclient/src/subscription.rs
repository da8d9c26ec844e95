use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::SubscriptionError;

/// A live transport subscription, as handed out by an [`EthClient`](crate::EthClient).
///
/// Items flow through the channel the caller passed when subscribing. This handle carries the
/// other half of the contract: a channel that yields at most one terminal error, and a way to
/// release the subscription on the remote end.
pub struct Subscription {
    errors: mpsc::Receiver<SubscriptionError>,
    handle: SubscriptionHandle,
}

/// The cancellation half of a [`Subscription`]. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionHandle {
    token: CancellationToken,
}

/// Held by whoever drives a subscription. Dropping the sink without failing it is observed by
/// the subscriber as [`SubscriptionError::Closed`].
pub struct SubscriptionSink {
    errors: mpsc::Sender<SubscriptionError>,
    token: CancellationToken,
}

impl Subscription {
    pub fn new() -> (Self, SubscriptionSink) {
        let (tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let sink = SubscriptionSink {
            errors: tx,
            token: token.clone(),
        };
        let sub = Self {
            errors: rx,
            handle: SubscriptionHandle { token },
        };
        (sub, sink)
    }

    /// Wait for the subscription to fail. Returns `None` once the error has been taken.
    pub async fn err(&mut self) -> Option<SubscriptionError> {
        self.errors.recv().await
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn into_parts(self) -> (mpsc::Receiver<SubscriptionError>, SubscriptionHandle) {
        (self.errors, self.handle)
    }
}

impl SubscriptionHandle {
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl SubscriptionSink {
    /// Resolves once the subscriber released the subscription.
    pub fn unsubscribed(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Report the terminal error. Only the first one is kept.
    pub fn fail(&self, err: SubscriptionError) {
        let _ = self.errors.try_send(err);
    }
}
