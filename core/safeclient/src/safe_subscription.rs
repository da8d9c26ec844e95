use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::{SubscriptionError, SubscriptionHandle};

/// A subscription handle that stays valid while the transport subscription underneath it gets
/// replaced.
///
/// The only error a [`SafeSubscription`] ever yields is [`SubscriptionError::Unsubscribed`],
/// exactly once, after [`SafeSubscription::unsubscribe`] was called (by the owner, or by the
/// client on cancellation). Every following call to [`SafeSubscription::err`] returns `None`.
#[derive(Clone)]
pub struct SafeSubscription {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    errors: tokio::sync::Mutex<mpsc::Receiver<SubscriptionError>>,
    done: CancellationToken,
}

struct State {
    underlying: SubscriptionHandle,
    /// Taken on unsubscribe.
    errors: Option<mpsc::Sender<SubscriptionError>>,
}

impl SafeSubscription {
    pub fn new(underlying: SubscriptionHandle) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    underlying,
                    errors: Some(tx),
                }),
                errors: tokio::sync::Mutex::new(rx),
                done: CancellationToken::new(),
            }),
        }
    }

    pub async fn err(&self) -> Option<SubscriptionError> {
        self.inner.errors.lock().await.recv().await
    }

    /// Release the current underlying subscription and end this one. Calling this more than
    /// once has no further effect.
    pub fn unsubscribe(&self) {
        let mut state = self.inner.state.lock();
        let Some(errors) = state.errors.take() else {
            return;
        };
        state.underlying.unsubscribe();
        // Capacity is one and this is the only send.
        let _ = errors.try_send(SubscriptionError::Unsubscribed);
        drop(state);
        self.inner.done.cancel();
    }

    /// Swap in a fresh underlying subscription, releasing the previous one. If this
    /// subscription already ended the new one is released right away.
    pub fn set_underlying(&self, underlying: SubscriptionHandle) {
        let mut state = self.inner.state.lock();
        if state.errors.is_none() {
            underlying.unsubscribe();
            return;
        }
        let previous = std::mem::replace(&mut state.underlying, underlying);
        previous.unsubscribe();
    }

    pub fn unsubscribed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.done.cancelled()
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.inner.done.is_cancelled()
    }
}
