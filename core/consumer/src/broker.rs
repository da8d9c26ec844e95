use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::BrokerError;

/// A stream of deliveries from one queue. It ends when the consumer or its channel goes away.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Dials broker connections.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Connection: BrokerConnection;

    async fn connect(&self, address: &str) -> Result<Self::Connection, BrokerError>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    async fn create_channel(&self) -> Result<Self::Channel, BrokerError>;

    /// Resolves once, when the connection is closed by anything but [`Self::close`].
    fn notify_close(&self) -> oneshot::Receiver<CloseError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Declare a durable queue that is neither exclusive nor deleted when unused.
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Start consuming `queue` with manual acknowledgement.
    async fn consume(&self, queue: &str, consumer_tag: &str)
    -> Result<DeliveryStream, BrokerError>;

    /// Resolves once, when the channel is closed by anything but [`Self::close`].
    fn notify_close(&self) -> oneshot::Receiver<CloseError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self, multiple: bool) -> Result<(), BrokerError>;
}

pub struct Delivery {
    pub data: Vec<u8>,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(data: Vec<u8>, acker: impl Acknowledge + 'static) -> Self {
        Self {
            data,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(&self, multiple: bool) -> Result<(), BrokerError> {
        self.acker.ack(multiple).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.data.len())
            .finish()
    }
}

/// Why a connection or channel went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseError {
    pub reason: String,
    /// Whether the same peer can be expected to accept us again right away.
    pub recover: bool,
}

impl CloseError {
    pub fn new(reason: impl Into<String>, recover: bool) -> Self {
        Self {
            reason: reason.into(),
            recover,
        }
    }

    /// Used when the notifier itself disappeared.
    pub(crate) fn dropped() -> Self {
        Self::new("close notifier dropped", true)
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (recover: {})", self.reason, self.recover)
    }
}

/// Fans a single close event out to every registered waiter, including late ones.
#[derive(Clone, Default)]
pub struct CloseNotifier {
    inner: Arc<Mutex<CloseState>>,
}

#[derive(Default)]
struct CloseState {
    closed: Option<CloseError>,
    waiters: Vec<oneshot::Sender<CloseError>>,
}

impl CloseNotifier {
    pub fn subscribe(&self) -> oneshot::Receiver<CloseError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.lock();
        match &state.closed {
            Some(err) => {
                let _ = tx.send(err.clone());
            },
            None => state.waiters.push(tx),
        }
        rx
    }

    /// Only the first close is reported.
    pub fn close(&self, err: CloseError) {
        let mut state = self.inner.lock();
        if state.closed.is_some() {
            return;
        }
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(err.clone());
        }
        state.closed = Some(err);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }
}
