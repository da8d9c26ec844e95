//! An in-memory [`Broker`] that can drop connections and channels on demand.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::{
    Acknowledge,
    Broker,
    BrokerChannel,
    BrokerConnection,
    BrokerError,
    CloseError,
    CloseNotifier,
    Delivery,
    DeliveryStream,
};

#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    failing_connects: usize,
    failing_channels: usize,
    connects: usize,
    channel_attempts: usize,
    next_channel: u64,
    next_tag: u64,
    connection: Option<CloseNotifier>,
    channels: HashMap<u64, CloseNotifier>,
    declared: HashSet<String>,
    consumers: HashMap<String, MockConsumer>,
    pending: HashMap<String, VecDeque<(u64, Vec<u8>)>>,
    acks: Vec<(u64, bool)>,
    closed_channels: usize,
    closed_connections: usize,
    declare_gate: Option<Arc<Semaphore>>,
}

struct MockConsumer {
    channel: u64,
    tag: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl MockBroker {
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().failing_connects = n;
    }

    /// Hold every queue declaration until a permit is added to the returned semaphore.
    pub fn hold_declares(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state.lock().declare_gate = Some(gate.clone());
        gate
    }

    pub fn fail_next_channels(&self, n: usize) {
        self.state.lock().failing_channels = n;
    }

    /// Publish to a queue and return the delivery tag. Messages for a queue nobody consumes
    /// are held until a consumer shows up.
    pub fn publish(&self, queue: &str, payload: Vec<u8>) -> u64 {
        let mut state = self.state.lock();
        state.next_tag += 1;
        let tag = state.next_tag;
        let delivered = match state.consumers.get(queue) {
            Some(consumer) => consumer
                .tx
                .send(Delivery::new(payload.clone(), self.acker(tag)))
                .is_ok(),
            None => false,
        };
        if !delivered {
            state
                .pending
                .entry(queue.to_string())
                .or_default()
                .push_back((tag, payload));
        }
        tag
    }

    /// Drop the connection as the server or network would.
    pub fn close_connection(&self, recover: bool) {
        let mut state = self.state.lock();
        if let Some(closed) = state.connection.take() {
            closed.close(CloseError::new("connection reset by peer", recover));
        }
        state.channels.clear();
        state.consumers.clear();
    }

    /// Close every open channel as the server would.
    pub fn close_channel(&self, recover: bool) {
        let mut state = self.state.lock();
        for (_, closed) in state.channels.drain() {
            closed.close(CloseError::new("channel closed by server", recover));
        }
        state.consumers.clear();
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn channel_attempts(&self) -> usize {
        self.state.lock().channel_attempts
    }

    pub fn declared_queues(&self) -> HashSet<String> {
        self.state.lock().declared.clone()
    }

    /// Consumer tags of the live consumers.
    pub fn consumer_tags(&self) -> HashSet<String> {
        self.state
            .lock()
            .consumers
            .values()
            .map(|c| c.tag.clone())
            .collect()
    }

    /// Acknowledged delivery tags, with their `multiple` flag.
    pub fn acks(&self) -> Vec<(u64, bool)> {
        self.state.lock().acks.clone()
    }

    pub fn closed_channels(&self) -> usize {
        self.state.lock().closed_channels
    }

    pub fn closed_connections(&self) -> usize {
        self.state.lock().closed_connections
    }

    fn acker(&self, tag: u64) -> MockAcker {
        MockAcker {
            broker: self.clone(),
            tag,
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    type Connection = MockConnection;

    async fn connect(&self, _address: &str) -> Result<MockConnection, BrokerError> {
        let mut state = self.state.lock();
        state.connects += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(BrokerError::Other("connection refused".into()));
        }
        let closed = CloseNotifier::default();
        state.connection = Some(closed.clone());
        Ok(MockConnection {
            broker: self.clone(),
            closed,
        })
    }
}

pub struct MockConnection {
    broker: MockBroker,
    closed: CloseNotifier,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    type Channel = MockChannel;

    async fn create_channel(&self) -> Result<MockChannel, BrokerError> {
        let mut state = self.broker.state.lock();
        state.channel_attempts += 1;
        if self.closed.is_closed() {
            return Err(BrokerError::Other("connection is closed".into()));
        }
        if state.failing_channels > 0 {
            state.failing_channels -= 1;
            return Err(BrokerError::Other("channel limit reached".into()));
        }
        state.next_channel += 1;
        let id = state.next_channel;
        let closed = CloseNotifier::default();
        state.channels.insert(id, closed.clone());
        Ok(MockChannel {
            broker: self.broker.clone(),
            id,
            closed,
        })
    }

    fn notify_close(&self) -> oneshot::Receiver<CloseError> {
        self.closed.subscribe()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.broker.state.lock();
        state.closed_connections += 1;
        state.connection = None;
        state.channels.clear();
        state.consumers.clear();
        Ok(())
    }
}

pub struct MockChannel {
    broker: MockBroker,
    id: u64,
    closed: CloseNotifier,
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let gate = self.broker.state.lock().declare_gate.clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
        self.broker.state.lock().declared.insert(queue.to_string());
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.broker.state.lock();
        if !state.declared.contains(queue) {
            return Err(BrokerError::Other(format!("no queue '{queue}'")));
        }
        for (tag, payload) in state.pending.remove(queue).unwrap_or_default() {
            let _ = tx.send(Delivery::new(payload, self.broker.acker(tag)));
        }
        state.consumers.insert(
            queue.to_string(),
            MockConsumer {
                channel: self.id,
                tag: consumer_tag.to_string(),
                tx,
            },
        );

        let deliveries = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(deliveries.boxed())
    }

    fn notify_close(&self) -> oneshot::Receiver<CloseError> {
        self.closed.subscribe()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.broker.state.lock();
        state.closed_channels += 1;
        state.channels.remove(&self.id);
        state.consumers.retain(|_, c| c.channel != self.id);
        Ok(())
    }
}

struct MockAcker {
    broker: MockBroker,
    tag: u64,
}

#[async_trait]
impl Acknowledge for MockAcker {
    async fn ack(&self, multiple: bool) -> Result<(), BrokerError> {
        self.broker.state.lock().acks.push((self.tag, multiple));
        Ok(())
    }
}
