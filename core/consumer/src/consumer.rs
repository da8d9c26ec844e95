use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sffl_types::{consumer_tag, queue_name, BlockData, RollupId};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    Broker,
    BrokerChannel,
    BrokerConnection,
    CloseError,
    ConsumerConfig,
    ConsumerError,
    QueuesListener,
};

/// Capacity of the channel of received blocks.
const BLOCKS_BUFFER: usize = 128;

type ConnectionOf<B> = <B as Broker>::Connection;
type ChannelOf<B> = <ConnectionOf<B> as BrokerConnection>::Channel;

/// Keeps one consumer per rollup queue alive on the broker and decodes what they receive.
///
/// The consumer is ready once it holds an open connection and channel with every queue bound.
/// Whenever the connection or channel is lost it goes back to not ready and rebuilds what was
/// lost in the background, until [`Consumer::close`] is called.
pub struct Consumer<B: Broker> {
    shared: Arc<Shared<B>>,
    blocks: Mutex<Option<mpsc::Receiver<BlockData>>>,
}

struct Shared<B: Broker> {
    broker: B,
    address: String,
    rollup_ids: Vec<RollupId>,
    config: ConsumerConfig,
    token: CancellationToken,
    state: Mutex<State<B>>,
    blocks: mpsc::Sender<BlockData>,
    active_listeners: Arc<AtomicUsize>,
}

struct State<B: Broker> {
    ready: bool,
    connection: Option<Arc<ConnectionOf<B>>>,
    channel: Option<Arc<ChannelOf<B>>>,
    /// Stops the listening tasks of the current channel.
    listeners: Option<CancellationToken>,
}

enum ChannelReset {
    Ready(oneshot::Receiver<CloseError>),
    Reconnect { delay: bool },
    Done,
}

impl<B: Broker> Consumer<B> {
    /// Creates the consumer and starts connecting right away. Must be called within a tokio
    /// runtime.
    pub fn new(
        broker: B,
        address: impl Into<String>,
        rollup_ids: impl IntoIterator<Item = RollupId>,
        config: ConsumerConfig,
    ) -> Self {
        let mut ids = Vec::new();
        for rollup_id in rollup_ids {
            if !ids.contains(&rollup_id) {
                ids.push(rollup_id);
            }
        }

        let (tx, rx) = mpsc::channel(BLOCKS_BUFFER);
        let shared = Arc::new(Shared {
            broker,
            address: address.into(),
            rollup_ids: ids,
            config,
            token: CancellationToken::new(),
            state: Mutex::new(State {
                ready: false,
                connection: None,
                channel: None,
                listeners: None,
            }),
            blocks: tx,
            active_listeners: Arc::new(AtomicUsize::new(0)),
        });

        tokio::spawn(shared.clone().run());

        Self {
            shared,
            blocks: Mutex::new(Some(rx)),
        }
    }

    /// The decoded blocks of every queue. Can only be taken once.
    pub fn take_block_stream(&self) -> Option<mpsc::Receiver<BlockData>> {
        self.blocks.lock().take()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().ready
    }

    /// Number of queue listening tasks currently alive.
    pub fn active_listeners(&self) -> usize {
        self.shared.active_listeners.load(Ordering::SeqCst)
    }

    /// Stop consuming and release the channel and connection. Only a ready consumer can be
    /// closed, so this fails with [`ConsumerError::AlreadyClosed`] on every call after the first.
    pub async fn close(&self) -> Result<(), ConsumerError> {
        let (channel, connection) = {
            let mut state = self.shared.state.lock();
            if !state.ready {
                return Err(ConsumerError::AlreadyClosed);
            }
            state.ready = false;
            self.shared.token.cancel();
            if let Some(listeners) = state.listeners.take() {
                listeners.cancel();
            }
            (state.channel.take(), state.connection.take())
        };

        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!("failed to close broker channel: {e}");
            }
        }
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!("failed to close broker connection: {e}");
            }
        }

        info!("consumer closed");
        Ok(())
    }
}

impl<B: Broker> Drop for Consumer<B> {
    fn drop(&mut self) {
        self.shared.token.cancel();
    }
}

impl<B: Broker> Shared<B> {
    async fn run(self: Arc<Self>) {
        'reconnect: loop {
            self.mark_not_ready();

            let connection = tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                res = self.broker.connect(&self.address) => res,
            };
            let connection = match connection {
                Ok(connection) => Arc::new(connection),
                Err(e) => {
                    warn!("failed to connect to broker at {}: {e}", self.address);
                    if !self.wait(self.config.reconnect_delay).await {
                        return;
                    }
                    continue;
                },
            };
            info!("connected to broker at {}", self.address);
            self.state.lock().connection = Some(connection.clone());

            let mut connection_closed = connection.notify_close();
            let mut channel_closed = match self.reset_channel(&connection, &mut connection_closed).await {
                ChannelReset::Ready(closed) => closed,
                ChannelReset::Reconnect { delay } => {
                    self.release_connection(&connection).await;
                    if delay && !self.wait(self.config.reconnect_delay).await {
                        return;
                    }
                    continue;
                },
                ChannelReset::Done => return,
            };

            loop {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return,
                    err = &mut connection_closed => {
                        let err = err.unwrap_or_else(|_| CloseError::dropped());
                        self.mark_not_ready();
                        if err.recover {
                            warn!("broker connection closed, reconnecting: {err}");
                        } else {
                            error!("broker connection closed: {err}");
                            if !self.wait(self.config.reconnect_delay).await {
                                return;
                            }
                        }
                        continue 'reconnect;
                    },
                    err = &mut channel_closed => {
                        let err = err.unwrap_or_else(|_| CloseError::dropped());
                        if !err.recover {
                            error!("broker channel closed, reconnecting: {err}");
                            self.mark_not_ready();
                            self.release_connection(&connection).await;
                            if !self.wait(self.config.reconnect_delay).await {
                                return;
                            }
                            continue 'reconnect;
                        }

                        warn!("broker channel closed, reopening: {err}");
                        match self.reset_channel(&connection, &mut connection_closed).await {
                            ChannelReset::Ready(closed) => channel_closed = closed,
                            ChannelReset::Reconnect { delay } => {
                                self.release_connection(&connection).await;
                                if delay && !self.wait(self.config.reconnect_delay).await {
                                    return;
                                }
                                continue 'reconnect;
                            },
                            ChannelReset::Done => return,
                        }
                    },
                }
            }
        }
    }

    /// Open a channel and bind every queue on it, retrying until it works or the connection
    /// is lost.
    async fn reset_channel(
        &self,
        connection: &Arc<ConnectionOf<B>>,
        connection_closed: &mut oneshot::Receiver<CloseError>,
    ) -> ChannelReset {
        loop {
            self.mark_not_ready();

            match self.setup_channel(connection).await {
                Ok(channel_closed) => return ChannelReset::Ready(channel_closed),
                Err(e) => warn!("failed to set up broker channel: {e}"),
            }

            tokio::select! {
                biased;
                _ = self.token.cancelled() => return ChannelReset::Done,
                err = &mut *connection_closed => {
                    let err = err.unwrap_or_else(|_| CloseError::dropped());
                    if err.recover {
                        warn!("broker connection closed during channel setup: {err}");
                    } else {
                        error!("broker connection closed during channel setup: {err}");
                    }
                    return ChannelReset::Reconnect { delay: !err.recover };
                },
                _ = tokio::time::sleep(self.config.rechannel_delay) => {},
            }
        }
    }

    async fn setup_channel(
        &self,
        connection: &Arc<ConnectionOf<B>>,
    ) -> Result<oneshot::Receiver<CloseError>, ConsumerError> {
        let channel = Arc::new(connection.create_channel().await?);
        let channel_closed = channel.notify_close();
        let listeners = self.token.child_token();

        if let Err(e) = self.bind_queues(&channel, &listeners).await {
            listeners.cancel();
            if let Err(e) = channel.close().await {
                debug!("failed to close broker channel: {e}");
            }
            return Err(e);
        }

        let ready = {
            let mut state = self.state.lock();
            let ready = !self.token.is_cancelled();
            if ready {
                state.ready = true;
                state.channel = Some(channel.clone());
                state.listeners = Some(listeners.clone());
            }
            ready
        };
        if !ready {
            listeners.cancel();
            if let Err(e) = channel.close().await {
                debug!("failed to close broker channel: {e}");
            }
            return Err(ConsumerError::AlreadyClosed);
        }
        info!("consuming {} rollup queues", self.rollup_ids.len());

        Ok(channel_closed)
    }

    /// Forget the connection and close it so it is not left open across a reconnect.
    async fn release_connection(&self, connection: &Arc<ConnectionOf<B>>) {
        self.state.lock().connection = None;
        if let Err(e) = connection.close().await {
            debug!("failed to close broker connection: {e}");
        }
    }

    async fn bind_queues(
        &self,
        channel: &ChannelOf<B>,
        token: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        let listener = QueuesListener::new(self.blocks.clone(), self.active_listeners.clone());
        for &rollup_id in &self.rollup_ids {
            let queue = queue_name(rollup_id);
            channel.declare_queue(&queue).await?;
            let deliveries = channel.consume(&queue, &consumer_tag(rollup_id)).await?;
            listener.add(rollup_id, deliveries, token.clone())?;
        }
        Ok(())
    }

    fn mark_not_ready(&self) {
        let mut state = self.state.lock();
        state.ready = false;
        state.channel = None;
        if let Some(listeners) = state.listeners.take() {
            listeners.cancel();
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
