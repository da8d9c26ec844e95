use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sffl_consumer::{Broker, Consumer, ConsumerError};
use sffl_notifier::{Notifier, SubscriberId};
use sffl_safeclient::{EthClient, Header, SafeClient, SafeSubscription};
use sffl_types::{
    BlockData,
    OperatorId,
    RollupHeader,
    RollupId,
    SignedStateRootUpdateMessage,
    StateRootUpdateMessage,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{AttestorConfig, AttestorError, BlsSigner, EventListener};

const HEADER_BUFFER: usize = 64;

/// Attests to the state roots of a set of rollups.
///
/// Every header observed over a rollup's RPC endpoint is held for a short while, waiting for
/// the message queue to confirm that the same block was posted to the data availability layer.
/// Whether or not that confirmation arrives, and whether or not it agrees, the header's state
/// root gets signed: the RPC endpoint is authoritative, the queue only feeds telemetry.
///
/// Signed updates of one rollup come out in nondecreasing height order.
pub struct Attestor<C: EthClient, B: Broker, S: BlsSigner> {
    shared: Arc<Shared<S>>,
    clients: HashMap<RollupId, Arc<SafeClient<C>>>,
    consumer: Consumer<B>,
    output: Mutex<Option<mpsc::Sender<SignedStateRootUpdateMessage>>>,
    signed_roots: Mutex<Option<mpsc::Receiver<SignedStateRootUpdateMessage>>>,
}

struct Shared<S> {
    notifier: Notifier,
    signer: S,
    listener: Arc<dyn EventListener>,
    config: AttestorConfig,
    token: CancellationToken,
    tasks: TaskTracker,
    /// The live header subscription of every rollup.
    subscriptions: Mutex<HashMap<RollupId, SafeSubscription>>,
}

impl<C: EthClient, B: Broker, S: BlsSigner> Attestor<C, B, S> {
    pub fn new(
        config: AttestorConfig,
        clients: HashMap<RollupId, SafeClient<C>>,
        consumer: Consumer<B>,
        signer: S,
        listener: Arc<dyn EventListener>,
    ) -> Self {
        // Whoever reads the signed updates sets the pace.
        let (tx, rx) = mpsc::channel(1);
        Self {
            shared: Arc::new(Shared {
                notifier: Notifier::new(),
                signer,
                listener,
                config,
                token: CancellationToken::new(),
                tasks: TaskTracker::new(),
                subscriptions: Mutex::new(HashMap::new()),
            }),
            clients: clients
                .into_iter()
                .map(|(rollup_id, client)| (rollup_id, Arc::new(client)))
                .collect(),
            consumer,
            output: Mutex::new(Some(tx)),
            signed_roots: Mutex::new(Some(rx)),
        }
    }

    pub fn operator_id(&self) -> OperatorId {
        self.shared.signer.operator_id()
    }

    pub fn consumer(&self) -> &Consumer<B> {
        &self.consumer
    }

    /// The signed state root updates. Can only be taken once. The channel closes once the
    /// attestor is closed.
    pub fn take_signed_roots(&self) -> Option<mpsc::Receiver<SignedStateRootUpdateMessage>> {
        self.signed_roots.lock().take()
    }

    /// Subscribe to the headers of every rollup and start attesting.
    pub async fn start(&self) -> Result<(), AttestorError> {
        let output = self
            .output
            .lock()
            .clone()
            .ok_or(AttestorError::AlreadyStarted)?;
        let blocks = self
            .consumer
            .take_block_stream()
            .ok_or(AttestorError::AlreadyStarted)?;

        let mut subscriptions = Vec::with_capacity(self.clients.len());
        for (&rollup_id, client) in &self.clients {
            let (tx, rx) = mpsc::channel(HEADER_BUFFER);
            match client
                .subscribe_new_head(self.shared.token.child_token(), tx)
                .await
            {
                Ok(sub) => subscriptions.push((rollup_id, client.clone(), rx, sub)),
                Err(source) => {
                    for (_, _, _, sub) in subscriptions {
                        sub.unsubscribe();
                    }
                    return Err(AttestorError::Subscribe { rollup_id, source });
                },
            }
        }

        self.shared
            .tasks
            .spawn(process_mq_blocks(self.shared.clone(), blocks));
        for (rollup_id, client, headers, sub) in subscriptions {
            self.shared
                .subscriptions
                .lock()
                .insert(rollup_id, sub.clone());
            self.shared.tasks.spawn(process_rollup_headers(
                self.shared.clone(),
                rollup_id,
                client,
                headers,
                sub,
                output.clone(),
            ));
        }

        info!(
            "attesting to {} rollups as operator {:?}",
            self.clients.len(),
            self.operator_id()
        );
        Ok(())
    }

    /// Whether headers of `rollup_id` are currently being received. Turns false for good once
    /// resubscribing to a rollup's headers was given up on.
    pub fn is_subscribed(&self, rollup_id: RollupId) -> bool {
        self.shared.subscriptions.lock().contains_key(&rollup_id)
    }

    /// End the header subscription of `rollup_id` as a dropped endpoint would.
    #[cfg(test)]
    pub(crate) fn end_subscription(&self, rollup_id: RollupId) {
        if let Some(sub) = self.shared.subscriptions.lock().get(&rollup_id) {
            sub.unsubscribe();
        }
    }

    /// Stop attesting. In-flight headers are abandoned.
    pub async fn close(&self) {
        match self.consumer.close().await {
            Ok(()) => {},
            Err(ConsumerError::AlreadyClosed) => debug!("consumer was already closed"),
            Err(e) => warn!("failed to close consumer: {e}"),
        }

        self.shared.token.cancel();
        self.shared.tasks.close();
        self.shared.tasks.wait().await;

        for client in self.clients.values() {
            client.close().await;
        }
        self.output.lock().take();
        info!("attestor closed");
    }
}

async fn process_mq_blocks<S: BlsSigner>(
    shared: Arc<Shared<S>>,
    mut blocks: mpsc::Receiver<BlockData>,
) {
    loop {
        let data = tokio::select! {
            biased;
            _ = shared.token.cancelled() => return,
            data = blocks.recv() => match data {
                Some(data) => data,
                None => return,
            },
        };

        shared.notify(&data);

        // A header may still show up for this block, subscribing after the first notification.
        let delayed = shared.clone();
        shared.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = delayed.token.cancelled() => {},
                _ = tokio::time::sleep(delayed.config.mq_rebroadcast_delay) => delayed.notify(&data),
            }
        });
    }
}

async fn process_rollup_headers<C: EthClient, S: BlsSigner>(
    shared: Arc<Shared<S>>,
    rollup_id: RollupId,
    client: Arc<SafeClient<C>>,
    mut headers: mpsc::Receiver<Header>,
    mut sub: SafeSubscription,
    output: mpsc::Sender<SignedStateRootUpdateMessage>,
) {
    let mut highest = None;
    // Completes once the previous header of this rollup was emitted or dropped.
    let mut previous: Option<oneshot::Receiver<()>> = None;

    loop {
        tokio::select! {
            biased;
            _ = shared.token.cancelled() => {
                sub.unsubscribe();
                shared.subscriptions.lock().remove(&rollup_id);
                return;
            },
            Some(block) = headers.recv() => {
                let header = match RollupHeader::try_from(&block) {
                    Ok(header) => header,
                    Err(e) => {
                        warn!("skipping header of rollup {rollup_id}: {e}");
                        continue;
                    },
                };
                if highest.is_some_and(|highest| header.number < highest) {
                    debug!(
                        "skipping header {} of rollup {rollup_id}, already past it",
                        header.number
                    );
                    continue;
                }
                highest = Some(header.number);

                let (done, next) = oneshot::channel();
                shared.tasks.spawn(process_header(
                    shared.clone(),
                    rollup_id,
                    header,
                    previous.replace(next),
                    done,
                    output.clone(),
                ));
            },
            err = sub.err() => {
                warn!("header subscription of rollup {rollup_id} ended: {err:?}");
                shared.subscriptions.lock().remove(&rollup_id);
                match shared.resubscribe(rollup_id, &client).await {
                    Some((new_headers, new_sub)) => {
                        shared.subscriptions.lock().insert(rollup_id, new_sub.clone());
                        headers = new_headers;
                        sub = new_sub;
                    },
                    None => return,
                }
            },
        }
    }
}

async fn process_header<S: BlsSigner>(
    shared: Arc<Shared<S>>,
    rollup_id: RollupId,
    header: RollupHeader,
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
    output: mpsc::Sender<SignedStateRootUpdateMessage>,
) {
    let number = header.number;

    {
        let (mut mq_blocks, id) = shared
            .notifier
            .subscribe(rollup_id, move |data| data.block.number() == number);
        let _guard = Unsubscribe {
            notifier: &shared.notifier,
            rollup_id,
            id,
        };

        let mq_block = tokio::select! {
            biased;
            _ = shared.token.cancelled() => return,
            data = mq_blocks.recv() => data,
            _ = tokio::time::sleep(shared.config.mq_wait_timeout) => None,
        };

        match mq_block {
            None => {
                debug!("no block {number} of rollup {rollup_id} from the message queue");
                shared.listener.on_missed_mq_block(rollup_id, number);
            },
            Some(data) if data.block.header.state_root != header.state_root => {
                warn!(
                    "state root mismatch for block {number} of rollup {rollup_id}: rpc {:?}, mq {:?}",
                    header.state_root, data.block.header.state_root
                );
                shared.listener.on_block_mismatch(
                    rollup_id,
                    number,
                    header.state_root,
                    data.block.header.state_root,
                );
            },
            Some(_) => {},
        }
    }

    let message = StateRootUpdateMessage::from_header(rollup_id, &header);
    let signed = match shared.signer.sign(&message.digest()) {
        Ok(bls_signature) => Some(SignedStateRootUpdateMessage {
            message,
            bls_signature,
            operator_id: shared.signer.operator_id(),
        }),
        Err(e) => {
            error!("failed to sign block {number} of rollup {rollup_id}: {e}");
            None
        },
    };

    if let Some(previous) = previous {
        tokio::select! {
            biased;
            _ = shared.token.cancelled() => return,
            _ = previous => {},
        }
    }

    if let Some(signed) = signed {
        tokio::select! {
            biased;
            _ = shared.token.cancelled() => return,
            res = output.send(signed) => {
                if res.is_err() {
                    debug!("signed state roots receiver dropped");
                    return;
                }
            },
        }
        shared.listener.on_state_root_signed(rollup_id, number);
    }

    let _ = done.send(());
}

impl<S: BlsSigner> Shared<S> {
    fn notify(&self, data: &BlockData) {
        match self.notifier.notify(data.rollup_id, &data.block) {
            Ok(delivered) => debug!(
                "block {} of rollup {} delivered to {delivered} headers",
                data.block.number(),
                data.rollup_id
            ),
            Err(e) => debug!("block {} not delivered: {e}", data.block.number()),
        }
    }

    async fn resubscribe<C: EthClient>(
        &self,
        rollup_id: RollupId,
        client: &SafeClient<C>,
    ) -> Option<(mpsc::Receiver<Header>, SafeSubscription)> {
        let attempts = self.config.reconnection_attempts;
        for attempt in 1..=attempts {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return None,
                _ = tokio::time::sleep(self.config.reconnection_delay) => {},
            }

            let (tx, rx) = mpsc::channel(HEADER_BUFFER);
            match client.subscribe_new_head(self.token.child_token(), tx).await {
                Ok(sub) => {
                    info!("resubscribed to headers of rollup {rollup_id}");
                    return Some((rx, sub));
                },
                Err(e) => warn!(
                    "attempt {attempt}/{attempts} to resubscribe to headers of rollup {rollup_id} failed: {e}"
                ),
            }
        }

        error!("giving up on headers of rollup {rollup_id}");
        None
    }
}

/// Removes a notifier subscription when dropped.
struct Unsubscribe<'a> {
    notifier: &'a Notifier,
    rollup_id: RollupId,
    id: SubscriberId,
}

impl Drop for Unsubscribe<'_> {
    fn drop(&mut self) {
        self.notifier.unsubscribe(self.rollup_id, self.id);
    }
}
