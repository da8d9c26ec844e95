use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use sffl_types::{queue_name, BlockData, RollupBlock, RollupId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{DeliveryStream, QueuesListenerError};

/// Drains the delivery stream of every bound queue into one channel of decoded blocks.
pub struct QueuesListener {
    blocks: mpsc::Sender<BlockData>,
    queues: Mutex<HashSet<RollupId>>,
    active: Arc<AtomicUsize>,
}

impl QueuesListener {
    /// `active` counts the listening tasks alive at any time. It may be shared between
    /// successive listeners.
    pub fn new(blocks: mpsc::Sender<BlockData>, active: Arc<AtomicUsize>) -> Self {
        Self {
            blocks,
            queues: Mutex::new(HashSet::new()),
            active,
        }
    }

    pub fn add(
        &self,
        rollup_id: RollupId,
        deliveries: DeliveryStream,
        token: CancellationToken,
    ) -> Result<(), QueuesListenerError> {
        if !self.queues.lock().insert(rollup_id) {
            return Err(QueuesListenerError::QueueExists(rollup_id));
        }

        let guard = ActiveGuard::new(self.active.clone());
        tokio::spawn(listen(
            rollup_id,
            deliveries,
            self.blocks.clone(),
            token,
            guard,
        ));
        Ok(())
    }
}

async fn listen(
    rollup_id: RollupId,
    mut deliveries: DeliveryStream,
    blocks: mpsc::Sender<BlockData>,
    token: CancellationToken,
    _guard: ActiveGuard,
) {
    let queue = queue_name(rollup_id);
    debug!("listening to {queue}");

    loop {
        let delivery = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            delivery = deliveries.next() => delivery,
        };
        let Some(delivery) = delivery else {
            debug!("deliveries from {queue} ended");
            return;
        };

        let block = match RollupBlock::from_rlp_bytes(&delivery.data) {
            Ok(block) => block,
            Err(e) => {
                warn!("failed to decode block from {queue}: {e}");
                continue;
            },
        };

        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            res = blocks.send(BlockData { rollup_id, block }) => res,
        };
        if sent.is_err() {
            debug!("block receiver dropped, no longer listening to {queue}");
            return;
        }

        if let Err(e) = delivery.ack(false).await {
            warn!("failed to ack delivery from {queue}: {e}");
        }
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
