//! In-memory, per-rollup fan-out of block observations.
//!
//! Subscribers register interest in a rollup with a predicate and get a bounded channel back.
//! Every notified block that satisfies the predicate is pushed to that channel without waiting:
//! a subscriber that does not keep up loses the blocks that would not fit.

use std::collections::HashMap;

use parking_lot::Mutex;
use sffl_types::{BlockData, RollupBlock, RollupId};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;


/// Capacity of every subscriber's delivery channel.
pub const DELIVERY_CAPACITY: usize = 100;

pub type Predicate = Box<dyn Fn(&BlockData) -> bool + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotifierError {
    #[error("no subscriber ever registered for rollup {0}")]
    UnknownRollup(RollupId),
}

/// Identifies a subscription within a [`Notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct SubscriberRecord {
    id: SubscriberId,
    predicate: Predicate,
    tx: mpsc::Sender<BlockData>,
}

#[derive(Default)]
struct State {
    /// A rollup stays known once anyone subscribed to it, even with no subscribers left.
    subscribers: HashMap<RollupId, Vec<SubscriberRecord>>,
    next_id: u64,
}

#[derive(Default)]
pub struct Notifier {
    state: Mutex<State>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(
        &self,
        rollup_id: RollupId,
        predicate: F,
    ) -> (mpsc::Receiver<BlockData>, SubscriberId)
    where
        F: Fn(&BlockData) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(DELIVERY_CAPACITY);
        let mut state = self.state.lock();
        let id = SubscriberId(state.next_id);
        state.next_id += 1;
        state
            .subscribers
            .entry(rollup_id)
            .or_default()
            .push(SubscriberRecord {
                id,
                predicate: Box::new(predicate),
                tx,
            });
        (rx, id)
    }

    /// Deliver `block` to every subscriber of `rollup_id` whose predicate accepts it. Returns
    /// how many subscribers received it.
    pub fn notify(&self, rollup_id: RollupId, block: &RollupBlock) -> Result<usize, NotifierError> {
        let state = self.state.lock();
        let subscribers = state
            .subscribers
            .get(&rollup_id)
            .ok_or(NotifierError::UnknownRollup(rollup_id))?;

        let data = BlockData {
            rollup_id,
            block: block.clone(),
        };
        let mut delivered = 0;
        for record in subscribers {
            if !(record.predicate)(&data) {
                continue;
            }
            match record.tx.try_send(data.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(
                        "dropping block {} of rollup {rollup_id} for slow subscriber {:?}",
                        block.number(),
                        record.id
                    );
                },
                Err(TrySendError::Closed(_)) => {},
            }
        }

        Ok(delivered)
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, rollup_id: RollupId, id: SubscriberId) -> bool {
        let mut state = self.state.lock();
        let Some(subscribers) = state.subscribers.get_mut(&rollup_id) else {
            return false;
        };
        let len = subscribers.len();
        subscribers.retain(|record| record.id != id);
        subscribers.len() != len
    }

    pub fn subscriber_count(&self, rollup_id: RollupId) -> usize {
        self.state
            .lock()
            .subscribers
            .get(&rollup_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
