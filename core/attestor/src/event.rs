use ethers::types::H256;
use prometheus::{IntCounterVec, Opts, Registry};
use sffl_types::RollupId;

/// Observes the outcome of every header the attestor processes.
pub trait EventListener: Send + Sync + 'static {
    /// No block with this height arrived from the message queue in time.
    fn on_missed_mq_block(&self, rollup_id: RollupId, block_number: u64);

    /// The message queue saw a different state root than the chain for this height.
    fn on_block_mismatch(
        &self,
        rollup_id: RollupId,
        block_number: u64,
        rpc_state_root: H256,
        mq_state_root: H256,
    );

    fn on_state_root_signed(&self, _rollup_id: RollupId, _block_number: u64) {}
}

pub struct NoopEventListener;

impl EventListener for NoopEventListener {
    fn on_missed_mq_block(&self, _: RollupId, _: u64) {}

    fn on_block_mismatch(&self, _: RollupId, _: u64, _: H256, _: H256) {}
}

/// Counts events in prometheus, per rollup.
pub struct MetricsEventListener {
    missed_mq_blocks: IntCounterVec,
    block_mismatches: IntCounterVec,
    signed_state_roots: IntCounterVec,
}

impl MetricsEventListener {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let missed_mq_blocks = IntCounterVec::new(
            Opts::new(
                "sffl_missed_mq_blocks_total",
                "Headers for which no block arrived from the message queue in time",
            ),
            &["rollup_id"],
        )?;
        let block_mismatches = IntCounterVec::new(
            Opts::new(
                "sffl_block_mismatches_total",
                "Headers whose state root differs from the message queue block",
            ),
            &["rollup_id"],
        )?;
        let signed_state_roots = IntCounterVec::new(
            Opts::new(
                "sffl_signed_state_roots_total",
                "State root updates signed and emitted",
            ),
            &["rollup_id"],
        )?;

        registry.register(Box::new(missed_mq_blocks.clone()))?;
        registry.register(Box::new(block_mismatches.clone()))?;
        registry.register(Box::new(signed_state_roots.clone()))?;

        Ok(Self {
            missed_mq_blocks,
            block_mismatches,
            signed_state_roots,
        })
    }
}

impl EventListener for MetricsEventListener {
    fn on_missed_mq_block(&self, rollup_id: RollupId, _block_number: u64) {
        self.missed_mq_blocks
            .with_label_values(&[&rollup_id.to_string()])
            .inc();
    }

    fn on_block_mismatch(&self, rollup_id: RollupId, _: u64, _: H256, _: H256) {
        self.block_mismatches
            .with_label_values(&[&rollup_id.to_string()])
            .inc();
    }

    fn on_state_root_signed(&self, rollup_id: RollupId, _block_number: u64) {
        self.signed_state_roots
            .with_label_values(&[&rollup_id.to_string()])
            .inc();
    }
}

type MissedMqBlockFn = Box<dyn Fn(RollupId, u64) + Send + Sync>;
type BlockMismatchFn = Box<dyn Fn(RollupId, u64, H256, H256) + Send + Sync>;

/// Forwards only the events it has a callback for.
#[derive(Default)]
pub struct SelectiveEventListener {
    pub on_missed_mq_block: Option<MissedMqBlockFn>,
    pub on_block_mismatch: Option<BlockMismatchFn>,
}

impl EventListener for SelectiveEventListener {
    fn on_missed_mq_block(&self, rollup_id: RollupId, block_number: u64) {
        if let Some(f) = &self.on_missed_mq_block {
            f(rollup_id, block_number);
        }
    }

    fn on_block_mismatch(
        &self,
        rollup_id: RollupId,
        block_number: u64,
        rpc_state_root: H256,
        mq_state_root: H256,
    ) {
        if let Some(f) = &self.on_block_mismatch {
            f(rollup_id, block_number, rpc_state_root, mq_state_root);
        }
    }
}
