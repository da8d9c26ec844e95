//! Shared data model of the operator: rollup blocks as observed on the RPC and MQ paths, and the
//! state root update messages the operator signs.

mod block;
mod error;
mod message;

#[cfg(test)]
mod tests;

pub use block::*;
pub use error::*;
pub use message::*;

/// Identifier of a rollup. Every stream the operator consumes is scoped by it.
pub type RollupId = u32;

/// Identifier of an operator, the keccak-256 hash of its BLS public key.
pub type OperatorId = ethers::types::H256;

/// The unit delivered by the message queue path: a full rollup block tagged with the rollup it
/// belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub rollup_id: RollupId,
    pub block: RollupBlock,
}

/// Name of the durable queue that carries blocks of `rollup_id`.
pub fn queue_name(rollup_id: RollupId) -> String {
    format!("rollup{rollup_id}")
}

/// Consumer tag the operator uses when consuming the queue of `rollup_id`.
pub fn consumer_tag(rollup_id: RollupId) -> String {
    format!("operator{rollup_id}")
}
