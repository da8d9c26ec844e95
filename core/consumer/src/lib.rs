//! The message-queue side of the attestation pipeline.
//!
//! Every rollup has a durable queue on the broker, named after its id, onto which the data
//! availability indexer publishes the blocks it saw posted. The [`Consumer`] keeps a connection
//! to the broker with one consumer per rollup queue, and turns the deliveries into a single
//! channel of decoded [`BlockData`](sffl_types::BlockData).

mod amqp;
mod broker;
mod config;
mod consumer;
mod error;
mod listener;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use amqp::*;
pub use broker::*;
pub use config::*;
pub use consumer::*;
pub use error::*;
pub use listener::*;
