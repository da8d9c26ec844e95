//! The operator's attestation pipeline.
//!
//! The [`Attestor`] watches the head of every configured rollup through a
//! [`SafeClient`](sffl_safeclient::SafeClient), cross-checks each header against the block the
//! data availability indexer published on the message queue, and signs the header's state root
//! with the operator's BLS key. Correlation outcomes are reported to an [`EventListener`].

mod attestor;
mod config;
mod error;
mod event;
mod keys;


pub use attestor::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use keys::*;
