//! A chain client that keeps subscriptions alive across transport failures.
//!
//! The [`SafeClient`] wraps any [`EthClient`] and hands out [`SafeSubscription`]s for new
//! headers and filtered logs. When the underlying websocket subscription errors out, stalls, or
//! simply gets old, the client transparently opens a new one and swaps it in under the
//! [`SafeSubscription`], so the caller's channel keeps receiving items as if nothing happened.
//! For logs, the blocks that were missed while disconnected are back-filled with bounded
//! `eth_getLogs` queries before live delivery resumes, and the output is kept monotone in block
//! number.
//!
//! Transport errors are never surfaced to the caller. The only way a subscription ends from the
//! caller's point of view is by unsubscribing, cancelling the token passed at subscription time,
//! or closing the client.

mod client;
mod config;
mod error;
mod ethers_client;
mod instrumented;
mod safe_client;
mod safe_subscription;
mod subscription;
mod timer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
#[cfg(test)]
mod tests;

pub use client::*;
pub use config::*;
pub use error::*;
pub use ethers_client::*;
pub use instrumented::*;
pub use safe_client::*;
pub use safe_subscription::*;
pub use subscription::*;
