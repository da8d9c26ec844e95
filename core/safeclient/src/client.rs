use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Block, Filter, Log, H256, U64};
use tokio::sync::mpsc;

use crate::{ClientError, Subscription};

/// A block header as delivered by a `newHeads` subscription.
pub type Header = Block<H256>;

/// The subset of the Ethereum JSON-RPC surface the attestation pipeline relies on.
#[async_trait]
pub trait EthClient: Send + Sync + 'static {
    /// `eth_blockNumber`
    async fn block_number(&self) -> Result<U64, ClientError>;

    /// `eth_getLogs`
    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError>;

    /// `web3_clientVersion`
    async fn client_version(&self) -> Result<String, ClientError>;

    /// `eth_subscribe("newHeads")`. Headers are pushed into `out` until the returned
    /// subscription is released or fails.
    async fn subscribe_new_head(&self, out: mpsc::Sender<Header>)
    -> Result<Subscription, ClientError>;

    /// `eth_subscribe("logs", filter)`.
    async fn subscribe_filter_logs(
        &self,
        filter: &Filter,
        out: mpsc::Sender<Log>,
    ) -> Result<Subscription, ClientError>;
}

#[async_trait]
impl<T: EthClient + ?Sized> EthClient for Arc<T> {
    async fn block_number(&self) -> Result<U64, ClientError> {
        (**self).block_number().await
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError> {
        (**self).get_logs(filter).await
    }

    async fn client_version(&self) -> Result<String, ClientError> {
        (**self).client_version().await
    }

    async fn subscribe_new_head(
        &self,
        out: mpsc::Sender<Header>,
    ) -> Result<Subscription, ClientError> {
        (**self).subscribe_new_head(out).await
    }

    async fn subscribe_filter_logs(
        &self,
        filter: &Filter,
        out: mpsc::Sender<Log>,
    ) -> Result<Subscription, ClientError> {
        (**self).subscribe_filter_logs(filter, out).await
    }
}
