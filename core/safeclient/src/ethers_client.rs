use std::sync::Arc;

use async_trait::async_trait;
use ethers::providers::{Middleware, Provider, SubscriptionStream, Ws};
use ethers::types::{Filter, Log, U64};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::{ClientError, EthClient, Header, Subscription, SubscriptionError, SubscriptionSink};

/// [`EthClient`] over an `ethers` websocket provider.
#[derive(Clone)]
pub struct EthersClient {
    url: String,
    provider: Arc<Provider<Ws>>,
}

impl EthersClient {
    pub async fn connect(url: impl Into<String>) -> Result<Self, ClientError> {
        let url = url.into();
        debug!("connecting to {url}");
        let provider = Provider::<Ws>::connect(url.as_str()).await?;
        Ok(Self {
            url,
            provider: Arc::new(provider),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EthClient for EthersClient {
    async fn block_number(&self) -> Result<U64, ClientError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError> {
        Ok(self.provider.get_logs(filter).await?)
    }

    async fn client_version(&self) -> Result<String, ClientError> {
        Ok(self.provider.client_version().await?)
    }

    async fn subscribe_new_head(
        &self,
        out: mpsc::Sender<Header>,
    ) -> Result<Subscription, ClientError> {
        let provider = self.provider.clone();
        let (sub, sink) = Subscription::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(async move {
            match provider.subscribe_blocks().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    pipe(stream, out, sink).await;
                },
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                },
            }
        });

        ready_rx.await.map_err(|_| ClientError::Closed)??;
        Ok(sub)
    }

    async fn subscribe_filter_logs(
        &self,
        filter: &Filter,
        out: mpsc::Sender<Log>,
    ) -> Result<Subscription, ClientError> {
        let provider = self.provider.clone();
        let filter = filter.clone();
        let (sub, sink) = Subscription::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(async move {
            match provider.subscribe_logs(&filter).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    pipe(stream, out, sink).await;
                },
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                },
            }
        });

        ready_rx.await.map_err(|_| ClientError::Closed)??;
        Ok(sub)
    }
}

/// Forward a subscription stream into `out` until the subscriber lets go or the endpoint ends
/// the stream.
async fn pipe<R>(stream: SubscriptionStream<'_, Ws, R>, out: mpsc::Sender<R>, sink: SubscriptionSink)
where
    R: DeserializeOwned + Send,
{
    let mut stream = Box::pin(stream);
    loop {
        tokio::select! {
            _ = sink.unsubscribed() => break,
            item = stream.next() => {
                let Some(item) = item else {
                    sink.fail(SubscriptionError::Closed);
                    return;
                };
                tokio::select! {
                    _ = sink.unsubscribed() => break,
                    res = out.send(item) => {
                        if res.is_err() {
                            break;
                        }
                    },
                }
            },
        }
    }

    if let Err(e) = stream.unsubscribe().await {
        trace!("failed to release subscription: {e}");
    }
}
