use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Filter, Log, U64};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::{ClientError, EthClient, Header, Subscription};

/// Prometheus metrics shared by every [`InstrumentedClient`] of a process.
#[derive(Clone)]
pub struct RpcMetrics {
    requests: IntCounterVec,
    errors: IntCounterVec,
    latency: HistogramVec,
}

impl RpcMetrics {
    const LABELS: &'static [&'static str] = &["method", "client"];

    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new("sffl_rpc_requests_total", "Number of RPC requests issued"),
            Self::LABELS,
        )?;
        let errors = IntCounterVec::new(
            Opts::new("sffl_rpc_errors_total", "Number of RPC requests that failed"),
            Self::LABELS,
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new("sffl_rpc_duration_seconds", "RPC request latency"),
            Self::LABELS,
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            requests,
            errors,
            latency,
        })
    }
}

/// An [`EthClient`] that records the count, failures and latency of every call it forwards.
pub struct InstrumentedClient<C> {
    client: C,
    name: Arc<str>,
    metrics: RpcMetrics,
}

impl<C: EthClient> InstrumentedClient<C> {
    pub fn new(client: C, name: impl Into<Arc<str>>, metrics: RpcMetrics) -> Self {
        Self {
            client,
            name: name.into(),
            metrics,
        }
    }

    async fn record<T, F>(&self, method: &str, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>> + Send,
    {
        let labels = [method, &*self.name];
        self.metrics.requests.with_label_values(&labels).inc();
        let start = Instant::now();
        let res = fut.await;
        self.metrics
            .latency
            .with_label_values(&labels)
            .observe(start.elapsed().as_secs_f64());
        if res.is_err() {
            self.metrics.errors.with_label_values(&labels).inc();
        }
        res
    }
}

#[async_trait]
impl<C: EthClient> EthClient for InstrumentedClient<C> {
    async fn block_number(&self) -> Result<U64, ClientError> {
        self.record("eth_blockNumber", self.client.block_number())
            .await
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError> {
        self.record("eth_getLogs", self.client.get_logs(filter)).await
    }

    async fn client_version(&self) -> Result<String, ClientError> {
        self.record("web3_clientVersion", self.client.client_version())
            .await
    }

    async fn subscribe_new_head(
        &self,
        out: mpsc::Sender<Header>,
    ) -> Result<Subscription, ClientError> {
        self.record("eth_subscribe_newHeads", self.client.subscribe_new_head(out))
            .await
    }

    async fn subscribe_filter_logs(
        &self,
        filter: &Filter,
        out: mpsc::Sender<Log>,
    ) -> Result<Subscription, ClientError> {
        self.record(
            "eth_subscribe_logs",
            self.client.subscribe_filter_logs(filter, out),
        )
        .await
    }
}
