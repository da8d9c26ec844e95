use std::sync::Arc;

use ethers::types::{Filter, Log, U64};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::timer::ResubTimer;
use crate::{
    ClientError,
    EthClient,
    Header,
    SafeClientConfig,
    SafeSubscription,
    Subscription,
    SubscriptionError,
};

/// Capacity of the channels between the underlying subscriptions and the background tasks.
const INNER_BUFFER: usize = 64;

/// A chain client whose subscriptions survive transport failures.
///
/// Plain RPC calls are passed through to the wrapped client. Subscriptions are serviced by a
/// background task each, which resubscribes whenever the underlying subscription fails or goes
/// quiet and hides the switch from the caller.
pub struct SafeClient<C> {
    client: Arc<C>,
    config: SafeClientConfig,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl<C: EthClient> SafeClient<C> {
    pub fn new(client: C, config: SafeClientConfig) -> Self {
        Self {
            client: Arc::new(client),
            config,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &SafeClientConfig {
        &self.config
    }

    pub async fn block_number(&self) -> Result<U64, ClientError> {
        self.client.block_number().await
    }

    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError> {
        self.client.get_logs(filter).await
    }

    pub async fn client_version(&self) -> Result<String, ClientError> {
        self.client.client_version().await
    }

    /// Subscribe to the logs matching `filter`.
    ///
    /// Logs are delivered strictly increasing in block number, starting after the tip observed
    /// now. When the underlying subscription has to be replaced, the logs of the blocks missed
    /// in between are fetched with `eth_getLogs` and delivered before live logs resume. At
    /// most `block_max_range` blocks are recovered this way.
    pub async fn subscribe_filter_logs(
        &self,
        ctx: CancellationToken,
        filter: Filter,
        out: mpsc::Sender<Log>,
    ) -> Result<SafeSubscription, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let last_block = self.client.block_number().await?.as_u64();
        let (tx, rx) = mpsc::channel(INNER_BUFFER);
        let (errors, handle) = self.client.subscribe_filter_logs(&filter, tx).await?.into_parts();
        let safe = SafeSubscription::new(handle);

        debug!("subscribed to logs from block {last_block}");

        let task = LogsTask {
            client: self.client.clone(),
            config: self.config.clone(),
            filter,
            out,
            safe: safe.clone(),
            ctx,
            shutdown: self.shutdown.clone(),
            last_block,
            logs: rx,
            errors: Some(errors),
            timer: ResubTimer::new(self.config.resub_interval),
        };
        self.tasks.spawn(task.run());

        Ok(safe)
    }

    /// Subscribe to new block headers.
    ///
    /// Headers are forwarded as the endpoint produces them. No back-fill is attempted, but a
    /// subscription that delivers nothing for `header_timeout` is replaced.
    pub async fn subscribe_new_head(
        &self,
        ctx: CancellationToken,
        out: mpsc::Sender<Header>,
    ) -> Result<SafeSubscription, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let (tx, rx) = mpsc::channel(INNER_BUFFER);
        let (errors, handle) = self.client.subscribe_new_head(tx).await?.into_parts();
        let safe = SafeSubscription::new(handle);

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.config.header_timeout,
            self.config.header_timeout,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let task = HeadsTask {
            client: self.client.clone(),
            out,
            safe: safe.clone(),
            ctx,
            shutdown: self.shutdown.clone(),
            headers: rx,
            errors: Some(errors),
            timer: ResubTimer::new(self.config.resub_interval),
            ticker,
            received: false,
        };
        self.tasks.spawn(task.run());

        Ok(safe)
    }

    /// Stop every subscription task and wait for them to exit.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Waits for the next error of an underlying subscription. Once an error was seen the receiver
/// is dropped and this pends until a new subscription is installed.
async fn next_error(
    errors: &mut Option<mpsc::Receiver<SubscriptionError>>,
) -> SubscriptionError {
    let Some(rx) = errors.as_mut() else {
        return std::future::pending().await;
    };
    let err = rx.recv().await.unwrap_or(SubscriptionError::Closed);
    *errors = None;
    err
}

struct LogsTask<C> {
    client: Arc<C>,
    config: SafeClientConfig,
    filter: Filter,
    out: mpsc::Sender<Log>,
    safe: SafeSubscription,
    ctx: CancellationToken,
    shutdown: CancellationToken,
    /// Highest block number forwarded so far.
    last_block: u64,
    logs: mpsc::Receiver<Log>,
    errors: Option<mpsc::Receiver<SubscriptionError>>,
    timer: ResubTimer,
}

impl<C: EthClient> LogsTask<C> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.ctx.cancelled() => break,
                _ = self.safe.unsubscribed() => break,
                Some(log) = self.logs.recv() => {
                    if !self.on_log(log).await {
                        break;
                    }
                },
                err = next_error(&mut self.errors) => {
                    warn!("log subscription failed: {err}");
                    if !self.resubscribe().await {
                        break;
                    }
                },
                _ = self.timer.fired() => {
                    debug!("renewing log subscription");
                    if !self.resubscribe().await {
                        break;
                    }
                },
            }
        }
        self.safe.unsubscribe();
    }

    async fn on_log(&mut self, log: Log) -> bool {
        let Some(number) = log.block_number.map(|n| n.as_u64()) else {
            return true;
        };
        if number <= self.last_block {
            return true;
        }
        self.last_block = number;
        self.forward(log).await
    }

    /// Returns `false` if the subscription ended while forwarding.
    async fn forward(&self, log: Log) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = self.ctx.cancelled() => false,
            _ = self.safe.unsubscribed() => false,
            res = self.out.send(log) => res.is_ok(),
        }
    }

    async fn resubscribe(&mut self) -> bool {
        let (tx, rx) = mpsc::channel(INNER_BUFFER);
        let sub = match self.client.subscribe_filter_logs(&self.filter, tx).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!("failed to resubscribe to logs: {e}");
                self.timer.reset();
                return true;
            },
        };

        let missed = match self.backfill().await {
            Ok(missed) => missed,
            Err(e) => {
                warn!("failed to back-fill logs after block {}: {e}", self.last_block);
                sub.unsubscribe();
                self.timer.reset();
                return true;
            },
        };

        self.install(sub, rx);
        info!(
            "resubscribed to logs, recovered {} missed logs after block {}",
            missed.len(),
            self.last_block
        );

        for log in missed {
            let Some(number) = log.block_number.map(|n| n.as_u64()) else {
                continue;
            };
            self.last_block = self.last_block.max(number);
            if !self.forward(log).await {
                return false;
            }
        }

        self.timer.stop();
        true
    }

    fn install(&mut self, sub: Subscription, logs: mpsc::Receiver<Log>) {
        let (errors, handle) = sub.into_parts();
        self.safe.set_underlying(handle);
        self.logs = logs;
        self.errors = Some(errors);
    }

    /// Fetch the logs of the blocks after `last_block` up to the current tip, in windows of
    /// `block_chunk_size + 1` blocks and no further back than `block_max_range` blocks.
    async fn backfill(&self) -> Result<Vec<Log>, ClientError> {
        let current = self.client.block_number().await?.as_u64();
        if current <= self.last_block {
            return Ok(Vec::new());
        }

        let mut from = self
            .last_block
            .max(current.saturating_sub(self.config.block_max_range))
            + 1;
        let mut missed = Vec::new();
        while from <= current {
            let to = from.saturating_add(self.config.block_chunk_size).min(current);
            let filter = self.filter.clone().from_block(from).to_block(to);
            missed.extend(self.client.get_logs(&filter).await?);
            from = to + 1;
        }

        Ok(missed)
    }
}

struct HeadsTask<C> {
    client: Arc<C>,
    out: mpsc::Sender<Header>,
    safe: SafeSubscription,
    ctx: CancellationToken,
    shutdown: CancellationToken,
    headers: mpsc::Receiver<Header>,
    errors: Option<mpsc::Receiver<SubscriptionError>>,
    timer: ResubTimer,
    ticker: Interval,
    /// Whether a header arrived since the last tick.
    received: bool,
}

impl<C: EthClient> HeadsTask<C> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.ctx.cancelled() => break,
                _ = self.safe.unsubscribed() => break,
                Some(header) = self.headers.recv() => {
                    self.received = true;
                    let sent = tokio::select! {
                        _ = self.shutdown.cancelled() => false,
                        _ = self.ctx.cancelled() => false,
                        _ = self.safe.unsubscribed() => false,
                        res = self.out.send(header) => res.is_ok(),
                    };
                    if !sent {
                        break;
                    }
                },
                err = next_error(&mut self.errors) => {
                    warn!("head subscription failed: {err}");
                    self.resubscribe().await;
                },
                _ = self.ticker.tick() => {
                    if self.received {
                        self.received = false;
                    } else {
                        warn!("no header received in the last {:?}", self.ticker.period());
                        self.resubscribe().await;
                    }
                },
                _ = self.timer.fired() => {
                    debug!("renewing head subscription");
                    self.resubscribe().await;
                },
            }
        }
        self.safe.unsubscribe();
    }

    async fn resubscribe(&mut self) {
        let (tx, rx) = mpsc::channel(INNER_BUFFER);
        match self.client.subscribe_new_head(tx).await {
            Ok(sub) => {
                let (errors, handle) = sub.into_parts();
                self.safe.set_underlying(handle);
                self.headers = rx;
                self.errors = Some(errors);
                self.ticker.reset();
                self.timer.stop();
                info!("resubscribed to new heads");
            },
            Err(e) => {
                warn!("failed to resubscribe to new heads: {e}");
                self.timer.reset();
            },
        }
    }
}
