//! An in-memory [`EthClient`] that emulates block production and connection loss.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{BlockNumber, Filter, FilterBlockOption, Log, H256, U256, U64};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{ClientError, EthClient, Header, Subscription, SubscriptionError, SubscriptionSink};

#[derive(Clone, Default)]
pub struct MockEthClient {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    tip: u64,
    history: Vec<Log>,
    log_subs: Vec<(mpsc::Sender<Log>, SubscriptionSink)>,
    head_subs: Vec<(mpsc::Sender<Header>, SubscriptionSink)>,
    failing_subscriptions: usize,
    failing_log_queries: usize,
    log_queries: Vec<(u64, u64)>,
    subscribe_calls: usize,
}

impl MockEthClient {
    pub fn set_tip(&self, tip: u64) {
        self.state.lock().tip = tip;
    }

    /// Record a log that `eth_getLogs` will return. It is not pushed to live subscriptions.
    pub fn add_log(&self, log: Log) {
        self.state.lock().history.push(log);
    }

    /// Push a log to every live log subscription.
    pub fn emit_log(&self, log: Log) {
        let mut state = self.state.lock();
        state.log_subs.retain(|(_, sink)| !sink.is_unsubscribed());
        for (tx, _) in &state.log_subs {
            let _ = tx.try_send(log.clone());
        }
    }

    /// Push a header to every live head subscription.
    pub fn emit_header(&self, header: Header) {
        let mut state = self.state.lock();
        state.head_subs.retain(|(_, sink)| !sink.is_unsubscribed());
        for (tx, _) in &state.head_subs {
            let _ = tx.try_send(header.clone());
        }
    }

    /// Fail every live subscription as if the websocket was reset.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        for (_, sink) in state.log_subs.drain(..) {
            sink.fail(SubscriptionError::Transport("connection reset".into()));
        }
        for (_, sink) in state.head_subs.drain(..) {
            sink.fail(SubscriptionError::Transport("connection reset".into()));
        }
    }

    pub fn fail_next_subscriptions(&self, n: usize) {
        self.state.lock().failing_subscriptions = n;
    }

    pub fn fail_next_log_queries(&self, n: usize) {
        self.state.lock().failing_log_queries = n;
    }

    /// The block ranges of every successful `eth_getLogs` call so far.
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.state.lock().log_queries.clone()
    }

    /// Number of subscription attempts, failed ones included.
    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().subscribe_calls
    }

    /// Number of subscriptions that were neither released nor dropped.
    pub fn active_subscriptions(&self) -> usize {
        let state = self.state.lock();
        let logs = state
            .log_subs
            .iter()
            .filter(|(_, sink)| !sink.is_unsubscribed())
            .count();
        let heads = state
            .head_subs
            .iter()
            .filter(|(_, sink)| !sink.is_unsubscribed())
            .count();
        logs + heads
    }

    fn try_subscribe(&self) -> Result<(Subscription, SubscriptionSink), ClientError> {
        let mut state = self.state.lock();
        state.subscribe_calls += 1;
        if state.failing_subscriptions > 0 {
            state.failing_subscriptions -= 1;
            return Err(ClientError::Transport("connection refused".into()));
        }
        Ok(Subscription::new())
    }
}

#[async_trait]
impl EthClient for MockEthClient {
    async fn block_number(&self) -> Result<U64, ClientError> {
        Ok(self.state.lock().tip.into())
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError> {
        let mut state = self.state.lock();
        if state.failing_log_queries > 0 {
            state.failing_log_queries -= 1;
            return Err(ClientError::Transport("request timed out".into()));
        }

        let bound = |n: &Option<BlockNumber>, default: u64| {
            n.and_then(|n| n.as_number())
                .map(|n| n.as_u64())
                .unwrap_or(default)
        };
        let (from, to) = match &filter.block_option {
            FilterBlockOption::Range {
                from_block,
                to_block,
            } => (bound(from_block, 0), bound(to_block, state.tip)),
            FilterBlockOption::AtBlockHash(_) => (0, state.tip),
        };
        state.log_queries.push((from, to));

        Ok(state
            .history
            .iter()
            .filter(|log| {
                log.block_number
                    .map(|n| (from..=to).contains(&n.as_u64()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn client_version(&self) -> Result<String, ClientError> {
        Ok("mock/v0.1.0".into())
    }

    async fn subscribe_new_head(
        &self,
        out: mpsc::Sender<Header>,
    ) -> Result<Subscription, ClientError> {
        let (sub, sink) = self.try_subscribe()?;
        self.state.lock().head_subs.push((out, sink));
        Ok(sub)
    }

    async fn subscribe_filter_logs(
        &self,
        _filter: &Filter,
        out: mpsc::Sender<Log>,
    ) -> Result<Subscription, ClientError> {
        let (sub, sink) = self.try_subscribe()?;
        self.state.lock().log_subs.push((out, sink));
        Ok(sub)
    }
}

pub fn log_at(block_number: u64) -> Log {
    Log {
        block_number: Some(block_number.into()),
        block_hash: Some(H256::from_low_u64_be(block_number)),
        ..Default::default()
    }
}

pub fn header_at(number: u64, time: u64, state_root: H256) -> Header {
    Header {
        number: Some(number.into()),
        timestamp: U256::from(time),
        state_root,
        ..Default::default()
    }
}
