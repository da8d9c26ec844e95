use std::time::Duration;

use ethers::types::{Filter, Log, H256};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::test_utils::{header_at, log_at, MockEthClient};
use crate::{
    ClientError,
    SafeClient,
    SafeClientConfig,
    SafeSubscription,
    Subscription,
    SubscriptionError,
};

fn numbers(logs: &[Log]) -> Vec<u64> {
    logs.iter()
        .map(|log| log.block_number.unwrap().as_u64())
        .collect()
}

async fn recv_n(rx: &mut mpsc::Receiver<Log>, n: usize) -> Vec<Log> {
    let mut logs = Vec::with_capacity(n);
    for _ in 0..n {
        let log = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for a log")
            .expect("log channel closed");
        logs.push(log);
    }
    logs
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn subscribe_logs(
    mock: &MockEthClient,
    config: SafeClientConfig,
) -> (
    SafeClient<MockEthClient>,
    SafeSubscription,
    mpsc::Receiver<Log>,
) {
    let client = SafeClient::new(mock.clone(), config);
    let (tx, rx) = mpsc::channel(64);
    let sub = client
        .subscribe_filter_logs(CancellationToken::new(), Filter::new(), tx)
        .await
        .unwrap();
    (client, sub, rx)
}

#[test]
fn test_config_defaults_and_toml() {
    let config = SafeClientConfig::default();
    assert_eq!(config.resub_interval, Duration::from_secs(300));
    assert_eq!(config.header_timeout, Duration::from_secs(60));
    assert_eq!(config.block_chunk_size, 2000);
    assert_eq!(config.block_max_range, 10000);

    let config: SafeClientConfig = toml::from_str(
        r#"
        resub_interval = "30s"
        block_chunk_size = 100
        "#,
    )
    .unwrap();
    assert_eq!(config.resub_interval, Duration::from_secs(30));
    assert_eq!(config.block_chunk_size, 100);
    assert_eq!(config.block_max_range, 10000);
}

#[tokio::test]
async fn test_safe_subscription_unsubscribe_is_idempotent() {
    let (inner, sink) = Subscription::new();
    let safe = SafeSubscription::new(inner.handle());

    safe.unsubscribe();
    safe.unsubscribe();
    safe.unsubscribe();

    assert!(safe.is_unsubscribed());
    assert!(sink.is_unsubscribed());
    assert_eq!(safe.err().await, Some(SubscriptionError::Unsubscribed));
    assert_eq!(safe.err().await, None);
    assert_eq!(safe.err().await, None);
}

#[tokio::test]
async fn test_safe_subscription_swaps_underlying() {
    let (first, first_sink) = Subscription::new();
    let (second, second_sink) = Subscription::new();
    let (third, third_sink) = Subscription::new();

    let safe = SafeSubscription::new(first.handle());
    safe.set_underlying(second.handle());
    assert!(first_sink.is_unsubscribed());
    assert!(!second_sink.is_unsubscribed());
    assert!(!safe.is_unsubscribed());

    safe.unsubscribe();
    assert!(second_sink.is_unsubscribed());

    // Anything installed after the end is released right away.
    safe.set_underlying(third.handle());
    assert!(third_sink.is_unsubscribed());
}

#[tokio::test]
async fn test_subscription_sink_drop_is_closed() {
    let (mut sub, sink) = Subscription::new();
    sink.fail(SubscriptionError::Transport("reset".into()));
    sink.fail(SubscriptionError::Closed);
    drop(sink);
    assert_eq!(
        sub.err().await,
        Some(SubscriptionError::Transport("reset".into()))
    );
    assert_eq!(sub.err().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_live_logs_are_gated_by_last_block() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let (_client, _sub, mut rx) = subscribe_logs(&mock, SafeClientConfig::default()).await;

    for n in [99, 100, 101, 101, 102, 101] {
        mock.emit_log(log_at(n));
    }

    assert_eq!(numbers(&recv_n(&mut rx, 2).await), vec![101, 102]);
    settle().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_backfill_after_connection_reset() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let (_client, _sub, mut rx) = subscribe_logs(&mock, SafeClientConfig::default()).await;

    mock.add_log(log_at(95));
    mock.add_log(log_at(105));
    mock.add_log(log_at(110));
    mock.add_log(log_at(110));
    mock.add_log(log_at(120));
    mock.set_tip(120);
    mock.drop_connection();

    assert_eq!(
        numbers(&recv_n(&mut rx, 4).await),
        vec![105, 110, 110, 120]
    );
    assert_eq!(mock.log_queries(), vec![(101, 120)]);
    assert_eq!(mock.subscribe_calls(), 2);
    assert_eq!(mock.active_subscriptions(), 1);

    // The new live stream overlaps with what was back-filled.
    mock.emit_log(log_at(110));
    mock.emit_log(log_at(120));
    mock.emit_log(log_at(121));
    assert_eq!(numbers(&recv_n(&mut rx, 1).await), vec![121]);
}

#[tokio::test(start_paused = true)]
async fn test_backfill_windows() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let config = SafeClientConfig {
        block_chunk_size: 10,
        block_max_range: 50,
        ..Default::default()
    };
    let (_client, _sub, _rx) = subscribe_logs(&mock, config).await;

    mock.set_tip(200);
    mock.drop_connection();
    settle().await;

    assert_eq!(
        mock.log_queries(),
        vec![(151, 161), (162, 172), (173, 183), (184, 194), (195, 200)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_backfill_single_block() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let (_client, _sub, mut rx) = subscribe_logs(&mock, SafeClientConfig::default()).await;

    mock.add_log(log_at(101));
    mock.set_tip(101);
    mock.drop_connection();

    assert_eq!(numbers(&recv_n(&mut rx, 1).await), vec![101]);
    assert_eq!(mock.log_queries(), vec![(101, 101)]);
}

#[tokio::test(start_paused = true)]
async fn test_no_backfill_without_new_blocks() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let (_client, _sub, _rx) = subscribe_logs(&mock, SafeClientConfig::default()).await;

    mock.drop_connection();
    settle().await;

    assert_eq!(mock.subscribe_calls(), 2);
    assert!(mock.log_queries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_backfill_is_retried_after_resub_interval() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let config = SafeClientConfig::default();
    let (_client, _sub, mut rx) = subscribe_logs(&mock, config.clone()).await;

    mock.add_log(log_at(103));
    mock.set_tip(105);
    mock.fail_next_log_queries(1);
    mock.drop_connection();
    settle().await;

    // The fresh subscription was released again.
    assert_eq!(mock.subscribe_calls(), 2);
    assert_eq!(mock.active_subscriptions(), 0);
    assert!(rx.try_recv().is_err());

    tokio::time::sleep(config.resub_interval).await;

    assert_eq!(numbers(&recv_n(&mut rx, 1).await), vec![103]);
    assert_eq!(mock.subscribe_calls(), 3);
    assert_eq!(mock.log_queries(), vec![(101, 105)]);
    assert_eq!(mock.active_subscriptions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_resubscribe_is_retried() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let config = SafeClientConfig::default();
    let (_client, _sub, _rx) = subscribe_logs(&mock, config.clone()).await;

    mock.fail_next_subscriptions(2);
    mock.drop_connection();
    settle().await;
    assert_eq!(mock.subscribe_calls(), 2);

    tokio::time::sleep(config.resub_interval).await;
    assert_eq!(mock.subscribe_calls(), 3);

    tokio::time::sleep(config.resub_interval).await;
    assert_eq!(mock.subscribe_calls(), 4);
    assert_eq!(mock.active_subscriptions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_error_resubscribes_once() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let config = SafeClientConfig::default();
    let (_client, _sub, _rx) = subscribe_logs(&mock, config.clone()).await;

    mock.drop_connection();
    settle().await;
    assert_eq!(mock.subscribe_calls(), 2);

    // The renewal timer was stopped by the successful resubscription.
    tokio::time::sleep(config.resub_interval * 3).await;
    assert_eq!(mock.subscribe_calls(), 2);
    assert_eq!(mock.active_subscriptions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_subscription_is_renewed_once() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let config = SafeClientConfig::default();
    let (_client, _sub, _rx) = subscribe_logs(&mock, config.clone()).await;

    tokio::time::sleep(config.resub_interval * 3).await;
    assert_eq!(mock.subscribe_calls(), 2);
    assert_eq!(mock.active_subscriptions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_context_unsubscribes() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let client = SafeClient::new(mock.clone(), SafeClientConfig::default());
    let ctx = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(8);
    let sub = client
        .subscribe_filter_logs(ctx.clone(), Filter::new(), tx)
        .await
        .unwrap();

    ctx.cancel();
    assert_eq!(sub.err().await, Some(SubscriptionError::Unsubscribed));
    assert_eq!(sub.err().await, None);
    assert_eq!(mock.active_subscriptions(), 0);

    // The task is gone and with it the sender.
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_stops_the_task() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let (_client, sub, mut rx) = subscribe_logs(&mock, SafeClientConfig::default()).await;

    sub.unsubscribe();
    sub.unsubscribe();
    assert!(rx.recv().await.is_none());
    assert_eq!(mock.active_subscriptions(), 0);
    assert_eq!(sub.err().await, Some(SubscriptionError::Unsubscribed));
    assert_eq!(sub.err().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_close() {
    let mock = MockEthClient::default();
    mock.set_tip(100);
    let (client, sub, _rx) = subscribe_logs(&mock, SafeClientConfig::default()).await;
    let (tx, _heads) = mpsc::channel(8);
    let heads = client
        .subscribe_new_head(CancellationToken::new(), tx)
        .await
        .unwrap();
    assert_eq!(mock.active_subscriptions(), 2);

    client.close().await;
    client.close().await;

    assert!(client.is_closed());
    assert!(sub.is_unsubscribed());
    assert!(heads.is_unsubscribed());
    assert_eq!(mock.active_subscriptions(), 0);

    let (tx, _rx) = mpsc::channel(8);
    assert!(matches!(
        client
            .subscribe_filter_logs(CancellationToken::new(), Filter::new(), tx)
            .await,
        Err(ClientError::Closed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_heads_are_forwarded_across_resets() {
    let mock = MockEthClient::default();
    let client = SafeClient::new(mock.clone(), SafeClientConfig::default());
    let (tx, mut rx) = mpsc::channel(8);
    let _sub = client
        .subscribe_new_head(CancellationToken::new(), tx)
        .await
        .unwrap();

    mock.emit_header(header_at(1, 10, H256::zero()));
    assert_eq!(rx.recv().await.unwrap().number.map(|n| n.as_u64()), Some(1));

    mock.drop_connection();
    settle().await;
    assert_eq!(mock.subscribe_calls(), 2);

    mock.emit_header(header_at(2, 12, H256::zero()));
    assert_eq!(rx.recv().await.unwrap().number.map(|n| n.as_u64()), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_head_subscription_is_replaced() {
    let mock = MockEthClient::default();
    let config = SafeClientConfig::default();
    let client = SafeClient::new(mock.clone(), config.clone());
    let (tx, mut rx) = mpsc::channel(8);
    let _sub = client
        .subscribe_new_head(CancellationToken::new(), tx)
        .await
        .unwrap();

    mock.emit_header(header_at(1, 10, H256::zero()));
    rx.recv().await.unwrap();

    // A header arrived in the first period, so the first tick only clears the flag.
    tokio::time::sleep(config.header_timeout + Duration::from_secs(1)).await;
    assert_eq!(mock.subscribe_calls(), 1);

    tokio::time::sleep(config.header_timeout).await;
    assert_eq!(mock.subscribe_calls(), 2);
    assert_eq!(mock.active_subscriptions(), 1);

    mock.emit_header(header_at(2, 12, H256::zero()));
    assert_eq!(rx.recv().await.unwrap().number.map(|n| n.as_u64()), Some(2));
}

#[tokio::test]
async fn test_instrumented_client_records_calls() {
    use crate::{EthClient, InstrumentedClient, RpcMetrics};

    let registry = prometheus::Registry::new();
    let metrics = RpcMetrics::new(&registry).unwrap();
    let mock = MockEthClient::default();
    mock.set_tip(7);
    let client = InstrumentedClient::new(mock.clone(), "rollup1", metrics);

    assert_eq!(client.block_number().await.unwrap().as_u64(), 7);
    mock.fail_next_log_queries(1);
    assert!(client.get_logs(&Filter::new()).await.is_err());

    let families = registry.gather();
    let value = |name: &str, method: &str| {
        families
            .iter()
            .find(|f| f.get_name() == name)
            .and_then(|f| {
                f.get_metric().iter().find(|m| {
                    m.get_label()
                        .iter()
                        .any(|l| l.get_name() == "method" && l.get_value() == method)
                })
            })
            .map(|m| m.get_counter().get_value())
    };
    assert_eq!(value("sffl_rpc_requests_total", "eth_blockNumber"), Some(1.0));
    assert_eq!(value("sffl_rpc_requests_total", "eth_getLogs"), Some(1.0));
    assert_eq!(value("sffl_rpc_errors_total", "eth_getLogs"), Some(1.0));
    assert_eq!(value("sffl_rpc_errors_total", "eth_blockNumber"), None);
}
