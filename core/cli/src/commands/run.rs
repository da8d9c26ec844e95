use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Registry, TextEncoder};
use sffl_attestor::{
    Attestor,
    BlsSigner,
    EventListener,
    KeyPairSigner,
    MetricsEventListener,
    NoopEventListener,
};
use sffl_consumer::{AmqpBroker, Consumer};
use sffl_safeclient::{EthClient, EthersClient, InstrumentedClient, RpcMetrics, SafeClient};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::config::OperatorConfig;
use crate::keystore::Keystore;

pub async fn exec(config_path: &Path) -> Result<()> {
    let config = OperatorConfig::load(config_path)?;
    let keystore = Keystore::load(&config.bls_private_key_path, &config.ecdsa_private_key_path)
        .context("Failed to initialize keystore")?;
    let signer = KeyPairSigner::new(keystore.bls.clone()).context("Invalid bls key")?;
    info!("Operator id: {:?}", signer.operator_id());

    let registry = Registry::new();
    let mut rpc_metrics = None;
    let mut listener: Arc<dyn EventListener> = Arc::new(NoopEventListener);
    if config.enable_metrics {
        rpc_metrics = Some(RpcMetrics::new(&registry)?);
        listener = Arc::new(MetricsEventListener::new(&registry)?);
    }

    let mut clients = HashMap::new();
    for (rollup_id, url) in config.rpc_urls()? {
        let client = EthersClient::connect(url.as_str())
            .await
            .with_context(|| format!("Could not connect to the rpc of rollup {rollup_id}"))?;
        let client: Arc<dyn EthClient> = match &rpc_metrics {
            Some(metrics) => Arc::new(InstrumentedClient::new(
                client,
                format!("rollup{rollup_id}"),
                metrics.clone(),
            )),
            None => Arc::new(client),
        };
        clients.insert(rollup_id, SafeClient::new(client, config.safeclient.clone()));
    }

    let consumer = Consumer::new(
        AmqpBroker::default(),
        config.near_da_indexer_rmq_ip_port_address.clone(),
        config.near_da_indexer_rollup_ids.iter().copied(),
        config.consumer.clone(),
    );

    let attestor = Attestor::new(
        config.attestor.clone(),
        clients,
        consumer,
        signer,
        listener,
    );
    let mut signed_roots = attestor
        .take_signed_roots()
        .context("Signed roots already taken")?;
    attestor.start().await.context("Could not start the attestor")?;

    let metrics_shutdown = config
        .enable_metrics
        .then(|| serve_metrics(config.metrics_address, registry));

    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("Failed to listen for the shutdown signal: {e}");
                }
                break;
            },
            signed = signed_roots.recv() => match signed {
                Some(signed) => info!(
                    "Signed state root {:?} of block {} of rollup {}",
                    signed.message.state_root,
                    signed.message.block_height,
                    signed.message.rollup_id
                ),
                None => break,
            },
        }
    }

    info!("Shutting down");
    attestor.close().await;
    if let Some(shutdown) = metrics_shutdown {
        let _ = shutdown.send(());
    }
    Ok(())
}

/// Serve the registry on `/metrics` until the returned sender fires.
fn serve_metrics(addr: SocketAddr, registry: Registry) -> oneshot::Sender<()> {
    let (tx, rx) = oneshot::channel();
    let app = Router::new()
        .route("/metrics", get(metrics))
        .with_state(registry);

    tokio::spawn(async move {
        info!("Serving metrics on {addr}");
        let server = axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = rx.await;
            });
        if let Err(err) = server.await {
            error!("Metrics server error: {}", err);
        }
    });

    tx
}

async fn metrics(State(registry): State<Registry>) -> (StatusCode, String) {
    match TextEncoder::new().encode_to_string(&registry.gather()) {
        Ok(metrics) => (StatusCode::OK, metrics),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}
