use std::collections::BTreeMap;
use std::fs::read_to_string;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sffl_attestor::AttestorConfig;
use sffl_consumer::ConsumerConfig;
use sffl_safeclient::SafeClientConfig;
use sffl_types::RollupId;

use crate::utils::ensure_parent_exist;

/// Configuration of the operator node.
///
/// The broker address, the rollup ids and the rpc urls have no usable defaults and must be set
/// before the config can be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Address of the broker the data availability indexer publishes to.
    pub near_da_indexer_rmq_ip_port_address: String,
    /// Rollups whose queues are consumed.
    pub near_da_indexer_rollup_ids: Vec<RollupId>,
    pub enable_metrics: bool,
    /// Where prometheus metrics are served when enabled.
    pub metrics_address: SocketAddr,
    pub bls_private_key_path: PathBuf,
    pub ecdsa_private_key_path: PathBuf,
    /// Websocket RPC endpoint of every rollup to attest to, keyed by rollup id.
    pub rollup_ids_to_rpc_urls: BTreeMap<String, String>,
    pub safeclient: SafeClientConfig,
    pub consumer: ConsumerConfig,
    pub attestor: AttestorConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            near_da_indexer_rmq_ip_port_address: String::new(),
            near_da_indexer_rollup_ids: Vec::new(),
            enable_metrics: false,
            metrics_address: ([127, 0, 0, 1], 9090).into(),
            bls_private_key_path: "keys/bls.pem".into(),
            ecdsa_private_key_path: "keys/ecdsa.hex".into(),
            rollup_ids_to_rpc_urls: BTreeMap::new(),
            safeclient: SafeClientConfig::default(),
            consumer: ConsumerConfig::default(),
            attestor: AttestorConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Read and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the config at `path` without requiring the options needed to run.
    pub fn read(path: &Path) -> Result<Self> {
        let raw = read_to_string(path)
            .with_context(|| format!("Failed to read config file {path:?}"))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse config file {path:?}"))
    }

    /// Check that every required option is set.
    pub fn validate(&self) -> Result<()> {
        self.rpc_urls()?;
        if self.rollup_ids_to_rpc_urls.is_empty() {
            bail!("No rollup rpc urls configured in rollup_ids_to_rpc_urls");
        }
        if self.near_da_indexer_rollup_ids.is_empty() {
            bail!("No rollup ids configured in near_da_indexer_rollup_ids");
        }
        if self.near_da_indexer_rmq_ip_port_address.trim().is_empty() {
            bail!("Missing broker address near_da_indexer_rmq_ip_port_address");
        }
        Ok(())
    }

    /// Write the config to `path`, failing if a file is already there unless `force` is set.
    pub fn write(&self, path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            bail!("Config file {path:?} already exists");
        }
        ensure_parent_exist(path)?;
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file {path:?}"))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// The rpc urls keyed by parsed rollup id.
    pub fn rpc_urls(&self) -> Result<BTreeMap<RollupId, String>> {
        self.rollup_ids_to_rpc_urls
            .iter()
            .map(|(rollup_id, url)| {
                let rollup_id = rollup_id
                    .parse()
                    .with_context(|| format!("Invalid rollup id {rollup_id:?}"))?;
                Ok((rollup_id, url.clone()))
            })
            .collect()
    }
}
