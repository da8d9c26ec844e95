use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::config::OperatorConfig;

pub fn exec(config_path: &Path, force: bool) -> Result<()> {
    OperatorConfig::default().write(config_path, force)?;
    info!("Wrote default configuration to {config_path:?}");
    info!("Set the broker address, rollup ids and rpc urls before running");
    Ok(())
}
