use std::path::Path;

use anyhow::Result;

use crate::config::OperatorConfig;

pub fn exec(default: bool, config_path: &Path) -> Result<()> {
    let config = if default {
        OperatorConfig::default()
    } else {
        OperatorConfig::read(config_path)?
    };
    println!("{}", config.to_toml()?);
    Ok(())
}
