use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::args::{Args, Command};
use crate::commands::{init, keys, print_config, run};

pub struct Cli {
    args: Args,
}

impl Cli {
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    pub async fn exec(self) -> Result<()> {
        self.setup();
        let config_path = self.args.config;
        match self.args.cmd {
            Command::Run => run::exec(&config_path).await,
            Command::Init { force } => init::exec(&config_path, force),
            Command::Keys(cmd) => keys::exec(cmd, &config_path),
            Command::PrintConfig { default } => print_config::exec(default, &config_path),
        }
    }

    fn setup(&self) {
        // Build the filter from cli args, or environment variable
        let env_filter = EnvFilter::builder()
            .with_default_directive(
                match self.args.verbose {
                    0 => LevelFilter::INFO,
                    1 => LevelFilter::DEBUG,
                    _2_or_more => LevelFilter::TRACE,
                }
                .into(),
            )
            .from_env_lossy();

        // Initialize the registry for logging events
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_file(true))
            .with(env_filter)
            .init();
    }
}
