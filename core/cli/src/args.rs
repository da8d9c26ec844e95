use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(about, name = "sffl-operator", version = crate::VERSION)]
pub struct Args {
    /// Path to the toml configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: PathBuf,
    /// Increases the level of verbosity (the max level is -vvv).
    #[arg(short, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the operator: attest to the state roots of the configured rollups.
    Run,
    /// Write the default configuration to the config path.
    Init {
        /// Whether to overwrite an existing configuration file.
        #[arg(short, long)]
        force: bool,
    },
    /// Key management utilities.
    #[command(subcommand)]
    Keys(KeySubCmd),
    /// Print the loaded configuration.
    PrintConfig {
        /// Print the default configuration instead of loading the current one.
        #[arg(short, long)]
        default: bool,
    },
}

#[derive(Subcommand, PartialEq, Eq)]
pub enum KeySubCmd {
    /// Print the operator id and public keys.
    Show,
    /// Generate new private keys.
    /// This command will fail if the keys already exist.
    Generate,
}
