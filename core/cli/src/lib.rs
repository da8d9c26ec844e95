pub mod args;
pub mod cli;
pub mod commands;
pub mod config;
pub mod keystore;
pub mod utils;

pub static VERSION: &str = env!("CARGO_PKG_VERSION");
