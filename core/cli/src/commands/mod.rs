pub mod init;
pub mod keys;
pub mod print_config;
pub mod run;
