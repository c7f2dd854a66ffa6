//! Error handling for the blemsg CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bluetooth error: {0}")]
    Ble(#[from] blemsg_ble::BleError),

    #[error("Session error: {0}")]
    Session(#[from] blemsg_core::SessionError),

    #[error("Connection ended: {0}")]
    Disconnected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
