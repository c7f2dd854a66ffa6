//! blemsg CLI library
//!
//! Terminal front end for the blemsg session core: scanning for peers,
//! connecting as client or server, and chatting line by line.

pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod render;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::AppConfig;
pub use error::{CliError, Result};
