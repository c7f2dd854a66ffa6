//! blemsg CLI Configuration Management
//!
//! Configuration is layered with priority CLI args > env vars > config
//! file > defaults. The file is TOML with `[session]`, `[ble]` and `[cli]`
//! tables; environment overrides use the `BLEMSG_` prefix.

use std::path::Path;

use serde::{Deserialize, Serialize};

use blemsg_ble::BleConfig;
use blemsg_core::SessionConfig;

use crate::cli::Cli;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "BLEMSG_";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the blemsg CLI
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Session coordinator configuration
    pub session: SessionConfig,
    /// Bluetooth adapter configuration
    pub ble: BleConfig,
    /// Terminal presentation
    pub cli: CliConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Prompt shown in chat mode
    pub prompt: String,
    /// Prefix chat lines with their timestamp
    pub show_timestamps: bool,
    /// Default scan duration when `--duration` is not given
    pub scan_duration_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            prompt: "> ".to_string(),
            show_timestamps: false,
            scan_duration_secs: 12,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load every layer for the given command line
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::FileSystem(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Loading(e.to_string()))
    }

    /// Apply `BLEMSG_*` overrides looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(adapter) = var("ADAPTER") {
            self.ble.adapter = Some(adapter);
        }
        if let Some(secure) = var("SECURE") {
            self.ble.secure = parse_env("SECURE", &secure)?;
        }
        if let Some(size) = var("READ_BUFFER_SIZE") {
            self.session.read_buffer_size = parse_env("READ_BUFFER_SIZE", &size)?;
        }
        if let Some(ms) = var("SCAN_TIMEOUT_MS") {
            self.session.scan_timeout_ms = Some(parse_env("SCAN_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = var("CONNECT_TIMEOUT_MS") {
            self.session.connect_timeout_ms = Some(parse_env("CONNECT_TIMEOUT_MS", &ms)?);
        }
        if let Some(prompt) = var("PROMPT") {
            self.cli.prompt = prompt;
        }
        Ok(())
    }

    /// Apply command line flags
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(adapter) = &cli.adapter {
            self.ble.adapter = Some(adapter.clone());
        }
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.read_buffer_size == 0 {
            return Err(ConfigError::Validation(
                "Read buffer size must be greater than 0".to_string(),
            ));
        }
        if self.session.event_buffer_size == 0 {
            return Err(ConfigError::Validation(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }
        if let Some(adapter) = &self.ble.adapter {
            if adapter.trim().is_empty() {
                return Err(ConfigError::Validation("Adapter name must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::Environment(format!("{}{} has an invalid value: {}", ENV_PREFIX, name, value))
    })
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("File system error: {0}")]
    FileSystem(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use blemsg_core::ReceivePolicy;
    use clap::Parser;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.read_buffer_size, 1024);
        assert_eq!(config.cli.scan_duration_secs, 12);
    }

    #[test]
    fn test_toml_tables() {
        let config = AppConfig::from_toml(
            r#"
            [session]
            read_buffer_size = 512
            receive_policy = { mode = "retry_with_cooldown", cooldown_ms = 1000, max_consecutive_failures = 3 }

            [ble]
            adapter = "hci1"

            [cli]
            show_timestamps = true
            "#,
        )
        .unwrap();
        assert_eq!(config.session.read_buffer_size, 512);
        assert_eq!(
            config.session.receive_policy,
            ReceivePolicy::RetryWithCooldown {
                cooldown_ms: 1000,
                max_consecutive_failures: 3
            }
        );
        assert_eq!(config.ble.adapter.as_deref(), Some("hci1"));
        assert!(config.cli.show_timestamps);
        assert_eq!(config.cli.prompt, "> ");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = AppConfig::from_toml("[ble]\nadapter = \"hci1\"\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("BLEMSG_ADAPTER", "hci2"),
            ("BLEMSG_SECURE", "false"),
            ("BLEMSG_CONNECT_TIMEOUT_MS", "3000"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.ble.adapter.as_deref(), Some("hci2"));
        assert!(!config.ble.secure);
        assert_eq!(config.session.connect_timeout_ms, Some(3000));
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|key| (key == "BLEMSG_READ_BUFFER_SIZE").then(|| "lots".to_string()));
        assert!(matches!(result, Err(ConfigError::Environment(_))));
    }

    #[test]
    fn test_flags_override_everything() {
        let cli = Cli::try_parse_from(["blemsg", "--adapter", "hci3", "demo"]).unwrap();
        let mut config = AppConfig::default();
        config
            .apply_env(|key| (key == "BLEMSG_ADAPTER").then(|| "hci2".to_string()))
            .unwrap();
        config.apply_cli(&cli);
        assert_eq!(config.ble.adapter.as_deref(), Some("hci3"));
    }

    #[test]
    fn test_example_config_round_trips() {
        let example = AppConfig::example_config();
        assert!(example.contains("[session]"));
        assert!(example.contains("[ble]"));
        assert_eq!(AppConfig::from_toml(&example).unwrap(), AppConfig::default());
    }
}
