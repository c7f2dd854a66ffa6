//! Bluetooth adapter configuration

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the Bluetooth radio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Adapter to use, e.g. `hci0`; the system default when unset
    pub adapter: Option<String>,
    /// Make the adapter discoverable while the radio is open
    pub discoverable: bool,
    /// Power the adapter on when opening the radio
    pub power_on: bool,
    /// Connect and listen in secure (authenticated) mode unless told otherwise
    pub secure: bool,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            discoverable: true,
            power_on: true,
            secure: true,
        }
    }
}

impl BleConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the named adapter instead of the default one
    pub fn with_adapter(mut self, name: impl Into<String>) -> Self {
        self.adapter = Some(name.into());
        self
    }

    /// Enable or disable discoverability
    pub fn with_discoverable(mut self, discoverable: bool) -> Self {
        self.discoverable = discoverable;
        self
    }

    /// Enable or disable powering on the adapter
    pub fn with_power_on(mut self, power_on: bool) -> Self {
        self.power_on = power_on;
        self
    }

    /// Set the default connection mode
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BleConfig::default();
        assert!(config.adapter.is_none());
        assert!(config.discoverable);
        assert!(config.secure);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: BleConfig = toml::from_str("adapter = \"hci1\"\nsecure = false\n").unwrap();
        assert_eq!(config.adapter.as_deref(), Some("hci1"));
        assert!(!config.secure);
        assert!(config.power_on);
    }
}
