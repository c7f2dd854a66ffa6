//! Bluetooth radio backend for blemsg
//!
//! [`BleRadio`] implements the transport traits of `blemsg-core` over
//! classic Bluetooth RFCOMM, so a `SessionCoordinator` can drive a real
//! adapter.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blemsg_ble::{BleConfig, BleRadio};
//! use blemsg_core::{SessionConfig, SessionCoordinator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let radio = BleRadio::open(BleConfig::new().with_adapter("hci0")).await?;
//! let session = SessionCoordinator::new(Arc::new(radio), SessionConfig::default());
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux** with the `bluez` feature: BlueZ via the `bluer` crate.
//!   Paired devices come from the adapter's known devices, discovery from
//!   adapter events, and links from RFCOMM profiles registered under the
//!   service uuid. Secure mode requires authentication on the profile.
//! - **Everywhere else**: the radio opens but reports itself unavailable.

#[cfg(all(target_os = "linux", feature = "bluez"))]
mod bluez;
mod config;
mod error;
mod protocol;
mod radio;

// Public API exports
pub use config::BleConfig;
pub use error::BleError;
pub use protocol::normalize_address;
pub use radio::BleRadio;
