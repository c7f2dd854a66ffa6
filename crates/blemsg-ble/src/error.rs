//! Error types for the Bluetooth radio

use blemsg_core::TransportError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the Bluetooth radio
#[derive(Error, Debug)]
pub enum BleError {
    #[error("Bluetooth adapter not available: {0}")]
    AdapterNotAvailable(String),

    #[error("Bluetooth support not compiled in (enable the `bluez` feature)")]
    Unsupported,

    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Failed to register profile {service}: {reason}")]
    ProfileRegistration { service: String, reason: String },

    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Profile closed before a connection arrived")]
    ProfileClosed,

    #[error("Bluetooth I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(all(target_os = "linux", feature = "bluez"))]
    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),
}

impl From<BleError> for TransportError {
    fn from(err: BleError) -> Self {
        match err {
            BleError::AdapterNotAvailable(reason) => TransportError::Unavailable(reason),
            BleError::Unsupported => TransportError::Unavailable(BleError::Unsupported.to_string()),
            BleError::InvalidAddress(address) => TransportError::PeerNotFound { address },
            BleError::ProfileRegistration { service, .. } => TransportError::ServiceInUse { service },
            BleError::ConnectionFailed { address, .. } => TransportError::ConnectionRefused { address },
            BleError::ProfileClosed => TransportError::ListenerClosed,
            BleError::Io(e) => TransportError::Io(e),
            other => TransportError::Backend(other.to_string()),
        }
    }
}
