//! Core value types shared by every blemsg component
//!
//! Peers are identified solely by their transport address; names and origin
//! are mutable metadata that the registry overwrites on rediscovery.

use core::fmt;
use core::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Milliseconds since Unix epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Peer Device
// ----------------------------------------------------------------------------

/// How a peer became known to this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceOrigin {
    /// Bonded before the current session started
    Paired,
    /// Observed by an active scan
    Scanned,
}

/// Identity of a remote endpoint
///
/// Equality and hashing use the address only: two values with the same
/// address describe the same peer whatever their names say.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDevice {
    address: String,
    name: String,
    origin: DeviceOrigin,
}

impl PeerDevice {
    /// Label shown for peers that never reported a name
    pub const UNKNOWN_NAME: &'static str = "Unknown device";

    /// Create a peer, rejecting blank addresses
    pub fn new(
        address: impl Into<String>,
        name: impl Into<String>,
        origin: DeviceOrigin,
    ) -> Result<Self, SessionError> {
        let address = address.into().trim().to_string();
        if address.is_empty() {
            return Err(SessionError::InvalidInput {
                reason: "peer address must not be empty".to_string(),
            });
        }
        Ok(Self {
            address,
            name: name.into(),
            origin,
        })
    }

    /// Stable unique identifier of the peer
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Reported name, possibly empty
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name for display, falling back to [`Self::UNKNOWN_NAME`]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            Self::UNKNOWN_NAME
        } else {
            &self.name
        }
    }

    pub fn origin(&self) -> DeviceOrigin {
        self.origin
    }

    /// Copy of this peer tagged with a different origin
    pub fn with_origin(mut self, origin: DeviceOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Copy of this peer with a different name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl PartialEq for PeerDevice {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for PeerDevice {}

impl Hash for PeerDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for PeerDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)
    }
}

// ----------------------------------------------------------------------------
// State Enums
// ----------------------------------------------------------------------------

/// State of the single active connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    None,
    Initializing,
    Connected,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::None => "None",
            ConnectionState::Initializing => "Initializing",
            ConnectionState::Connected => "Connected",
            ConnectionState::Closed => "Closed",
            ConnectionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Whether an asynchronous operation is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProgressState {
    #[default]
    Idle,
    Loading,
}

/// Phase of the session coordinator's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionPhase {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    /// Connected with the receive loop running
    Receiving,
    Closed,
    /// Transient; always resolves to `Idle` or `Closed`
    Error,
}

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// Direction of a message relative to this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageDirection {
    Sent,
    Received,
}

/// A unit of communicated text, immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub timestamp: Timestamp,
    pub direction: MessageDirection,
}

impl Message {
    /// Record of text written to the peer, stamped now
    pub fn sent(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Timestamp::now(),
            direction: MessageDirection::Sent,
        }
    }

    /// Record of text read from the peer, stamped now
    pub fn received(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Timestamp::now(),
            direction: MessageDirection::Received,
        }
    }
}
