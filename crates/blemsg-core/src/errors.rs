//! Error types for the blemsg core
//!
//! [`TransportError`] is what radio backends report. The engines convert it
//! into [`SessionError`], which is what observers see inside an
//! [`OperationResult`](crate::OperationResult) outcome.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Session Errors
// ----------------------------------------------------------------------------

/// Failures reported by core operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("Failed to accept incoming connection: {reason}")]
    AcceptFailed { reason: String },

    #[error("Read failed: {reason}")]
    ReadFailed { reason: String, retryable: bool },

    #[error("Write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("Close failed: {reason}")]
    CloseFailed { reason: String },

    #[error("No connection is owned")]
    NotConnected,

    #[error("A connection is already owned or pending")]
    AlreadyConnected,

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },
}

impl SessionError {
    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::ReadFailed { retryable: true, .. })
    }
}

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Errors raised by radio backends
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Radio unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Connection refused by {address}")]
    ConnectionRefused { address: String },

    #[error("Peer not found: {address}")]
    PeerNotFound { address: String },

    #[error("Service already registered: {service}")]
    ServiceInUse { service: String },

    #[error("Listener closed")]
    ListenerClosed,

    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl TransportError {
    /// Whether the radio itself is off or inaccessible
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            TransportError::Unavailable(_) | TransportError::PermissionDenied(_)
        )
    }
}

/// Result type for radio backends
pub type TransportResult<T> = Result<T, TransportError>;
