//! Radio capability traits
//!
//! The engines never talk to a concrete radio. Backends (the in-memory radio,
//! the BlueZ radio in `blemsg-ble`, a test double) implement these traits and
//! are handed to the engines as trait objects.

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::errors::TransportResult;
use crate::protocol::ServiceRecord;

// ----------------------------------------------------------------------------
// Transport Data
// ----------------------------------------------------------------------------

/// A raw discovery report straight from the radio
///
/// Radios are noisy: the address may be missing, in which case the
/// discovery engine drops the report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: Option<String>,
    pub name: Option<String>,
}

impl DiscoveredDevice {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: Some(address.into()),
            name,
        }
    }
}

/// A duplex byte stream to a peer
pub trait Link: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Link for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// An established transport connection and who is on the other end
pub struct TransportLink {
    pub remote: DiscoveredDevice,
    pub stream: Box<dyn Link>,
}

impl TransportLink {
    pub fn new(remote: DiscoveredDevice, stream: impl Link + 'static) -> Self {
        Self {
            remote,
            stream: Box::new(stream),
        }
    }
}

impl fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLink")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Capability Traits
// ----------------------------------------------------------------------------

/// Enumerates bonded peers and scans for new ones
#[async_trait]
pub trait PeerScanner: Send + Sync {
    /// Every peer bonded with this radio
    async fn paired_devices(&self) -> TransportResult<Vec<DiscoveredDevice>>;

    /// Begin an active scan; reports arrive on the returned channel until the
    /// scan is cancelled or the radio ends it
    async fn start_discovery(&self) -> TransportResult<mpsc::Receiver<DiscoveredDevice>>;

    /// Stop any active scan and release its listener; idempotent
    async fn cancel_discovery(&self) -> TransportResult<()>;
}

/// Opens client-role connections
#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Connect to `address` under `service`, blocking until the link is up
    async fn connect(&self, address: &str, service: &ServiceRecord) -> TransportResult<TransportLink>;
}

/// A listening endpoint good for exactly one accept
#[async_trait]
pub trait LinkListener: Send {
    async fn accept(self: Box<Self>) -> TransportResult<TransportLink>;
}

/// Opens server-role listening endpoints
#[async_trait]
pub trait LinkAcceptor: Send + Sync {
    async fn listen(&self, service: &ServiceRecord) -> TransportResult<Box<dyn LinkListener>>;
}

/// A radio offering every capability the core needs
pub trait Radio: PeerScanner + LinkConnector + LinkAcceptor {}

impl<T> Radio for T where T: PeerScanner + LinkConnector + LinkAcceptor {}
