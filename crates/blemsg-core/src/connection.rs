//! Connection establishment and the owned connection handle

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::discovery::DiscoveryEngine;
use crate::errors::SessionError;
use crate::protocol::ServiceRecord;
use crate::result::OperationResult;
use crate::transport::{Link, LinkAcceptor, LinkConnector, TransportLink};
use crate::types::{ConnectionState, DeviceOrigin, PeerDevice, Timestamp};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

// ----------------------------------------------------------------------------
// Connection Handle
// ----------------------------------------------------------------------------

/// Which side initiated the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Client,
    Server,
}

/// Exclusive ownership of one live transport connection
///
/// The two stream directions are locked independently so a pending read
/// never blocks a write. Closing wakes any pending read or write.
pub struct ConnectionHandle {
    id: u64,
    peer: PeerDevice,
    service: ServiceRecord,
    role: ConnectionRole,
    established_at: Timestamp,
    reader: Mutex<ReadHalf<Box<dyn Link>>>,
    writer: Mutex<WriteHalf<Box<dyn Link>>>,
    closing: AtomicBool,
    closed: CancellationToken,
}

impl ConnectionHandle {
    pub(crate) fn new(
        peer: PeerDevice,
        service: ServiceRecord,
        role: ConnectionRole,
        stream: Box<dyn Link>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            service,
            role,
            established_at: Timestamp::now(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    /// Process-unique handle id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &PeerDevice {
        &self.peer
    }

    pub fn service(&self) -> &ServiceRecord {
        &self.service
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn established_at(&self) -> Timestamp {
        self.established_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// One read of up to `buf.len()` bytes; 0 means end of stream
    pub(crate) async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            read = reader.read(buf) => read,
        }
    }

    /// Write every byte and flush
    pub(crate) async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let mut writer = self.writer.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            written = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => written,
        }
    }

    /// Close the connection; fails only if it was already closed
    pub(crate) async fn close(&self) -> Result<(), SessionError> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Err(SessionError::CloseFailed {
                reason: "connection already closed".to_string(),
            });
        }
        self.closed.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of connection {} reported: {}", self.id, e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("service", &self.service.socket_type())
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

// ----------------------------------------------------------------------------
// Connection Engine
// ----------------------------------------------------------------------------

/// Establishes connections in client or server role
///
/// Each call returns exactly one terminal result and never retries. No
/// timeout is imposed here; callers race the call against a timer if needed.
pub struct ConnectionEngine {
    connector: Arc<dyn LinkConnector>,
    acceptor: Arc<dyn LinkAcceptor>,
    discovery: Arc<DiscoveryEngine>,
}

impl ConnectionEngine {
    pub fn new(
        connector: Arc<dyn LinkConnector>,
        acceptor: Arc<dyn LinkAcceptor>,
        discovery: Arc<DiscoveryEngine>,
    ) -> Self {
        Self {
            connector,
            acceptor,
            discovery,
        }
    }

    /// Client role: connect to `peer` under the service for `secure`
    pub async fn initiate_connection(
        &self,
        peer: &PeerDevice,
        secure: bool,
    ) -> OperationResult<ConnectionHandle> {
        // Radios refuse or slow down connections while scanning
        self.discovery.stop_scan().await;

        let service = ServiceRecord::for_mode(secure);
        info!(
            "Connecting to {} using {} socket",
            peer,
            service.socket_type()
        );

        match self.connector.connect(peer.address(), &service).await {
            Ok(link) => {
                let handle =
                    ConnectionHandle::new(peer.clone(), service, ConnectionRole::Client, link.stream);
                info!("Connected to {} (handle {})", peer, handle.id());
                OperationResult::outcome(ConnectionState::Connected, Some(handle))
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", peer, e);
                let error = if e.is_unavailable() {
                    SessionError::TransportUnavailable {
                        reason: e.to_string(),
                    }
                } else {
                    SessionError::ConnectFailed {
                        address: peer.address().to_string(),
                        reason: e.to_string(),
                    }
                };
                OperationResult::failed(error)
            }
        }
    }

    /// Server role: listen under the service for `secure` and accept one peer
    pub async fn listen_and_accept(&self, secure: bool) -> OperationResult<ConnectionHandle> {
        self.discovery.stop_scan().await;

        let service = ServiceRecord::for_mode(secure);
        let listener = match self.acceptor.listen(&service).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to listen on {}: {}", service, e);
                return OperationResult::failed(SessionError::AcceptFailed {
                    reason: e.to_string(),
                });
            }
        };
        info!("Listening on {} for one incoming connection", service);

        match listener.accept().await {
            Ok(TransportLink { remote, stream }) => {
                let address = remote.address.unwrap_or_default();
                let peer = match PeerDevice::new(
                    address,
                    remote.name.unwrap_or_default(),
                    DeviceOrigin::Scanned,
                ) {
                    Ok(peer) => peer,
                    Err(_) => {
                        warn!("Accepted connection from a peer without address");
                        return OperationResult::failed(SessionError::AcceptFailed {
                            reason: "peer address unavailable".to_string(),
                        });
                    }
                };
                let handle = ConnectionHandle::new(peer, service, ConnectionRole::Server, stream);
                info!("Accepted connection from {} (handle {})", handle.peer(), handle.id());
                OperationResult::outcome(ConnectionState::Connected, Some(handle))
            }
            Err(e) => {
                error!("Failed to accept on {}: {}", service, e);
                OperationResult::failed(SessionError::AcceptFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Close `handle`; an already-closed handle yields a non-fatal `CloseFailed`
    pub async fn close(&self, handle: &ConnectionHandle) -> OperationResult<()> {
        match handle.close().await {
            Ok(()) => {
                info!("Closed connection to {}", handle.peer());
                OperationResult::outcome(ConnectionState::Closed, None)
            }
            Err(e) => {
                debug!("Close of handle {} ignored: {}", handle.id(), e);
                OperationResult::failed(e)
            }
        }
    }
}
