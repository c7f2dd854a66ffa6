//! Message exchange over an established connection
//!
//! There is no framing: one read is one message and one write is one
//! message. A message larger than the read buffer, or one the transport
//! delivers in several pieces, arrives as several messages. Bytes are decoded
//! as UTF-8, lossily, on both ends.

use std::io;

use tracing::{debug, warn};

use crate::connection::ConnectionHandle;
use crate::errors::SessionError;
use crate::result::OperationResult;
use crate::types::{ConnectionState, Message};

/// Reads and writes discrete [`Message`]s on a [`ConnectionHandle`]
#[derive(Debug, Clone)]
pub struct MessageChannel {
    read_buffer_size: usize,
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MessageChannel {
    pub fn new(read_buffer_size: usize) -> Self {
        Self {
            read_buffer_size: read_buffer_size.max(1),
        }
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// One blocking read, wrapped as a received message
    ///
    /// End of stream and I/O errors come back as `Failed`; the caller is
    /// expected to tear the session down.
    pub async fn read_next(&self, handle: &ConnectionHandle) -> OperationResult<Message> {
        let mut buffer = vec![0u8; self.read_buffer_size];
        match handle.read(&mut buffer).await {
            Ok(0) => {
                debug!("Peer {} closed the stream", handle.peer());
                OperationResult::failed(SessionError::ReadFailed {
                    reason: "end of stream".to_string(),
                    retryable: false,
                })
            }
            Ok(count) => {
                let text = String::from_utf8_lossy(&buffer[..count]).into_owned();
                debug!("Read {} bytes from {}", count, handle.peer());
                OperationResult::outcome(ConnectionState::Connected, Some(Message::received(text)))
            }
            Err(e) => {
                warn!("Read from {} failed: {}", handle.peer(), e);
                OperationResult::failed(SessionError::ReadFailed {
                    reason: e.to_string(),
                    retryable: is_transient(&e),
                })
            }
        }
    }

    /// Write `bytes` in one call and return the local echo record
    pub async fn write_message(&self, bytes: &[u8], handle: &ConnectionHandle) -> OperationResult<Message> {
        match handle.write_all(bytes).await {
            Ok(()) => {
                debug!("Wrote {} bytes to {}", bytes.len(), handle.peer());
                let text = String::from_utf8_lossy(bytes).into_owned();
                OperationResult::outcome(ConnectionState::Connected, Some(Message::sent(text)))
            }
            Err(e) => {
                warn!("Write to {} failed: {}", handle.peer(), e);
                OperationResult::failed(SessionError::WriteFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Close the underlying connection; failures become a `Failed` outcome
    pub async fn close(&self, handle: &ConnectionHandle) -> OperationResult<()> {
        match handle.close().await {
            Ok(()) => OperationResult::outcome(ConnectionState::Closed, None),
            Err(e) => OperationResult::failed(e),
        }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
