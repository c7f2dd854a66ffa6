//! blemsg core
//!
//! Transport-agnostic discovery, connection and messaging for a single
//! peer-to-peer link. Radios plug in through the capability traits in
//! [`transport`]; the [`SessionCoordinator`] drives them and publishes
//! observable state for a UI collaborator.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod errors;
pub mod memory;
pub mod protocol;
pub mod registry;
pub mod result;
pub mod session;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::MessageChannel;
pub use config::{ReceivePolicy, SessionConfig};
pub use connection::{ConnectionEngine, ConnectionHandle, ConnectionRole};
pub use discovery::{DiscoveryEngine, ScanStream};
pub use errors::{SessionError, TransportError, TransportResult};
pub use memory::{MemoryAir, MemoryRadio};
pub use protocol::ServiceRecord;
pub use registry::DeviceRegistry;
pub use result::OperationResult;
pub use session::{OperationStream, SessionCoordinator, SessionEvent};
pub use transport::{
    DiscoveredDevice, Link, LinkAcceptor, LinkConnector, LinkListener, PeerScanner, Radio,
    TransportLink,
};
pub use types::{
    ConnectionState, DeviceOrigin, Message, MessageDirection, PeerDevice, ProgressState,
    SessionPhase, Timestamp,
};
