//! Session coordination
//!
//! [`SessionCoordinator`] owns the device registry, the single connection
//! slot and the message log, and drives the engines on behalf of a UI
//! collaborator. Commands return streams of [`OperationResult`]s framed by
//! `Loading`/`Idle` progress markers; state is published through `watch`
//! channels and discrete happenings through a `broadcast` of
//! [`SessionEvent`]s.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::channel::MessageChannel;
use crate::config::{ReceivePolicy, SessionConfig};
use crate::connection::{ConnectionEngine, ConnectionHandle};
use crate::discovery::{DiscoveryEngine, ScanStream};
use crate::errors::SessionError;
use crate::registry::DeviceRegistry;
use crate::result::OperationResult;
use crate::transport::{LinkAcceptor, LinkConnector, PeerScanner, Radio};
use crate::types::{
    ConnectionState, DeviceOrigin, Message, PeerDevice, ProgressState, SessionPhase,
};

/// Stream returned by every coordinator command
pub type OperationStream<T> = BoxStream<'static, OperationResult<T>>;

// ----------------------------------------------------------------------------
// Session Events
// ----------------------------------------------------------------------------

/// Discrete notifications published by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A scan reported a peer
    DeviceDiscovered(PeerDevice),
    ConnectionStateChanged(ConnectionState),
    MessageReceived(Message),
    MessageSent(Message),
    /// A scan ended; `discovered` counts peers reported by the scan itself
    ScanFinished { discovered: usize },
}

// ----------------------------------------------------------------------------
// Session Coordinator
// ----------------------------------------------------------------------------

/// Orchestrates discovery, connection and messaging for one local radio
///
/// Cloning is cheap; all clones share the same session.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    discovery: Arc<DiscoveryEngine>,
    connections: ConnectionEngine,
    channel: MessageChannel,
    registry: Mutex<DeviceRegistry>,
    slot: Mutex<Option<Arc<ConnectionHandle>>>,
    pending: AtomicBool,
    receiver_for: AtomicU64,
    scan_generation: AtomicU64,
    in_flight: StdMutex<usize>,
    connection_tx: watch::Sender<ConnectionState>,
    progress_tx: watch::Sender<ProgressState>,
    phase_tx: watch::Sender<SessionPhase>,
    peers_tx: watch::Sender<Vec<PeerDevice>>,
    messages_tx: watch::Sender<Vec<Message>>,
    peer_tx: watch::Sender<Option<PeerDevice>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionCoordinator {
    /// Coordinator over a radio offering every capability
    pub fn new<R: Radio + 'static>(radio: Arc<R>, config: SessionConfig) -> Self {
        Self::from_parts(radio.clone(), radio.clone(), radio, config)
    }

    /// Coordinator over separately provided capabilities
    pub fn from_parts(
        scanner: Arc<dyn PeerScanner>,
        connector: Arc<dyn LinkConnector>,
        acceptor: Arc<dyn LinkAcceptor>,
        config: SessionConfig,
    ) -> Self {
        let buffer_size = config.event_buffer_size.max(1);
        let discovery = Arc::new(
            DiscoveryEngine::new(scanner)
                .with_scan_timeout(config.scan_timeout())
                .with_buffer_size(buffer_size),
        );
        let connections = ConnectionEngine::new(connector, acceptor, discovery.clone());
        let channel = MessageChannel::new(config.read_buffer_size);

        let inner = Inner {
            discovery,
            connections,
            channel,
            registry: Mutex::new(DeviceRegistry::new()),
            slot: Mutex::new(None),
            pending: AtomicBool::new(false),
            receiver_for: AtomicU64::new(0),
            scan_generation: AtomicU64::new(0),
            in_flight: StdMutex::new(0),
            connection_tx: watch::channel(ConnectionState::None).0,
            progress_tx: watch::channel(ProgressState::Idle).0,
            phase_tx: watch::channel(SessionPhase::Idle).0,
            peers_tx: watch::channel(Vec::new()).0,
            messages_tx: watch::channel(Vec::new()).0,
            peer_tx: watch::channel(None).0,
            events: broadcast::channel(buffer_size).0,
            config,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Paired peers first, then every peer the scan reports
    ///
    /// Each data outcome carries the full accumulated peer list. The scan
    /// runs until [`Self::stop_scan`], a connect, the configured time limit,
    /// or the stream being dropped.
    pub fn scan(&self) -> OperationStream<Vec<PeerDevice>> {
        let run = ScanRun {
            inner: self.inner.clone(),
            step: ScanStep::Start,
            generation: 0,
            discovered: 0,
            progress: Some(ProgressGuard::acquire(self.inner.clone())),
        };
        stream::unfold(run, |mut run| async move {
            let item = run.advance().await?;
            Some((item, run))
        })
        .boxed()
    }

    /// Stop any scan in progress; safe to call at any time
    pub async fn stop_scan(&self) {
        self.inner.discovery.stop_scan().await;
    }

    /// Connect to `address` in client role
    ///
    /// The attempt runs to completion even if the returned stream is dropped.
    pub fn connect_as_client(&self, address: &str, secure: bool) -> OperationStream<ConnectionState> {
        let inner = self.inner.clone();
        let address = address.trim().to_string();
        tracked(&self.inner, async move {
            if address.is_empty() {
                return OperationResult::rejected(
                    inner.current_state(),
                    SessionError::InvalidInput {
                        reason: "peer address must not be empty".to_string(),
                    },
                );
            }
            inner.spawn_attempt(Attempt::Client { address, secure }).await
        })
    }

    /// Listen under the service for `secure` and accept one peer
    pub fn connect_as_server(&self, secure: bool) -> OperationStream<ConnectionState> {
        let inner = self.inner.clone();
        tracked(&self.inner, async move {
            inner.spawn_attempt(Attempt::Server { secure }).await
        })
    }

    /// Write `text` to the connected peer and log it
    pub fn send(&self, text: &str) -> OperationStream<ConnectionState> {
        let inner = self.inner.clone();
        let text = text.to_string();
        tracked(&self.inner, async move { inner.send(text).await })
    }

    /// Start the receive loop on the owned connection
    ///
    /// Returns false if nothing is connected or the loop already runs.
    pub async fn start_receiving(&self) -> bool {
        let handle = self.inner.slot.lock().await.clone();
        match handle {
            Some(handle) => self.inner.spawn_receiver(handle),
            None => false,
        }
    }

    /// Close the owned connection, if any; idempotent
    ///
    /// The message log is kept until the next connection is established.
    pub async fn disconnect(&self) -> OperationResult<ConnectionState> {
        self.inner.disconnect().await
    }

    /// Empty the message log
    pub fn clear_messages(&self) {
        self.inner.messages_tx.send_replace(Vec::new());
    }

    // ------------------------------------------------------------------------
    // Observable State
    // ------------------------------------------------------------------------

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    pub fn progress(&self) -> ProgressState {
        *self.inner.progress_tx.borrow()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase_tx.borrow()
    }

    /// Known peers in registry order
    pub fn peers(&self) -> Vec<PeerDevice> {
        self.inner.peers_tx.borrow().clone()
    }

    /// Message log in completion order
    pub fn messages(&self) -> Vec<Message> {
        self.inner.messages_tx.borrow().clone()
    }

    /// Peer on the other end of the owned connection
    pub fn connected_peer(&self) -> Option<PeerDevice> {
        self.inner.peer_tx.borrow().clone()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_tx.subscribe()
    }

    pub fn watch_progress(&self) -> watch::Receiver<ProgressState> {
        self.inner.progress_tx.subscribe()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase_tx.subscribe()
    }

    pub fn watch_peers(&self) -> watch::Receiver<Vec<PeerDevice>> {
        self.inner.peers_tx.subscribe()
    }

    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.inner.messages_tx.subscribe()
    }

    /// Subscribe to discrete session events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("state", &self.connection_state())
            .field("phase", &self.phase())
            .field("peer", &self.connected_peer())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Progress Tracking
// ----------------------------------------------------------------------------

/// Counts one in-flight operation; `Loading` while any guard is alive
struct ProgressGuard {
    inner: Arc<Inner>,
}

impl ProgressGuard {
    fn acquire(inner: Arc<Inner>) -> Self {
        {
            let mut count = inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            *count += 1;
            if *count == 1 {
                inner.progress_tx.send_replace(ProgressState::Loading);
            }
        }
        Self { inner }
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        let mut count = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.inner.progress_tx.send_replace(ProgressState::Idle);
        }
    }
}

/// `Loading`, the outcome of `operation`, then `Idle`
fn tracked<T, F>(inner: &Arc<Inner>, operation: F) -> OperationStream<T>
where
    T: Send + 'static,
    F: Future<Output = OperationResult<T>> + Send + 'static,
{
    let guard = ProgressGuard::acquire(inner.clone());
    stream::once(async { OperationResult::Status(ProgressState::Loading) })
        .chain(stream::once(operation))
        .chain(stream::once(async move {
            drop(guard);
            OperationResult::Status(ProgressState::Idle)
        }))
        .boxed()
}

// ----------------------------------------------------------------------------
// Scan
// ----------------------------------------------------------------------------

enum ScanStep {
    Start,
    Paired,
    Scanning(ScanStream),
    Finish,
    Done,
}

struct ScanRun {
    inner: Arc<Inner>,
    step: ScanStep,
    /// Zero until the run starts; only the newest run owns the phase
    generation: u64,
    discovered: usize,
    progress: Option<ProgressGuard>,
}

impl ScanRun {
    async fn advance(&mut self) -> Option<OperationResult<Vec<PeerDevice>>> {
        loop {
            match std::mem::replace(&mut self.step, ScanStep::Done) {
                ScanStep::Start => {
                    self.step = ScanStep::Paired;
                    return Some(OperationResult::Status(ProgressState::Loading));
                }
                ScanStep::Paired => {
                    self.generation = self.inner.scan_generation.fetch_add(1, Ordering::AcqRel) + 1;
                    self.inner.registry.lock().await.clear();
                    self.inner.peers_tx.send_replace(Vec::new());
                    self.inner.enter_phase_from_rest(SessionPhase::Scanning);

                    let paired = self.inner.discovery.paired_devices().await;
                    let state = self.inner.current_state();
                    if let Some(error) = paired.error().cloned() {
                        self.step = ScanStep::Finish;
                        return Some(OperationResult::rejected(state, error));
                    }

                    let list = {
                        let mut registry = self.inner.registry.lock().await;
                        for peer in paired.into_data().unwrap_or_default() {
                            registry.upsert(peer);
                        }
                        registry.list().to_vec()
                    };
                    self.inner.peers_tx.send_replace(list.clone());
                    info!("Scan starting with {} paired peers", list.len());

                    self.step = ScanStep::Scanning(self.inner.discovery.start_scan().await);
                    return Some(OperationResult::outcome(state, Some(list)));
                }
                ScanStep::Scanning(mut scan) => match scan.next().await {
                    Some(Ok(peer)) => {
                        self.discovered += 1;
                        let list = self.inner.merge_scanned(peer).await;
                        self.step = ScanStep::Scanning(scan);
                        return Some(OperationResult::outcome(
                            self.inner.current_state(),
                            Some(list),
                        ));
                    }
                    Some(Err(error)) => {
                        self.step = ScanStep::Finish;
                        return Some(OperationResult::rejected(self.inner.current_state(), error));
                    }
                    None => self.step = ScanStep::Finish,
                },
                ScanStep::Finish => {
                    self.progress.take();
                    if self.is_current() {
                        self.inner.leave_phase(SessionPhase::Scanning);
                        self.inner.emit(SessionEvent::ScanFinished {
                            discovered: self.discovered,
                        });
                        info!("Scan finished after {} discoveries", self.discovered);
                    } else {
                        debug!("Scan superseded after {} discoveries", self.discovered);
                    }
                    return Some(OperationResult::Status(ProgressState::Idle));
                }
                ScanStep::Done => return None,
            }
        }
    }

    /// Whether no later scan has started since this one
    fn is_current(&self) -> bool {
        self.generation != 0 && self.inner.scan_generation.load(Ordering::Acquire) == self.generation
    }
}

impl Drop for ScanRun {
    fn drop(&mut self) {
        if !matches!(self.step, ScanStep::Done) && self.is_current() {
            self.inner.leave_phase(SessionPhase::Scanning);
        }
    }
}

// ----------------------------------------------------------------------------
// Connection Lifecycle
// ----------------------------------------------------------------------------

enum Attempt {
    Client { address: String, secure: bool },
    Server { secure: bool },
}

impl Attempt {
    fn failure(&self, reason: impl Into<String>) -> SessionError {
        match self {
            Attempt::Client { address, .. } => SessionError::ConnectFailed {
                address: address.clone(),
                reason: reason.into(),
            },
            Attempt::Server { .. } => SessionError::AcceptFailed {
                reason: reason.into(),
            },
        }
    }
}

/// Clears the pending-attempt flag when the attempt ends
struct PendingAttempt<'a>(&'a AtomicBool);

impl Drop for PendingAttempt<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Inner {
    fn current_state(&self) -> ConnectionState {
        *self.connection_tx.borrow()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_connection_state(&self, state: ConnectionState) {
        let previous = self.connection_tx.send_replace(state);
        if previous != state {
            debug!("Connection state {} -> {}", previous, state);
            self.emit(SessionEvent::ConnectionStateChanged(state));
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase_tx.send_replace(phase);
    }

    /// Move to `phase` only if no connection work is under way
    fn enter_phase_from_rest(&self, phase: SessionPhase) {
        self.phase_tx.send_if_modified(|current| {
            let at_rest = matches!(
                current,
                SessionPhase::Idle | SessionPhase::Closed | SessionPhase::Error
            );
            if at_rest {
                *current = phase;
            }
            at_rest
        });
    }

    /// Return to `Idle` if still in `phase`
    fn leave_phase(&self, phase: SessionPhase) {
        self.phase_tx.send_if_modified(|current| {
            let matched = *current == phase;
            if matched {
                *current = SessionPhase::Idle;
            }
            matched
        });
    }

    fn append_message(&self, message: Message) {
        self.messages_tx.send_modify(|log| log.push(message));
    }

    async fn merge_scanned(&self, peer: PeerDevice) -> Vec<PeerDevice> {
        let mut registry = self.registry.lock().await;
        let merged = match registry.get(peer.address()) {
            Some(known) if known.origin() == DeviceOrigin::Paired => {
                let name = if peer.name().trim().is_empty() {
                    known.name().to_string()
                } else {
                    peer.name().to_string()
                };
                peer.with_origin(DeviceOrigin::Paired).with_name(name)
            }
            _ => peer,
        };
        debug!("Merging discovered peer {}", merged);
        self.emit(SessionEvent::DeviceDiscovered(merged.clone()));
        registry.upsert(merged);

        let list = registry.list().to_vec();
        self.peers_tx.send_replace(list.clone());
        list
    }

    /// Run `attempt` on its own task so abandoning the stream does not cancel it
    async fn spawn_attempt(self: Arc<Self>, attempt: Attempt) -> OperationResult<ConnectionState> {
        let fallback = attempt.failure("connection task aborted");
        match tokio::spawn(self.establish(attempt)).await {
            Ok(result) => result,
            Err(e) => {
                error!("Connection task failed: {}", e);
                OperationResult::failed(fallback)
            }
        }
    }

    async fn establish(self: Arc<Self>, attempt: Attempt) -> OperationResult<ConnectionState> {
        if self.pending.swap(true, Ordering::AcqRel) {
            return OperationResult::rejected(self.current_state(), SessionError::AlreadyConnected);
        }
        let _pending = PendingAttempt(&self.pending);
        if self.slot.lock().await.is_some() {
            return OperationResult::rejected(self.current_state(), SessionError::AlreadyConnected);
        }

        self.set_connection_state(ConnectionState::Initializing);
        self.set_phase(SessionPhase::Connecting);

        let connecting = async {
            match &attempt {
                Attempt::Client { address, secure } => {
                    let peer = self.resolve_peer(address).await;
                    match peer {
                        Ok(peer) => self.connections.initiate_connection(&peer, *secure).await,
                        Err(error) => OperationResult::failed(error),
                    }
                }
                Attempt::Server { secure } => self.connections.listen_and_accept(*secure).await,
            }
        };
        let result = match self.config.connect_timeout() {
            Some(limit) => match tokio::time::timeout(limit, connecting).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Connection attempt timed out after {:?}", limit);
                    OperationResult::failed(attempt.failure(format!("timed out after {:?}", limit)))
                }
            },
            None => connecting.await,
        };

        let error = result.error().cloned();
        match result.into_data() {
            Some(handle) => {
                let handle = Arc::new(handle);
                self.install(handle.clone()).await;
                if self.config.auto_receive {
                    self.spawn_receiver(handle);
                }
                OperationResult::outcome(ConnectionState::Connected, Some(ConnectionState::Connected))
            }
            None => {
                let error = error.unwrap_or_else(|| attempt.failure("no connection established"));
                error!("Connection attempt failed: {}", error);
                self.set_connection_state(ConnectionState::Failed);
                self.set_phase(SessionPhase::Error);
                self.set_connection_state(ConnectionState::None);
                self.set_phase(SessionPhase::Idle);
                OperationResult::failed(error)
            }
        }
    }

    /// Registry entry for `address`, or an unnamed scanned peer
    async fn resolve_peer(&self, address: &str) -> Result<PeerDevice, SessionError> {
        if let Some(known) = self.registry.lock().await.get(address) {
            return Ok(known.clone());
        }
        PeerDevice::new(address, "", DeviceOrigin::Scanned)
    }

    /// Take ownership of a fresh connection; a new session starts a new log
    async fn install(&self, handle: Arc<ConnectionHandle>) {
        self.messages_tx.send_replace(Vec::new());
        self.peer_tx.send_replace(Some(handle.peer().clone()));
        *self.slot.lock().await = Some(handle.clone());
        self.set_connection_state(ConnectionState::Connected);
        self.set_phase(SessionPhase::Connected);
        info!("Session established with {}", handle.peer());
    }

    async fn send(&self, text: String) -> OperationResult<ConnectionState> {
        if text.trim().is_empty() {
            return OperationResult::rejected(
                self.current_state(),
                SessionError::InvalidInput {
                    reason: "message must not be blank".to_string(),
                },
            );
        }

        let handle = self.slot.lock().await.clone();
        let Some(handle) = handle else {
            debug!("Send requested without a connection");
            return OperationResult::rejected(ConnectionState::None, SessionError::NotConnected);
        };

        let result = self.channel.write_message(text.as_bytes(), &handle).await;
        let error = result.error().cloned();
        match result.into_data() {
            Some(message) => {
                self.append_message(message.clone());
                self.emit(SessionEvent::MessageSent(message));
                OperationResult::outcome(ConnectionState::Connected, Some(ConnectionState::Connected))
            }
            None => OperationResult::failed(error.unwrap_or(SessionError::WriteFailed {
                reason: "write produced no message".to_string(),
            })),
        }
    }

    fn spawn_receiver(self: &Arc<Self>, handle: Arc<ConnectionHandle>) -> bool {
        if self.receiver_for.swap(handle.id(), Ordering::AcqRel) == handle.id() {
            return false;
        }
        tokio::spawn(self.clone().receive_loop(handle));
        true
    }

    async fn owns(&self, id: u64) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| handle.id() == id)
    }

    async fn receive_loop(self: Arc<Self>, handle: Arc<ConnectionHandle>) {
        info!("Receiving from {}", handle.peer());
        self.phase_tx.send_if_modified(|phase| {
            let connected = *phase == SessionPhase::Connected;
            if connected {
                *phase = SessionPhase::Receiving;
            }
            connected
        });

        let mut failures: u32 = 0;
        loop {
            if !self.owns(handle.id()).await || !self.current_state().is_connected() {
                break;
            }

            let result = self.channel.read_next(&handle).await;
            let error = result.error().cloned();
            if let Some(message) = result.into_data() {
                failures = 0;
                self.append_message(message.clone());
                self.emit(SessionEvent::MessageReceived(message));
                continue;
            }

            if handle.is_closed() {
                debug!("Receive loop stopped by local close");
                break;
            }
            let error = error.unwrap_or(SessionError::ReadFailed {
                reason: "read produced no message".to_string(),
                retryable: false,
            });
            match self.config.receive_policy {
                ReceivePolicy::RetryWithCooldown {
                    cooldown_ms,
                    max_consecutive_failures,
                } if error.is_retryable() && failures < max_consecutive_failures => {
                    failures += 1;
                    warn!(
                        "Read failed ({}/{}), retrying in {}ms: {}",
                        failures, max_consecutive_failures, cooldown_ms, error
                    );
                    tokio::time::sleep(Duration::from_millis(cooldown_ms)).await;
                }
                _ => {
                    warn!("Peer {} disconnected: {}", handle.peer(), error);
                    self.teardown(handle.id()).await;
                    break;
                }
            }
        }

        let _ = self
            .receiver_for
            .compare_exchange(handle.id(), 0, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Release the connection `id` after the peer went away
    async fn teardown(&self, id: u64) {
        let taken = {
            let mut slot = self.slot.lock().await;
            if slot.as_ref().is_some_and(|handle| handle.id() == id) {
                slot.take()
            } else {
                None
            }
        };
        let Some(handle) = taken else {
            return;
        };

        let _ = self.connections.close(&handle).await;
        self.peer_tx.send_replace(None);
        self.set_connection_state(ConnectionState::Failed);
        self.set_phase(SessionPhase::Error);
        self.set_connection_state(ConnectionState::None);
        self.set_phase(SessionPhase::Idle);
    }

    async fn disconnect(&self) -> OperationResult<ConnectionState> {
        let taken = self.slot.lock().await.take();
        match taken {
            Some(handle) => {
                // Already closed still counts as closed
                let _ = self.connections.close(&handle).await;
                self.peer_tx.send_replace(None);
                self.set_connection_state(ConnectionState::Closed);
                self.set_phase(SessionPhase::Closed);
                info!("Disconnected from {}", handle.peer());
                OperationResult::outcome(ConnectionState::Closed, Some(ConnectionState::Closed))
            }
            None => {
                debug!("Disconnect requested without a connection");
                self.phase_tx.send_if_modified(|phase| {
                    let stale = matches!(
                        phase,
                        SessionPhase::Connected | SessionPhase::Receiving | SessionPhase::Error
                    );
                    if stale {
                        *phase = SessionPhase::Idle;
                    }
                    stale
                });
                let state = self.current_state();
                OperationResult::outcome(state, Some(state))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAir;

    fn coordinator() -> (MemoryAir, SessionCoordinator) {
        let air = MemoryAir::new();
        let radio = air.radio("AA:01", "alice");
        (air, SessionCoordinator::new(radio, SessionConfig::default()))
    }

    #[tokio::test]
    async fn test_progress_is_reference_counted() {
        let (_air, session) = coordinator();
        let first = ProgressGuard::acquire(session.inner.clone());
        let second = ProgressGuard::acquire(session.inner.clone());
        assert_eq!(session.progress(), ProgressState::Loading);
        drop(first);
        assert_eq!(session.progress(), ProgressState::Loading);
        drop(second);
        assert_eq!(session.progress(), ProgressState::Idle);
    }

    #[tokio::test]
    async fn test_dropped_operation_releases_progress() {
        let (_air, session) = coordinator();
        let mut sending = session.send("hello");
        assert_eq!(sending.next().await, Some(OperationResult::Status(ProgressState::Loading)));
        drop(sending);
        assert_eq!(session.progress(), ProgressState::Idle);
    }

    #[tokio::test]
    async fn test_blank_message_is_invalid() {
        let (_air, session) = coordinator();
        let results: Vec<_> = session.send("   ").collect().await;
        assert_eq!(results.len(), 3);
        assert!(matches!(
            results[1].error(),
            Some(SessionError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_blank_address_is_invalid() {
        let (_air, session) = coordinator();
        let results: Vec<_> = session.connect_as_client(" ", true).collect().await;
        assert!(matches!(
            results[1].error(),
            Some(SessionError::InvalidInput { .. })
        ));
        assert_eq!(session.connection_state(), ConnectionState::None);
    }

    #[tokio::test]
    async fn test_start_receiving_needs_connection() {
        let (_air, session) = coordinator();
        assert!(!session.start_receiving().await);
    }

    #[tokio::test]
    async fn test_clear_messages_empties_log() {
        let (_air, session) = coordinator();
        session.inner.append_message(Message::received("stale"));
        assert_eq!(session.messages().len(), 1);
        session.clear_messages();
        assert!(session.messages().is_empty());
    }
}
