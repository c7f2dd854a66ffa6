//! In-memory radio
//!
//! [`MemoryAir`] is a simulated medium shared by any number of
//! [`MemoryRadio`]s. Scans see every other powered, discoverable radio;
//! connections rendezvous on (address, service uuid) and are carried by
//! `tokio::io::duplex` pairs. Used by the test suites and the CLI demo.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::debug;
use uuid::Uuid;

use crate::errors::{TransportError, TransportResult};
use crate::protocol::ServiceRecord;
use crate::transport::{
    DiscoveredDevice, LinkAcceptor, LinkConnector, LinkListener, PeerScanner, TransportLink,
};

/// Bytes buffered in each direction of a simulated link
const LINK_BUFFER_SIZE: usize = 64 * 1024;
const SCAN_BUFFER_SIZE: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Medium
// ----------------------------------------------------------------------------

struct Station {
    address: String,
    name: String,
    powered: AtomicBool,
    discoverable: AtomicBool,
}

impl Station {
    fn report(&self) -> DiscoveredDevice {
        DiscoveredDevice::new(self.address.clone(), Some(self.name.clone()))
    }

    fn is_visible(&self) -> bool {
        self.powered.load(Ordering::Acquire) && self.discoverable.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct AirState {
    stations: Vec<Arc<Station>>,
    scans: HashMap<String, mpsc::Sender<DiscoveredDevice>>,
    listeners: HashMap<(String, Uuid), oneshot::Sender<TransportLink>>,
}

#[derive(Default)]
struct AirInner {
    state: Mutex<AirState>,
    changed: Notify,
}

/// A simulated radio medium
#[derive(Clone, Default)]
pub struct MemoryAir {
    inner: Arc<AirInner>,
}

impl MemoryAir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a powered, discoverable radio to the medium
    pub fn radio(&self, address: impl Into<String>, name: impl Into<String>) -> Arc<MemoryRadio> {
        let station = Arc::new(Station {
            address: address.into(),
            name: name.into(),
            powered: AtomicBool::new(true),
            discoverable: AtomicBool::new(true),
        });

        {
            let mut state = lock(&self.inner.state);
            for (scanner, tx) in state.scans.iter() {
                if *scanner != station.address {
                    let _ = tx.try_send(station.report());
                }
            }
            state.stations.push(station.clone());
        }
        self.inner.changed.notify_waiters();

        Arc::new(MemoryRadio {
            air: self.clone(),
            station,
            bonded: Mutex::new(Vec::new()),
        })
    }

    /// Bond two radios with each other
    pub fn pair(&self, a: &MemoryRadio, b: &MemoryRadio) {
        a.bond(b.station.report());
        b.bond(a.station.report());
    }

    /// Whether any service is being listened on at `address`
    pub fn has_listener(&self, address: &str) -> bool {
        lock(&self.inner.state)
            .listeners
            .keys()
            .any(|(listening, _)| listening == address)
    }

    /// Wait until some service is being listened on at `address`
    pub async fn wait_for_listener(&self, address: &str) {
        loop {
            let notified = self.inner.changed.notified();
            if self.has_listener(address) {
                return;
            }
            notified.await;
        }
    }

    /// Number of radios with a discovery registration
    pub fn active_scans(&self) -> usize {
        lock(&self.inner.state).scans.len()
    }

    fn station(&self, address: &str) -> Option<Arc<Station>> {
        lock(&self.inner.state)
            .stations
            .iter()
            .find(|station| station.address == address)
            .cloned()
    }
}

// ----------------------------------------------------------------------------
// Radio
// ----------------------------------------------------------------------------

/// One radio attached to a [`MemoryAir`]
pub struct MemoryRadio {
    air: MemoryAir,
    station: Arc<Station>,
    bonded: Mutex<Vec<DiscoveredDevice>>,
}

impl MemoryRadio {
    pub fn address(&self) -> &str {
        &self.station.address
    }

    pub fn name(&self) -> &str {
        &self.station.name
    }

    /// Switch the radio on or off; off ends any scan in progress
    pub fn set_powered(&self, powered: bool) {
        self.station.powered.store(powered, Ordering::Release);
        if !powered {
            lock(&self.air.inner.state).scans.remove(self.address());
        }
    }

    pub fn is_powered(&self) -> bool {
        self.station.powered.load(Ordering::Acquire)
    }

    /// Hide this radio from other radios' scans
    pub fn set_discoverable(&self, discoverable: bool) {
        self.station.discoverable.store(discoverable, Ordering::Release);
    }

    /// Add a bonded peer
    pub fn bond(&self, device: DiscoveredDevice) {
        let mut bonded = lock(&self.bonded);
        if !bonded.iter().any(|known| known.address == device.address) {
            bonded.push(device);
        }
    }

    /// Deliver a raw report to this radio's active scan, if any
    pub fn inject_discovery(&self, report: DiscoveredDevice) -> bool {
        let tx = lock(&self.air.inner.state).scans.get(self.address()).cloned();
        match tx {
            Some(tx) => tx.try_send(report).is_ok(),
            None => false,
        }
    }

    /// Whether this radio currently has a discovery registration
    pub fn is_scanning(&self) -> bool {
        lock(&self.air.inner.state).scans.contains_key(self.address())
    }

    fn ensure_powered(&self) -> TransportResult<()> {
        if self.is_powered() {
            Ok(())
        } else {
            Err(TransportError::Unavailable(format!(
                "radio {} is powered off",
                self.address()
            )))
        }
    }
}

#[async_trait]
impl PeerScanner for MemoryRadio {
    async fn paired_devices(&self) -> TransportResult<Vec<DiscoveredDevice>> {
        self.ensure_powered()?;
        Ok(lock(&self.bonded).clone())
    }

    async fn start_discovery(&self) -> TransportResult<mpsc::Receiver<DiscoveredDevice>> {
        self.ensure_powered()?;
        let (tx, rx) = mpsc::channel(SCAN_BUFFER_SIZE);

        let mut state = lock(&self.air.inner.state);
        for station in state.stations.iter() {
            if station.address != self.station.address && station.is_visible() {
                let _ = tx.try_send(station.report());
            }
        }
        state.scans.insert(self.address().to_string(), tx);
        debug!("Radio {} started discovery", self.address());
        Ok(rx)
    }

    async fn cancel_discovery(&self) -> TransportResult<()> {
        if lock(&self.air.inner.state).scans.remove(self.address()).is_some() {
            debug!("Radio {} cancelled discovery", self.address());
        }
        Ok(())
    }
}

#[async_trait]
impl LinkConnector for MemoryRadio {
    async fn connect(&self, address: &str, service: &ServiceRecord) -> TransportResult<TransportLink> {
        self.ensure_powered()?;

        let target = self
            .air
            .station(address)
            .filter(|station| station.powered.load(Ordering::Acquire))
            .ok_or_else(|| TransportError::PeerNotFound {
                address: address.to_string(),
            })?;

        let listener = lock(&self.air.inner.state)
            .listeners
            .remove(&(address.to_string(), service.uuid))
            .ok_or_else(|| TransportError::ConnectionRefused {
                address: address.to_string(),
            })?;

        let (local, remote) = tokio::io::duplex(LINK_BUFFER_SIZE);
        listener
            .send(TransportLink::new(self.station.report(), remote))
            .map_err(|_| TransportError::ConnectionRefused {
                address: address.to_string(),
            })?;

        Ok(TransportLink::new(target.report(), local))
    }
}

#[async_trait]
impl LinkAcceptor for MemoryRadio {
    async fn listen(&self, service: &ServiceRecord) -> TransportResult<Box<dyn LinkListener>> {
        self.ensure_powered()?;

        let key = (self.address().to_string(), service.uuid);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = lock(&self.air.inner.state);
            if state.listeners.get(&key).is_some_and(|existing| !existing.is_closed()) {
                return Err(TransportError::ServiceInUse {
                    service: service.to_string(),
                });
            }
            state.listeners.insert(key.clone(), tx);
        }
        self.air.inner.changed.notify_waiters();

        Ok(Box::new(MemoryListener {
            air: self.air.clone(),
            key,
            incoming: Some(rx),
        }))
    }
}

/// Listening endpoint of a [`MemoryRadio`]
struct MemoryListener {
    air: MemoryAir,
    key: (String, Uuid),
    incoming: Option<oneshot::Receiver<TransportLink>>,
}

#[async_trait]
impl LinkListener for MemoryListener {
    async fn accept(mut self: Box<Self>) -> TransportResult<TransportLink> {
        let incoming = self.incoming.take().ok_or(TransportError::ListenerClosed)?;
        incoming.await.map_err(|_| TransportError::ListenerClosed)
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        // Closing the receiver first lets us tell our registration from a newer one
        drop(self.incoming.take());
        let mut state = lock(&self.air.inner.state);
        if state
            .listeners
            .get(&self.key)
            .is_some_and(|registered| registered.is_closed())
        {
            state.listeners.remove(&self.key);
        }
    }
}
