//! BlueZ backend using bluer RFCOMM profiles
//!
//! Both roles go through a registered profile: the client registers it,
//! asks the device to connect the profile and accepts the request that
//! BlueZ hands back; the server waits for the first incoming request.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::{Adapter, AdapterEvent, Address, Session};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blemsg_core::{
    DiscoveredDevice, LinkListener, ServiceRecord, TransportError, TransportLink, TransportResult,
};

use crate::config::BleConfig;
use crate::error::BleError;
use crate::protocol::normalize_address;

const DISCOVERY_BUFFER_SIZE: usize = 64;

struct DiscoveryTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

// ----------------------------------------------------------------------------
// Backend
// ----------------------------------------------------------------------------

pub(crate) struct BluezBackend {
    session: Session,
    adapter: Adapter,
    discovery: Mutex<Option<DiscoveryTask>>,
}

impl BluezBackend {
    pub(crate) async fn open(config: &BleConfig) -> Result<Self, BleError> {
        let session = Session::new()
            .await
            .map_err(|e| BleError::AdapterNotAvailable(format!("BlueZ session: {}", e)))?;

        let adapter = match &config.adapter {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| BleError::AdapterNotAvailable(format!("adapter: {}", e)))?;

        if config.power_on && !adapter.is_powered().await.unwrap_or(false) {
            adapter
                .set_powered(true)
                .await
                .map_err(|e| BleError::AdapterNotAvailable(format!("power on: {}", e)))?;
        }
        if let Err(e) = adapter.set_discoverable(config.discoverable).await {
            warn!("Failed to set discoverable={}: {}", config.discoverable, e);
        }

        Ok(Self {
            session,
            adapter,
            discovery: Mutex::new(None),
        })
    }

    pub(crate) fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    async fn ensure_powered(&self) -> Result<(), BleError> {
        match self.adapter.is_powered().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(BleError::AdapterNotAvailable(format!(
                "{} is powered off",
                self.adapter.name()
            ))),
            Err(e) => Err(BleError::AdapterNotAvailable(e.to_string())),
        }
    }

    async fn describe(&self, address: Address) -> DiscoveredDevice {
        let name = match self.adapter.device(address) {
            Ok(device) => device.name().await.ok().flatten(),
            Err(_) => None,
        };
        DiscoveredDevice::new(address.to_string(), name)
    }

    pub(crate) async fn paired_devices(&self) -> Result<Vec<DiscoveredDevice>, BleError> {
        self.ensure_powered().await?;
        let addresses = self
            .adapter
            .device_addresses()
            .await
            .map_err(|e| BleError::AdapterNotAvailable(e.to_string()))?;

        let mut paired = Vec::new();
        for address in addresses {
            let Ok(device) = self.adapter.device(address) else {
                continue;
            };
            if device.is_paired().await.unwrap_or(false) {
                paired.push(DiscoveredDevice::new(
                    address.to_string(),
                    device.name().await.ok().flatten(),
                ));
            }
        }
        debug!("Adapter {} has {} paired devices", self.adapter.name(), paired.len());
        Ok(paired)
    }

    pub(crate) async fn start_discovery(&self) -> Result<mpsc::Receiver<DiscoveredDevice>, BleError> {
        self.ensure_powered().await?;
        self.cancel_discovery().await;

        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(|e| BleError::DiscoveryFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(DISCOVERY_BUFFER_SIZE);
        let cancel = CancellationToken::new();
        let adapter = self.adapter.clone();
        let task = tokio::spawn(forward_discoveries(adapter, events, tx, cancel.clone()));
        *self.discovery.lock().await = Some(DiscoveryTask { cancel, task });
        info!("Discovery started on {}", self.adapter.name());
        Ok(rx)
    }

    pub(crate) async fn cancel_discovery(&self) {
        let running = self.discovery.lock().await.take();
        if let Some(DiscoveryTask { cancel, task }) = running {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!("Discovery task ended abnormally: {}", e);
            }
            info!("Discovery stopped on {}", self.adapter.name());
        }
    }

    async fn register(&self, service: &ServiceRecord, role: Role) -> Result<ProfileHandle, BleError> {
        let profile = Profile {
            uuid: service.uuid,
            name: Some(service.name.to_string()),
            role: Some(role),
            require_authentication: Some(service.secure),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        self.session
            .register_profile(profile)
            .await
            .map_err(|e| BleError::ProfileRegistration {
                service: service.to_string(),
                reason: e.to_string(),
            })
    }

    pub(crate) async fn connect(
        &self,
        address: &str,
        service: &ServiceRecord,
    ) -> Result<TransportLink, BleError> {
        self.ensure_powered().await?;
        let address = normalize_address(address)?;
        let target: Address = address
            .parse()
            .map_err(|_| BleError::InvalidAddress(address.clone()))?;
        let device = self
            .adapter
            .device(target)
            .map_err(|e| BleError::ConnectionFailed {
                address: address.clone(),
                reason: e.to_string(),
            })?;

        let mut profile = self.register(service, Role::Client).await?;
        debug!("Requesting {} profile connection to {}", service.socket_type(), address);

        let request = tokio::select! {
            request = profile.next() => request,
            connected = device.connect_profile(&service.uuid) => {
                connected.map_err(|e| BleError::ConnectionFailed {
                    address: address.clone(),
                    reason: e.to_string(),
                })?;
                profile.next().await
            }
        };
        let request = request.ok_or(BleError::ProfileClosed)?;
        let stream = request.accept()?;

        let remote = self.describe(target).await;
        Ok(TransportLink::new(remote, RfcommLink::new(stream, profile)))
    }

    pub(crate) async fn listen(&self, service: &ServiceRecord) -> Result<Box<dyn LinkListener>, BleError> {
        self.ensure_powered().await?;
        let profile = self.register(service, Role::Server).await?;
        info!("Registered {} for incoming connections", service);
        Ok(Box::new(BluezListener {
            adapter: self.adapter.clone(),
            profile,
        }))
    }
}

async fn forward_discoveries(
    adapter: Adapter,
    events: impl futures::Stream<Item = AdapterEvent> + Send + 'static,
    tx: mpsc::Sender<DiscoveredDevice>,
    cancel: CancellationToken,
) {
    futures::pin_mut!(events);
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.next() => event,
        };
        let Some(event) = event else {
            debug!("Adapter ended discovery");
            break;
        };
        if let AdapterEvent::DeviceAdded(address) = event {
            let name = match adapter.device(address) {
                Ok(device) => device.name().await.ok().flatten(),
                Err(_) => None,
            };
            if tx.send(DiscoveredDevice::new(address.to_string(), name)).await.is_err() {
                break;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

struct BluezListener {
    adapter: Adapter,
    profile: ProfileHandle,
}

#[async_trait]
impl LinkListener for BluezListener {
    async fn accept(mut self: Box<Self>) -> TransportResult<TransportLink> {
        let request = self.profile.next().await.ok_or(TransportError::ListenerClosed)?;
        let address = request.device();
        let stream = request.accept().map_err(BleError::from)?;
        info!("Accepted RFCOMM connection from {}", address);

        let name = match self.adapter.device(address) {
            Ok(device) => device.name().await.ok().flatten(),
            Err(_) => None,
        };
        let BluezListener { profile, .. } = *self;
        Ok(TransportLink::new(
            DiscoveredDevice::new(address.to_string(), name),
            RfcommLink::new(stream, profile),
        ))
    }
}

// ----------------------------------------------------------------------------
// Link
// ----------------------------------------------------------------------------

/// RFCOMM stream that keeps its profile registered while open
struct RfcommLink {
    stream: bluer::rfcomm::Stream,
    _profile: ProfileHandle,
}

impl RfcommLink {
    fn new(stream: bluer::rfcomm::Stream, profile: ProfileHandle) -> Self {
        Self {
            stream,
            _profile: profile,
        }
    }
}

impl AsyncRead for RfcommLink {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommLink {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
