//! The Bluetooth radio handed to the session coordinator

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use blemsg_core::{
    DiscoveredDevice, LinkAcceptor, LinkConnector, LinkListener, PeerScanner, ServiceRecord,
    TransportLink, TransportResult,
};

use crate::config::BleConfig;
use crate::error::BleError;

#[cfg(all(target_os = "linux", feature = "bluez"))]
type Backend = crate::bluez::BluezBackend;

// ----------------------------------------------------------------------------
// Radio
// ----------------------------------------------------------------------------

/// Local Bluetooth adapter
///
/// Built without BlueZ support, the radio opens fine but reports itself
/// unavailable on every operation.
pub struct BleRadio {
    config: BleConfig,
    #[cfg(all(target_os = "linux", feature = "bluez"))]
    backend: Backend,
}

impl BleRadio {
    /// Open the configured adapter
    #[cfg(all(target_os = "linux", feature = "bluez"))]
    pub async fn open(config: BleConfig) -> Result<Self, BleError> {
        let backend = Backend::open(&config).await?;
        info!("Opened Bluetooth adapter {}", backend.adapter_name());
        Ok(Self { config, backend })
    }

    /// Open the configured adapter
    #[cfg(not(all(target_os = "linux", feature = "bluez")))]
    pub async fn open(config: BleConfig) -> Result<Self, BleError> {
        info!("Bluetooth backend not compiled in; radio will report unavailable");
        Ok(Self { config })
    }

    pub fn config(&self) -> &BleConfig {
        &self.config
    }

    /// Whether a real Bluetooth backend is compiled in
    pub fn is_supported() -> bool {
        cfg!(all(target_os = "linux", feature = "bluez"))
    }
}

#[cfg(all(target_os = "linux", feature = "bluez"))]
#[async_trait]
impl PeerScanner for BleRadio {
    async fn paired_devices(&self) -> TransportResult<Vec<DiscoveredDevice>> {
        Ok(self.backend.paired_devices().await?)
    }

    async fn start_discovery(&self) -> TransportResult<mpsc::Receiver<DiscoveredDevice>> {
        Ok(self.backend.start_discovery().await?)
    }

    async fn cancel_discovery(&self) -> TransportResult<()> {
        self.backend.cancel_discovery().await;
        Ok(())
    }
}

#[cfg(all(target_os = "linux", feature = "bluez"))]
#[async_trait]
impl LinkConnector for BleRadio {
    async fn connect(&self, address: &str, service: &ServiceRecord) -> TransportResult<TransportLink> {
        Ok(self.backend.connect(address, service).await?)
    }
}

#[cfg(all(target_os = "linux", feature = "bluez"))]
#[async_trait]
impl LinkAcceptor for BleRadio {
    async fn listen(&self, service: &ServiceRecord) -> TransportResult<Box<dyn LinkListener>> {
        Ok(self.backend.listen(service).await?)
    }
}

// ----------------------------------------------------------------------------
// Unsupported Platform
// ----------------------------------------------------------------------------

#[cfg(not(all(target_os = "linux", feature = "bluez")))]
#[async_trait]
impl PeerScanner for BleRadio {
    async fn paired_devices(&self) -> TransportResult<Vec<DiscoveredDevice>> {
        Err(BleError::Unsupported.into())
    }

    async fn start_discovery(&self) -> TransportResult<mpsc::Receiver<DiscoveredDevice>> {
        Err(BleError::Unsupported.into())
    }

    async fn cancel_discovery(&self) -> TransportResult<()> {
        Ok(())
    }
}

#[cfg(not(all(target_os = "linux", feature = "bluez")))]
#[async_trait]
impl LinkConnector for BleRadio {
    async fn connect(&self, _address: &str, _service: &ServiceRecord) -> TransportResult<TransportLink> {
        Err(BleError::Unsupported.into())
    }
}

#[cfg(not(all(target_os = "linux", feature = "bluez")))]
#[async_trait]
impl LinkAcceptor for BleRadio {
    async fn listen(&self, _service: &ServiceRecord) -> TransportResult<Box<dyn LinkListener>> {
        Err(BleError::Unsupported.into())
    }
}
