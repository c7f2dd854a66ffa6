//! Peer discovery: paired-device enumeration and cancellable scans
//!
//! A scan is a background pump task that forwards radio reports into a
//! channel, paired with a [`CancellationToken`]. The consumer side
//! ([`ScanStream`]) checks the token before every delivery, so once
//! `cancel()` returns no further peer is handed out. The pump owns the radio
//! registration and always releases it on exit.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::SessionError;
use crate::result::OperationResult;
use crate::transport::{DiscoveredDevice, PeerScanner};
use crate::types::{ConnectionState, DeviceOrigin, PeerDevice};

/// Turn a raw radio report into a peer, dropping reports without an address
pub(crate) fn peer_from_report(report: DiscoveredDevice, origin: DeviceOrigin) -> Option<PeerDevice> {
    let address = report.address?;
    PeerDevice::new(address, report.name.unwrap_or_default(), origin).ok()
}

// ----------------------------------------------------------------------------
// Scan Stream
// ----------------------------------------------------------------------------

/// Newly observed peers of one scan, in discovery order, each address once
///
/// Yields `Err(TransportUnavailable)` once and ends if the scan could not
/// start. Dropping the stream cancels the scan.
pub struct ScanStream {
    events: mpsc::Receiver<Result<PeerDevice, SessionError>>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl ScanStream {
    /// Stop delivering peers immediately; radio cleanup completes in the
    /// background
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait until the radio scan is stopped and its listener released
    pub async fn stop(self) {
        self.cancel.cancel();
        self.finished.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for ScanStream {
    type Item = Result<PeerDevice, SessionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }
}

impl Drop for ScanStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ----------------------------------------------------------------------------
// Discovery Engine
// ----------------------------------------------------------------------------

struct ActiveScan {
    cancel: CancellationToken,
    finished: CancellationToken,
}

/// Drives peer discovery on a [`PeerScanner`]
pub struct DiscoveryEngine {
    scanner: Arc<dyn PeerScanner>,
    scan_timeout: Option<Duration>,
    buffer_size: usize,
    active: Mutex<Option<ActiveScan>>,
}

impl DiscoveryEngine {
    pub fn new(scanner: Arc<dyn PeerScanner>) -> Self {
        Self {
            scanner,
            scan_timeout: None,
            buffer_size: 64,
            active: Mutex::new(None),
        }
    }

    /// End every scan after `timeout`
    pub fn with_scan_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Capacity of the per-scan event channel
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Every bonded peer, tagged `Paired`
    pub async fn paired_devices(&self) -> OperationResult<Vec<PeerDevice>> {
        match self.scanner.paired_devices().await {
            Ok(reports) => {
                let peers: Vec<PeerDevice> = reports
                    .into_iter()
                    .filter_map(|report| peer_from_report(report, DeviceOrigin::Paired))
                    .collect();
                debug!("Found {} paired peers", peers.len());
                OperationResult::outcome(ConnectionState::None, Some(peers))
            }
            Err(e) => {
                warn!("Failed to list paired peers: {}", e);
                OperationResult::failed(SessionError::TransportUnavailable {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Begin a scan, replacing any scan already running
    pub async fn start_scan(&self) -> ScanStream {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
            previous.finished.cancelled().await;
        }

        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.buffer_size);

        tokio::spawn(pump(
            self.scanner.clone(),
            tx,
            cancel.clone(),
            finished.clone(),
            self.scan_timeout,
        ));

        *active = Some(ActiveScan {
            cancel: cancel.clone(),
            finished: finished.clone(),
        });

        ScanStream {
            events: rx,
            cancel,
            finished,
        }
    }

    /// Cancel any running scan and stop the radio scan; safe to call anytime
    pub async fn stop_scan(&self) {
        let previous = self.active.lock().await.take();
        if let Some(scan) = previous {
            scan.cancel.cancel();
            scan.finished.cancelled().await;
            info!("Stopped scan");
        }
        if let Err(e) = self.scanner.cancel_discovery().await {
            debug!("Radio refused to cancel discovery: {}", e);
        }
    }

    /// Whether a scan pump is still running
    pub async fn is_scanning(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|scan| !scan.finished.is_cancelled())
            .unwrap_or(false)
    }
}

async fn pump(
    scanner: Arc<dyn PeerScanner>,
    tx: mpsc::Sender<Result<PeerDevice, SessionError>>,
    cancel: CancellationToken,
    finished: CancellationToken,
    scan_timeout: Option<Duration>,
) {
    let _finished = finished.drop_guard();

    let mut reports = match scanner.start_discovery().await {
        Ok(reports) => reports,
        Err(e) => {
            warn!("Failed to start scan: {}", e);
            let _ = tx
                .send(Err(SessionError::TransportUnavailable {
                    reason: e.to_string(),
                }))
                .await;
            return;
        }
    };
    info!("Started scan");

    let deadline = async move {
        match scan_timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut seen: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Scan cancelled");
                break;
            }
            _ = &mut deadline => {
                info!("Scan time limit reached");
                break;
            }
            report = reports.recv() => {
                let Some(report) = report else {
                    debug!("Radio ended the scan");
                    break;
                };
                let Some(peer) = peer_from_report(report, DeviceOrigin::Scanned) else {
                    debug!("Dropping discovery report without address");
                    continue;
                };
                if !seen.insert(peer.address().to_string()) {
                    continue;
                }
                debug!("Discovered peer {}", peer);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(Ok(peer)) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    drop(reports);
    if let Err(e) = scanner.cancel_discovery().await {
        warn!("Failed to release scan: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{TransportError, TransportResult};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Scanner whose reports are fed by the test
    #[derive(Default)]
    struct ScriptedScanner {
        feed: StdMutex<Option<mpsc::Sender<DiscoveredDevice>>>,
        fail_start: bool,
        cancels: AtomicUsize,
    }

    impl ScriptedScanner {
        async fn report(&self, address: Option<&str>, name: &str) {
            let tx = self.feed.lock().unwrap().clone();
            if let Some(tx) = tx {
                let _ = tx
                    .send(DiscoveredDevice {
                        address: address.map(str::to_string),
                        name: Some(name.to_string()),
                    })
                    .await;
            }
        }
    }

    #[async_trait]
    impl PeerScanner for ScriptedScanner {
        async fn paired_devices(&self) -> TransportResult<Vec<DiscoveredDevice>> {
            if self.fail_start {
                return Err(TransportError::Unavailable("radio off".into()));
            }
            Ok(vec![
                DiscoveredDevice::new("AA:1", Some("Foo".into())),
                DiscoveredDevice { address: None, name: Some("ghost".into()) },
            ])
        }

        async fn start_discovery(&self) -> TransportResult<mpsc::Receiver<DiscoveredDevice>> {
            if self.fail_start {
                return Err(TransportError::PermissionDenied("scan".into()));
            }
            let (tx, rx) = mpsc::channel(16);
            *self.feed.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn cancel_discovery(&self) -> TransportResult<()> {
            self.feed.lock().unwrap().take();
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_paired_devices_drop_malformed_entries() {
        let engine = DiscoveryEngine::new(Arc::new(ScriptedScanner::default()));
        let result = engine.paired_devices().await;
        let peers = result.into_data().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].origin(), DeviceOrigin::Paired);
    }

    #[tokio::test]
    async fn test_paired_devices_unavailable() {
        let scanner = ScriptedScanner {
            fail_start: true,
            ..Default::default()
        };
        let engine = DiscoveryEngine::new(Arc::new(scanner));
        let result = engine.paired_devices().await;
        assert!(matches!(
            result.error(),
            Some(SessionError::TransportUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_scan_dedups_and_drops_malformed() {
        let scanner = Arc::new(ScriptedScanner::default());
        let engine = DiscoveryEngine::new(scanner.clone());
        let mut scan = engine.start_scan().await;

        // Wait for the pump to register with the radio
        while scanner.feed.lock().unwrap().is_none() {
            tokio::task::yield_now().await;
        }
        scanner.report(Some("BB:1"), "one").await;
        scanner.report(None, "noise").await;
        scanner.report(Some("BB:1"), "one again").await;
        scanner.report(Some("BB:2"), "two").await;

        let first = scan.next().await.unwrap().unwrap();
        let second = scan.next().await.unwrap().unwrap();
        assert_eq!(first.address(), "BB:1");
        assert_eq!(first.origin(), DeviceOrigin::Scanned);
        assert_eq!(second.address(), "BB:2");

        scan.stop().await;
        assert!(scanner.feed.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_start_ends_with_unavailable() {
        let scanner = ScriptedScanner {
            fail_start: true,
            ..Default::default()
        };
        let engine = DiscoveryEngine::new(Arc::new(scanner));
        let mut scan = engine.start_scan().await;

        let first = scan.next().await.unwrap();
        assert!(matches!(first, Err(SessionError::TransportUnavailable { .. })));
        assert!(scan.next().await.is_none());
    }

    #[tokio::test]
    async fn test_no_delivery_after_cancel() {
        let scanner = Arc::new(ScriptedScanner::default());
        let engine = DiscoveryEngine::new(scanner.clone());
        let mut scan = engine.start_scan().await;

        while scanner.feed.lock().unwrap().is_none() {
            tokio::task::yield_now().await;
        }
        scanner.report(Some("CC:1"), "buffered").await;
        scanner.report(Some("CC:2"), "buffered").await;
        // Let the pump move both reports into the stream's buffer
        tokio::task::yield_now().await;

        scan.cancel();
        assert!(scan.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_scan_is_idempotent() {
        let scanner = Arc::new(ScriptedScanner::default());
        let engine = DiscoveryEngine::new(scanner.clone());
        engine.stop_scan().await;
        engine.stop_scan().await;
        assert_eq!(scanner.cancels.load(Ordering::SeqCst), 2);

        let mut scan = engine.start_scan().await;
        engine.stop_scan().await;
        assert!(scan.next().await.is_none());
        assert!(!engine.is_scanning().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_timeout_ends_stream() {
        let scanner = Arc::new(ScriptedScanner::default());
        let engine = DiscoveryEngine::new(scanner.clone())
            .with_scan_timeout(Some(Duration::from_secs(5)));
        let mut scan = engine.start_scan().await;
        assert!(scan.next().await.is_none());
        assert!(scanner.feed.lock().unwrap().is_none());
    }
}
