//! Application state shared across handlers.
//!
//! # Locking
//!
//! The store is the only lock shared between request handlers, the poller
//! and the change listener. It is held for single SQLite calls only, never
//! across a probe, wake, shutdown or scan. The device registry is read by
//! cloning its current snapshot.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::warn;

use upsnap_core::{
    CommandRunner, DeviceRegistry, DeviceStatus, NeighborTable, Probe, ProbeKind, ProcNetArp,
    ProcessRunner, ScanOptions, Scanner, Scheduler, ShutdownDispatcher, StatusPoller, StatusSink,
    TcpProbe, Transport, UdpTransport, WakeSender, build_probe,
};
use upsnap_store::Store;

use crate::config::Config;

/// The network-facing implementations the service runs with.
///
/// Production code uses [`Backends::from_config`]; tests substitute mocks.
pub struct Backends {
    /// Probe used by the status poller.
    pub poll_probe: Arc<dyn Probe>,
    /// Probe used by network scans.
    pub scan_probe: Arc<dyn Probe>,
    /// Datagram transport for magic packets.
    pub transport: Arc<dyn Transport>,
    /// Process runner for shutdown commands.
    pub runner: Arc<dyn CommandRunner>,
    /// Neighbor table used to resolve scanned MACs.
    pub neighbors: Arc<dyn NeighborTable>,
}

impl Backends {
    /// Real network backends.
    ///
    /// ICMP needs raw-socket privileges; when they are missing the TCP probe
    /// is used instead and a warning is logged.
    pub fn from_config(config: &Config) -> Self {
        let poll_probe = probe_or_tcp(
            config.poller.probe,
            config.poller.probe_timeout(),
            &config.poller.tcp_ports,
        );
        let scan_probe = probe_or_tcp(
            config.poller.probe,
            config.scan.probe_timeout(),
            &config.poller.tcp_ports,
        );

        Self {
            poll_probe,
            scan_probe,
            transport: Arc::new(UdpTransport),
            runner: Arc::new(ProcessRunner),
            neighbors: Arc::new(ProcNetArp::default()),
        }
    }
}

fn probe_or_tcp(kind: ProbeKind, timeout: std::time::Duration, ports: &[u16]) -> Arc<dyn Probe> {
    match build_probe(kind, timeout, ports) {
        Ok(probe) => probe,
        Err(e) => {
            warn!("{}; falling back to TCP probe", e);
            Arc::new(TcpProbe::new(ports.to_vec(), timeout))
        }
    }
}

/// Shared application state.
pub struct AppState {
    /// The record store (wrapped in Mutex for thread-safe access).
    pub store: Arc<Mutex<Store>>,
    /// Configuration loaded at startup.
    pub config: Config,
    /// In-memory mirror of the device records.
    pub registry: Arc<DeviceRegistry>,
    /// Recurring status poll job.
    pub scheduler: Scheduler,
    /// Wake-on-LAN sender.
    pub waker: WakeSender<Arc<dyn Transport>>,
    /// Remote shutdown dispatcher.
    pub shutdown: ShutdownDispatcher<Arc<dyn CommandRunner>>,
    /// Network scanner.
    pub scanner: Scanner<Arc<dyn NeighborTable>>,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create new application state.
    ///
    /// The registry starts empty; call [`AppState::refresh_registry`] to load it.
    pub fn new(store: Store, config: Config, backends: Backends) -> Arc<Self> {
        let store = Arc::new(Mutex::new(store));
        let registry = Arc::new(DeviceRegistry::new());

        let sink = Arc::new(StoreStatusSink::new(Arc::clone(&store)));
        let poller = StatusPoller::new(Arc::clone(&registry), backends.poll_probe, sink)
            .with_concurrency(config.poller.concurrency);

        let scan_options = ScanOptions::default()
            .timeout(config.scan.timeout())
            .concurrency(config.scan.concurrency);

        Arc::new(Self {
            store,
            registry,
            scheduler: Scheduler::new(Arc::new(poller)),
            waker: WakeSender::with_transport(backends.transport),
            shutdown: ShutdownDispatcher::with_runner(backends.runner, config.shutdown.timeout()),
            scanner: Scanner::with_neighbors(backends.scan_probe, backends.neighbors, scan_options),
            config,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// The status poller driven by the scheduler.
    pub fn poller(&self) -> &Arc<StatusPoller> {
        self.scheduler.poller()
    }

    /// Reload the registry snapshot from the store.
    pub async fn refresh_registry(&self) -> Result<usize, upsnap_store::Error> {
        let devices = self.store.lock().await.list_devices()?;
        let count = devices.len();
        self.registry.replace(devices);
        Ok(count)
    }
}

/// Writes poller results to the record store.
#[derive(Debug, Clone)]
pub struct StoreStatusSink {
    store: Arc<Mutex<Store>>,
}

impl StoreStatusSink {
    /// Create a sink over a shared store.
    pub fn new(store: Arc<Mutex<Store>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StatusSink for StoreStatusSink {
    async fn save_status(&self, id: &str, status: DeviceStatus) -> upsnap_core::Result<()> {
        self.store
            .lock()
            .await
            .save_device_status(id, status)
            .map_err(|e| upsnap_core::Error::store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use upsnap_core::MacAddress;
    use upsnap_core::mock::{MockNeighbors, MockProbe, MockRunner, MockTransport};
    use upsnap_store::NewDevice;

    fn mock_backends() -> Backends {
        Backends {
            poll_probe: Arc::new(MockProbe::new()),
            scan_probe: Arc::new(MockProbe::new()),
            transport: Arc::new(MockTransport::new()),
            runner: Arc::new(MockRunner::new()),
            neighbors: Arc::new(MockNeighbors::default()),
        }
    }

    #[tokio::test]
    async fn test_refresh_registry() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .create_device(NewDevice::new(
                "nas",
                MacAddress::new([1, 2, 3, 4, 5, 6]),
                "10.0.0.2",
            ))
            .unwrap();

        let state = AppState::new(store, Config::default(), mock_backends());
        assert!(state.registry.is_empty());

        assert_eq!(state.refresh_registry().await.unwrap(), 1);
        assert_eq!(state.registry.snapshot()[0].name, "nas");
    }

    #[tokio::test]
    async fn test_scheduler_records_status_in_store() {
        let mut store = Store::open_in_memory().unwrap();
        let device = store
            .create_device(NewDevice::new(
                "nas",
                MacAddress::new([1, 2, 3, 4, 5, 6]),
                "10.0.0.2",
            ))
            .unwrap();

        let probe = Arc::new(MockProbe::new());
        probe.set_reachable("10.0.0.2", true);
        let mut backends = mock_backends();
        backends.poll_probe = probe.clone();

        let state = AppState::new(store, Config::default(), backends);
        state.refresh_registry().await.unwrap();
        let mut changes = state.poller().subscribe();

        state.scheduler.start(Duration::from_millis(50)).await;
        assert!(state.scheduler.is_running());

        let change = tokio::time::timeout(Duration::from_secs(5), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.device_id, device.id);
        assert_eq!(change.current, DeviceStatus::Online);

        let saved = state.store.lock().await.get_device(&device.id).unwrap().unwrap();
        assert_eq!(saved.status, DeviceStatus::Online);

        state.scheduler.stop().await;
        assert!(!state.scheduler.is_running());
        assert!(probe.calls() >= 1);
    }

    #[tokio::test]
    async fn test_store_status_sink() {
        let mut store = Store::open_in_memory().unwrap();
        let device = store
            .create_device(NewDevice::new(
                "pc",
                MacAddress::new([1, 2, 3, 4, 5, 6]),
                "10.0.0.3",
            ))
            .unwrap();
        let store = Arc::new(Mutex::new(store));
        let sink = StoreStatusSink::new(store.clone());

        sink.save_status(&device.id, DeviceStatus::Online).await.unwrap();
        let saved = store.lock().await.get_device(&device.id).unwrap().unwrap();
        assert_eq!(saved.status, DeviceStatus::Online);

        let err = sink.save_status("missing", DeviceStatus::Online).await.unwrap_err();
        assert!(matches!(err, upsnap_core::Error::Store(_)));
    }
}
