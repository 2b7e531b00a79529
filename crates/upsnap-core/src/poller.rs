//! Device status polling.
//!
//! [`StatusPoller::tick`] probes every device in the registry snapshot and
//! writes back the statuses that changed. [`Scheduler`] runs ticks as a
//! single recurring, cancellable job.
//!
//! # Scheduling
//!
//! The job loop awaits a whole tick before waiting for the next interval
//! tick, and missed ticks are delayed rather than bursted, so two ticks
//! never run at the same time. Start, stop and reconfigure are serialized;
//! after any sequence of them at most one job is registered.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use upsnap_core::{DeviceRegistry, Scheduler, StatusPoller, TcpProbe};
//! # use upsnap_core::StatusSink;
//!
//! # async fn example(sink: Arc<dyn StatusSink>) {
//! let registry = Arc::new(DeviceRegistry::new());
//! let probe = Arc::new(TcpProbe::new(vec![22], Duration::from_secs(1)));
//! let poller = Arc::new(StatusPoller::new(registry, probe, sink));
//!
//! let scheduler = Scheduler::new(poller);
//! scheduler.start(Duration::from_secs(3)).await;
//! // ...
//! scheduler.stop().await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use upsnap_types::{Device, DeviceStatus};

use crate::error::Result;
use crate::jobs::{Job, JobId, JobRegistry};
use crate::probe::Probe;
use crate::registry::DeviceRegistry;

/// Default number of devices probed at once.
pub const DEFAULT_POLL_CONCURRENCY: usize = 32;

/// Capacity of the status change channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Persists device statuses.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Store `status` for the device `id`.
    async fn save_status(&self, id: &str, status: DeviceStatus) -> Result<()>;
}

/// A device whose status changed during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    /// Device identifier.
    pub device_id: String,
    /// Device display name.
    pub name: String,
    /// Status in the snapshot before the tick.
    pub previous: DeviceStatus,
    /// Status observed by the tick.
    pub current: DeviceStatus,
}

/// Outcome of one poll tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Devices that answered.
    pub online: usize,
    /// Devices that did not answer.
    pub offline: usize,
    /// Status changes that were written to the store.
    pub changes: Vec<StatusChange>,
    /// Status changes that could not be written.
    pub write_failures: usize,
}

/// Probes registered devices and records their status.
pub struct StatusPoller {
    registry: Arc<DeviceRegistry>,
    probe: Arc<dyn Probe>,
    sink: Arc<dyn StatusSink>,
    concurrency: usize,
    notifications: AtomicBool,
    events: broadcast::Sender<StatusChange>,
}

impl std::fmt::Debug for StatusPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPoller")
            .field("devices", &self.registry.len())
            .field("concurrency", &self.concurrency)
            .field("notifications", &self.notifications())
            .finish_non_exhaustive()
    }
}

impl StatusPoller {
    /// Create a poller.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        probe: Arc<dyn Probe>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            probe,
            sink,
            concurrency: DEFAULT_POLL_CONCURRENCY,
            notifications: AtomicBool::new(true),
            events,
        }
    }

    /// Set how many devices are probed at once (at least 1).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Enable or disable publishing of status changes.
    pub fn set_notifications(&self, enabled: bool) {
        self.notifications.store(enabled, Ordering::Relaxed);
    }

    /// Whether status changes are published.
    pub fn notifications(&self) -> bool {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Receive status changes as they are recorded.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.events.subscribe()
    }

    /// The registry this poller reads.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Run one poll cycle over the current snapshot.
    pub async fn tick(&self) -> TickReport {
        let snapshot = self.registry.snapshot();
        debug!("Polling {} devices", snapshot.len());

        let results: Vec<(Device, DeviceStatus)> = stream::iter(snapshot.iter().cloned())
            .map(|device: Device| {
                let probe = Arc::clone(&self.probe);
                async move {
                    let result = probe.probe(&device.ip).await;
                    if let Err(e) = &result {
                        debug!("{} ({}) unreachable: {}", device.name, device.ip, e);
                    }
                    let status = DeviceStatus::from_reachable(result.is_ok());
                    (device, status)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = TickReport::default();
        for (device, status) in results {
            match status {
                DeviceStatus::Online => report.online += 1,
                DeviceStatus::Offline => report.offline += 1,
            }
            if status == device.status {
                continue;
            }

            if let Err(e) = self.sink.save_status(&device.id, status).await {
                warn!("Failed to save status of {}: {}", device.name, e);
                report.write_failures += 1;
                continue;
            }

            info!("{} is now {}", device.name, status);
            let change = StatusChange {
                device_id: device.id.clone(),
                name: device.name.clone(),
                previous: device.status,
                current: status,
            };
            if self.notifications() {
                // No receivers is fine
                let _ = self.events.send(change.clone());
            }
            report.changes.push(change);
        }

        debug!(
            "Tick done: {} online, {} offline, {} changed",
            report.online,
            report.offline,
            report.changes.len()
        );
        report
    }
}

/// Runs the status poller as a recurring job.
#[derive(Debug)]
pub struct Scheduler {
    poller: Arc<StatusPoller>,
    jobs: JobRegistry,
    lifecycle: Mutex<()>,
}

impl Scheduler {
    /// Create a stopped scheduler.
    pub fn new(poller: Arc<StatusPoller>) -> Self {
        Self {
            poller,
            jobs: JobRegistry::new(),
            lifecycle: Mutex::new(()),
        }
    }

    /// The poller driven by this scheduler.
    pub fn poller(&self) -> &Arc<StatusPoller> {
        &self.poller
    }

    /// Registered jobs.
    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Whether a poll job is registered.
    pub fn is_running(&self) -> bool {
        !self.jobs.is_empty()
    }

    /// Start polling every `period`, replacing any running job.
    pub async fn start(&self, period: Duration) -> JobId {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await;
        self.spawn(period)
    }

    /// Stop polling. Idempotent.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    /// Stop every job, then start one with the new period.
    pub async fn reconfigure(&self, period: Duration) -> JobId {
        info!("Reconfiguring poller with interval {:?}", period);
        self.start(period).await
    }

    async fn stop_locked(&self) {
        for handle in self.jobs.remove_all() {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                error!("Poll job panicked: {}", e);
            }
        }
    }

    fn spawn(&self, period: Duration) -> JobId {
        let id = JobId::new();
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_job(
            Arc::clone(&self.poller),
            period,
            token.clone(),
            id,
        ));
        self.jobs.add(id, Job::new(token, handle));
        info!("Poll job {} started with interval {:?}", id, period);
        id
    }
}

async fn run_job(
    poller: Arc<StatusPoller>,
    period: Duration,
    cancel: CancellationToken,
    id: JobId,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = poller.tick() => {}
                }
            }
        }
    }
    debug!("Poll job {} stopped", id);
}
