//! Test doubles for the network boundaries.
//!
//! Each mock implements one of the core's I/O traits so that the wake
//! sender, shutdown dispatcher, scanner and poller can be exercised without
//! sockets or child processes.
//!
//! # Features
//!
//! - **Recording**: every mock keeps a log of what it was asked to do
//! - **Failure injection**: transports, runners and sinks can be told to fail
//! - **Latency simulation**: probes and runners can sleep before answering,
//!   which combines with paused tokio time for deterministic timing tests

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use upsnap_types::{Device, DeviceStatus, MacAddress};

use crate::error::{Error, Result};
use crate::poller::StatusSink;
use crate::probe::Probe;
use crate::registry::DeviceRegistry;
use crate::scan::NeighborTable;
use crate::shutdown::{CommandOutput, CommandRunner};
use crate::wol::Transport;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Records datagrams instead of sending them.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(SocketAddrV4, Vec<u8>)>>,
    should_fail: AtomicBool,
}

impl MockTransport {
    /// Create a transport that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Datagrams sent so far.
    pub fn sent(&self) -> Vec<(SocketAddrV4, Vec<u8>)> {
        lock(&self.sent).clone()
    }

    /// Make subsequent sends fail with an I/O error.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_broadcast(&self, payload: &[u8], target: SocketAddrV4) -> Result<()> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "mock transport failure",
            )));
        }
        lock(&self.sent).push((target, payload.to_vec()));
        Ok(())
    }
}

/// Probe answering from a fixed set of reachable hosts.
///
/// Unknown hosts are unreachable.
#[derive(Debug, Default)]
pub struct MockProbe {
    reachable: Mutex<HashSet<String>>,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProbe {
    /// Create a probe for which every host is unreachable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `host` reachable or unreachable.
    pub fn set_reachable(&self, host: &str, reachable: bool) {
        let mut hosts = lock(&self.reachable);
        if reachable {
            hosts.insert(host.to_string());
        } else {
            hosts.remove(host);
        }
    }

    /// Delay every answer by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Number of probes started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of probes that were running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for MockProbe {
    async fn probe(&self, host: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if lock(&self.reachable).contains(host) {
            Ok(())
        } else {
            Err(Error::probe_timeout(host, latency))
        }
    }
}

/// Records command invocations and returns a canned output.
#[derive(Debug, Default)]
pub struct MockRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    output: Mutex<Option<CommandOutput>>,
    latency: Mutex<Duration>,
}

impl MockRunner {
    /// Create a runner whose commands succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Output returned by subsequent runs.
    pub fn set_output(&self, output: CommandOutput) {
        *lock(&self.output) = Some(output);
    }

    /// Delay every run by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Invocations so far.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        lock(&self.calls).push((program.to_string(), args.to_vec()));

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        Ok(lock(&self.output).clone().unwrap_or(CommandOutput {
            status: Some(0),
            ..CommandOutput::default()
        }))
    }
}

/// Fixed neighbor table.
#[derive(Debug, Default, Clone)]
pub struct MockNeighbors {
    table: HashMap<Ipv4Addr, MacAddress>,
}

impl MockNeighbors {
    /// Use `table` as the neighbor table contents.
    pub fn from_table(table: HashMap<Ipv4Addr, MacAddress>) -> Self {
        Self { table }
    }
}

impl NeighborTable for MockNeighbors {
    fn entries(&self) -> Result<HashMap<Ipv4Addr, MacAddress>> {
        Ok(self.table.clone())
    }
}

/// Records status writes.
///
/// When built with [`MockStatusSink::with_registry`], successful writes are
/// also applied to the registry snapshot, as the store change hook does in
/// the running service.
#[derive(Debug, Default)]
pub struct MockStatusSink {
    writes: Mutex<Vec<(String, DeviceStatus)>>,
    registry: Option<Arc<DeviceRegistry>>,
    should_fail: AtomicBool,
}

impl MockStatusSink {
    /// Create a sink that only records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that also updates `registry`.
    pub fn with_registry(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry: Some(registry),
            ..Self::default()
        }
    }

    /// Successful writes so far.
    pub fn writes(&self) -> Vec<(String, DeviceStatus)> {
        lock(&self.writes).clone()
    }

    /// Make subsequent writes fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl StatusSink for MockStatusSink {
    async fn save_status(&self, id: &str, status: DeviceStatus) -> Result<()> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::store("mock store unavailable"));
        }
        lock(&self.writes).push((id.to_string(), status));

        if let Some(registry) = &self.registry {
            let devices: Vec<Device> = registry
                .snapshot()
                .iter()
                .cloned()
                .map(|mut d| {
                    if d.id == id {
                        d.status = status;
                    }
                    d
                })
                .collect();
            registry.replace(devices);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_probe_defaults_unreachable() {
        let probe = MockProbe::new();
        assert!(probe.probe("10.0.0.1").await.is_err());
        probe.set_reachable("10.0.0.1", true);
        assert!(probe.probe("10.0.0.1").await.is_ok());
        probe.set_reachable("10.0.0.1", false);
        assert!(probe.probe("10.0.0.1").await.is_err());
        assert_eq!(probe.calls(), 3);
        assert_eq!(probe.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_mock_runner_default_success() {
        let runner = MockRunner::new();
        let output = runner.run("ssh", &["host".to_string()]).await.unwrap();
        assert!(output.success());
        assert_eq!(runner.calls().len(), 1);
    }
}
