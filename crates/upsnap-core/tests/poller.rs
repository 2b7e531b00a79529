//! End-to-end tests of the poller, scheduler, wake sender and scanner,
//! using the mock network boundaries.
//!
//! Timing tests run with paused tokio time, so they are deterministic and
//! do not actually sleep.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{Instant, sleep};

use upsnap_core::mock::{MockNeighbors, MockProbe, MockStatusSink, MockTransport};
use upsnap_core::{
    Device, DeviceRegistry, DeviceStatus, MacAddress, ScanOptions, Scanner, Scheduler,
    StatusPoller, WakeSender,
};

fn device(id: &str, ip: &str) -> Device {
    Device {
        id: id.to_string(),
        name: format!("host-{id}"),
        mac: MacAddress::new([0x02, 0, 0, 0, 0, id.len() as u8]),
        ip: ip.to_string(),
        netmask: None,
        broadcast: None,
        shutdown: None,
        status: DeviceStatus::Offline,
    }
}

fn poller_with(devices: Vec<Device>) -> (Arc<DeviceRegistry>, Arc<MockProbe>, Arc<StatusPoller>) {
    let registry = Arc::new(DeviceRegistry::with_devices(devices));
    let probe = Arc::new(MockProbe::new());
    let sink = Arc::new(MockStatusSink::with_registry(registry.clone()));
    let poller = Arc::new(StatusPoller::new(registry.clone(), probe.clone(), sink));
    (registry, probe, poller)
}

#[tokio::test]
async fn test_one_unreachable_device_goes_offline() {
    let (registry, probe, poller) = poller_with(vec![
        device("a", "192.168.1.10"),
        device("b", "192.168.1.11"),
        device("c", "192.168.1.12"),
    ]);
    probe.set_reachable("192.168.1.10", true);
    probe.set_reachable("192.168.1.12", true);

    poller.tick().await;

    let offline: Vec<_> = registry
        .snapshot()
        .iter()
        .filter(|d| d.status == DeviceStatus::Offline)
        .map(|d| d.id.clone())
        .collect();
    assert_eq!(offline, vec!["b"]);
}

#[tokio::test]
async fn test_device_going_down_is_detected() {
    let (registry, probe, poller) = poller_with(vec![device("a", "192.168.1.10")]);
    probe.set_reachable("192.168.1.10", true);
    poller.tick().await;
    assert_eq!(registry.snapshot()[0].status, DeviceStatus::Online);

    probe.set_reachable("192.168.1.10", false);
    let report = poller.tick().await;
    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].previous, DeviceStatus::Online);
    assert_eq!(registry.snapshot()[0].status, DeviceStatus::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_ticks_never_overlap() {
    let (_registry, probe, poller) = poller_with(vec![device("slow", "192.168.1.50")]);
    // Each tick takes five intervals
    probe.set_latency(Duration::from_secs(5));

    let scheduler = Scheduler::new(poller);
    scheduler.start(Duration::from_secs(1)).await;
    sleep(Duration::from_secs(16)).await;
    scheduler.stop().await;

    assert_eq!(probe.max_in_flight(), 1);
    let calls = probe.calls();
    assert!((3..=4).contains(&calls), "unexpected tick count {calls}");
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_reconfigure_leaves_one_job() {
    let (_registry, _probe, poller) = poller_with(vec![device("a", "192.168.1.10")]);
    let scheduler = Arc::new(Scheduler::new(poller));
    scheduler.start(Duration::from_secs(3)).await;

    let calls = (1..=8u64).map(|secs| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.reconfigure(Duration::from_secs(secs)).await })
    });
    let ids: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(ids.len(), 8);
    assert_eq!(scheduler.jobs().len(), 1);
    assert!(ids.contains(&scheduler.jobs().entries()[0]));

    scheduler.stop().await;
    assert!(scheduler.jobs().is_empty());
}

#[tokio::test]
async fn test_wake_sends_magic_packet() {
    let sender = WakeSender::with_transport(MockTransport::new());
    sender
        .wake("AA:BB:CC:DD:EE:FF", Ipv4Addr::new(10, 0, 0, 255))
        .await
        .unwrap();

    let sent = sender.transport().sent();
    assert_eq!(sent.len(), 1);
    let (target, payload) = &sent[0];
    assert_eq!(*target, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 255), 9));

    let hex: String = payload.iter().map(|b| format!("{b:02X}")).collect();
    assert_eq!(hex, format!("FFFFFFFFFFFF{}", "AABBCCDDEEFF".repeat(16)));
}

#[tokio::test(start_paused = true)]
async fn test_scan_finishes_within_timeout() {
    let probe = Arc::new(MockProbe::new());
    probe.set_latency(Duration::from_secs(2));
    probe.set_reachable("172.16.5.1", true);

    let timeout = Duration::from_secs(5);
    let scanner = Scanner::with_neighbors(
        probe,
        MockNeighbors::default(),
        ScanOptions::default().timeout(timeout).concurrency(16),
    );

    let started = Instant::now();
    let report = scanner
        .scan(&"172.16.5.0/24".parse().unwrap())
        .await
        .unwrap();

    assert!(started.elapsed() <= timeout + Duration::from_millis(100));
    assert!(report.timed_out);
    assert!(report.hosts.len() <= 254);
    assert_eq!(report.hosts.len(), 1);
    assert_eq!(report.hosts[0].mac, None);
}
