//! Device monitoring and power control for UpSnap.
//!
//! This crate tracks the power state of LAN devices and wakes or shuts them
//! down on demand.
//!
//! # Features
//!
//! - **Wake-on-LAN**: Build and broadcast magic packets
//! - **Remote shutdown**: SSH or local-command shutdown with classified errors
//! - **Status polling**: Probe every registered device on a configurable interval
//! - **Network scanning**: Sweep a subnet and resolve MACs from the neighbor table
//! - **Probes**: ICMP echo or TCP connect reachability checks
//! - **Settings**: Environment > stored > default resolution of poll settings
//!
//! # Components
//!
//! | Component | Type |
//! |-----------|------|
//! | Device Registry | [`DeviceRegistry`] |
//! | Job Registry | [`JobRegistry`] |
//! | Status Poller / Scheduler | [`StatusPoller`], [`Scheduler`] |
//! | Wake Sender | [`WakeSender`] |
//! | Shutdown Dispatcher | [`ShutdownDispatcher`] |
//! | Network Scanner | [`Scanner`] |
//!
//! The record store is not part of this crate. The poller writes through the
//! [`StatusSink`] trait and the registry is refreshed by whoever owns the
//! store.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use upsnap_core::{ProbeKind, ScanOptions, Scanner, WakeSender, build_probe};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Wake a machine
//!     let sender = WakeSender::new();
//!     sender.wake("AA:BB:CC:DD:EE:FF", "192.168.1.255".parse()?).await?;
//!
//!     // Find hosts on the local network
//!     let probe = build_probe(ProbeKind::Tcp, Duration::from_millis(500), &[])?;
//!     let scanner = Scanner::new(probe, ScanOptions::default());
//!     let report = scanner.scan(&"192.168.1.0/24".parse()?).await?;
//!     println!("Found {} hosts", report.hosts.len());
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod interval;
pub mod jobs;
pub mod mock;
pub mod poller;
pub mod probe;
pub mod registry;
pub mod scan;
pub mod settings;
pub mod shutdown;
pub mod wol;

pub use error::{Error, Result};
pub use interval::parse_interval;
pub use jobs::{Job, JobId, JobRegistry};
pub use poller::{
    DEFAULT_POLL_CONCURRENCY, Scheduler, StatusChange, StatusPoller, StatusSink, TickReport,
};
pub use probe::{
    DEFAULT_PROBE_TIMEOUT, DEFAULT_TCP_PORTS, IcmpProbe, Probe, ProbeKind, TcpProbe, build_probe,
    resolve_host,
};
pub use registry::DeviceRegistry;
pub use scan::{
    MIN_SCAN_PREFIX, NeighborTable, ProcNetArp, ScanOptions, ScanReport, Scanner, default_subnet,
    parse_arp_table,
};
pub use settings::{
    ENV_INTERVAL, ENV_NOTIFICATIONS, EnvOverrides, ResolvedSettings, parse_bool, resolve,
    resolve_settings,
};
pub use shutdown::{
    CommandOutput, CommandRunner, DEFAULT_SHUTDOWN_TIMEOUT, ProcessRunner, ShutdownDispatcher,
};
pub use wol::{MAGIC_PACKET_LEN, MagicPacket, Transport, UdpTransport, WOL_PORT, WakeSender};

// Re-export types for convenience
pub use upsnap_types::{
    Device, DeviceStatus, MacAddress, ScanHost, Settings, ShutdownMethod, Subnet,
};
