//! Network scanning.
//!
//! A scan probes every host address in an IPv4 subnet with bounded
//! concurrency and then looks the responders up in the local neighbor (ARP)
//! table to find their MAC addresses. Probing a host first is what
//! populates the neighbor table, so the lookup happens after the sweep.
//!
//! The whole sweep is bounded by [`ScanOptions::timeout`]. When the deadline
//! passes, outstanding probes are dropped and the hosts found so far are
//! returned with [`ScanReport::timed_out`] set.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use upsnap_types::{MacAddress, ScanHost, Subnet};

use crate::error::{Error, Result};
use crate::probe::Probe;

/// Narrowest prefix accepted by default (a /16 is 65 534 hosts).
pub const MIN_SCAN_PREFIX: u8 = 16;

/// Prefix used when the local interface network is wider than this.
const DEFAULT_SCAN_PREFIX: u8 = 24;

/// Options for a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Total time allowed for the sweep.
    pub timeout: Duration,
    /// Maximum number of probes in flight.
    pub concurrency: usize,
    /// Reject subnets with a shorter prefix than this.
    pub min_prefix: u8,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            concurrency: 64,
            min_prefix: MIN_SCAN_PREFIX,
        }
    }
}

impl ScanOptions {
    /// Set the total timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the probe concurrency (at least 1).
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Result of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Responding hosts, ordered by address.
    pub hosts: Vec<ScanHost>,
    /// Whether the deadline passed before every address was probed.
    pub timed_out: bool,
}

/// Source of IP to MAC mappings.
pub trait NeighborTable: Send + Sync {
    /// Current complete entries.
    fn entries(&self) -> Result<HashMap<Ipv4Addr, MacAddress>>;
}

impl<N: NeighborTable + ?Sized> NeighborTable for Arc<N> {
    fn entries(&self) -> Result<HashMap<Ipv4Addr, MacAddress>> {
        (**self).entries()
    }
}

/// Reads the kernel neighbor table from `/proc/net/arp`.
///
/// On platforms without that file the table is always empty.
#[derive(Debug, Clone)]
pub struct ProcNetArp {
    path: PathBuf,
}

impl Default for ProcNetArp {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/net/arp"),
        }
    }
}

impl ProcNetArp {
    /// Read from a different file with the same format.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NeighborTable for ProcNetArp {
    fn entries(&self) -> Result<HashMap<Ipv4Addr, MacAddress>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(parse_arp_table(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Parse the `/proc/net/arp` format.
///
/// ```text
/// IP address       HW type     Flags       HW address            Mask     Device
/// 192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:ff     *        eth0
/// ```
///
/// Incomplete entries (flags `0x0` or an all-zero address) are skipped.
pub fn parse_arp_table(contents: &str) -> HashMap<Ipv4Addr, MacAddress> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let ip = fields.next()?.parse::<Ipv4Addr>().ok()?;
            let _hw_type = fields.next()?;
            let flags = fields.next()?;
            let mac = fields.next()?.parse::<MacAddress>().ok()?;
            (flags != "0x0" && !mac.is_zero()).then_some((ip, mac))
        })
        .collect()
}

/// Subnet of the default network interface, narrowed to a /24 around the
/// interface address when the network is wider than that.
pub fn default_subnet() -> Result<Subnet> {
    let iface = netdev::get_default_interface()
        .map_err(|e| Error::config(format!("no default network interface: {e}")))?;
    let net = iface.ipv4.first().ok_or_else(|| {
        Error::config(format!("interface {} has no IPv4 address", iface.name))
    })?;

    let prefix = net.prefix_len().max(DEFAULT_SCAN_PREFIX);
    let subnet = Subnet::new(net.addr(), prefix)?;
    debug!("Default scan range {} from interface {}", subnet, iface.name);
    Ok(subnet)
}

/// Sweeps subnets for responding hosts.
pub struct Scanner<N = ProcNetArp> {
    probe: Arc<dyn Probe>,
    neighbors: N,
    options: ScanOptions,
}

impl<N: std::fmt::Debug> std::fmt::Debug for Scanner<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("neighbors", &self.neighbors)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Scanner<ProcNetArp> {
    /// Scanner reading MACs from the kernel neighbor table.
    pub fn new(probe: Arc<dyn Probe>, options: ScanOptions) -> Self {
        Self::with_neighbors(probe, ProcNetArp::default(), options)
    }
}

impl<N: NeighborTable> Scanner<N> {
    /// Scanner with a custom neighbor table.
    pub fn with_neighbors(probe: Arc<dyn Probe>, neighbors: N, options: ScanOptions) -> Self {
        Self {
            probe,
            neighbors,
            options,
        }
    }

    /// Options in use.
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Probe every host address in `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the subnet is wider than
    /// [`ScanOptions::min_prefix`] allows. Individual probe failures only
    /// mean the host is absent from the report.
    pub async fn scan(&self, subnet: &Subnet) -> Result<ScanReport> {
        if subnet.prefix() < self.options.min_prefix {
            return Err(Error::invalid_address(format!(
                "subnet {subnet} is too large to scan (minimum prefix /{})",
                self.options.min_prefix
            )));
        }

        info!("Scanning {} ({} addresses)", subnet, subnet.host_count());
        let started = Instant::now();

        let probe = &self.probe;
        let mut probes = stream::iter(subnet.hosts())
            .map(|addr| async move {
                let reachable = probe.probe(&addr.to_string()).await.is_ok();
                (addr, reachable)
            })
            .buffer_unordered(self.options.concurrency.max(1));

        let deadline = sleep(self.options.timeout);
        tokio::pin!(deadline);

        let mut alive = Vec::new();
        let mut timed_out = false;
        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    timed_out = true;
                    break;
                }
                next = probes.next() => match next {
                    Some((addr, true)) => alive.push(addr),
                    Some((_, false)) => {}
                    None => break,
                },
            }
        }
        drop(probes);

        if timed_out {
            warn!(
                "Scan of {} timed out after {:?}, returning {} partial results",
                subnet,
                self.options.timeout,
                alive.len()
            );
        }

        let table = self.neighbors.entries().unwrap_or_else(|e| {
            warn!("Could not read neighbor table: {}", e);
            HashMap::new()
        });

        alive.sort();
        let hosts: Vec<ScanHost> = alive
            .into_iter()
            .map(|address| ScanHost {
                address,
                mac: table.get(&address).copied(),
            })
            .collect();

        info!(
            "Scan of {} found {} hosts in {:?}",
            subnet,
            hosts.len(),
            started.elapsed()
        );
        Ok(ScanReport { hosts, timed_out })
    }
}
