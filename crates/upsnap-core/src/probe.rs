//! Reachability probes.
//!
//! The poller and the scanner only need a yes/no answer per host, so both are
//! written against the [`Probe`] trait. Two implementations are provided:
//!
//! - [`IcmpProbe`]: ICMP echo via `surge-ping`. Needs either `CAP_NET_RAW` or
//!   an unprivileged ICMP socket (`net.ipv4.ping_group_range` on Linux).
//! - [`TcpProbe`]: TCP connect to a list of ports. A refused connection still
//!   proves the host is up.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::select_ok;
use serde::{Deserialize, Serialize};
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Ports tried by [`TcpProbe`] when none are configured.
pub const DEFAULT_TCP_PORTS: &[u16] = &[22, 80, 443, 445, 3389];

/// A host reachability check.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Return `Ok(())` if `host` (IP literal or hostname) answered in time.
    async fn probe(&self, host: &str) -> Result<()>;
}

#[async_trait]
impl<P: Probe + ?Sized> Probe for Arc<P> {
    async fn probe(&self, host: &str) -> Result<()> {
        (**self).probe(host).await
    }
}

/// Which probe implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// ICMP echo request.
    #[default]
    Icmp,
    /// TCP connect.
    Tcp,
}

/// Build a shared probe of the requested kind.
pub fn build_probe(
    kind: ProbeKind,
    probe_timeout: Duration,
    tcp_ports: &[u16],
) -> Result<Arc<dyn Probe>> {
    Ok(match kind {
        ProbeKind::Icmp => Arc::new(IcmpProbe::new(probe_timeout)?),
        ProbeKind::Tcp => Arc::new(TcpProbe::new(tcp_ports.to_vec(), probe_timeout)),
    })
}

/// Resolve an IP literal or hostname to its first address.
pub async fn resolve_host(host: &str) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| Error::probe(host, format!("name resolution failed: {e}")))?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::probe(host, "name resolved to no addresses"))
}

/// Echo sequence numbers, unique per request until they wrap.
///
/// The kernel rewrites the identifier on unprivileged ICMP sockets, so two
/// pings to the same address are told apart by sequence only.
#[derive(Debug, Default)]
struct SequenceCounter(AtomicU16);

impl SequenceCounter {
    fn next(&self) -> PingSequence {
        PingSequence(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// ICMP echo probe.
pub struct IcmpProbe {
    v4: Client,
    v6: Option<Client>,
    timeout: Duration,
    sequence: SequenceCounter,
}

impl std::fmt::Debug for IcmpProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcmpProbe")
            .field("ipv6", &self.v6.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl IcmpProbe {
    /// Open the ICMP sockets.
    ///
    /// # Errors
    ///
    /// Fails if the process may not open an IPv4 ICMP socket. IPv6 is
    /// optional; hosts resolving to IPv6 then fail to probe.
    pub fn new(timeout: Duration) -> Result<Self> {
        let v4 = Client::new(&Config::default())
            .map_err(|e| Error::config(format!("cannot open ICMP socket: {e}")))?;
        let v6 = match Client::new(&Config::builder().kind(ICMP::V6).build()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("IPv6 ICMP unavailable, IPv6 hosts will report offline: {}", e);
                None
            }
        };
        Ok(Self {
            v4,
            v6,
            timeout,
            sequence: SequenceCounter::default(),
        })
    }
}

#[async_trait]
impl Probe for IcmpProbe {
    async fn probe(&self, host: &str) -> Result<()> {
        let ip = timeout(self.timeout, resolve_host(host))
            .await
            .map_err(|_| Error::probe_timeout(host, self.timeout))??;

        let client = match ip {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => self
                .v6
                .as_ref()
                .ok_or_else(|| Error::probe(host, "IPv6 ICMP socket unavailable"))?,
        };

        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout);

        match pinger.ping(self.sequence.next(), &[0; 8]).await {
            Ok((_reply, rtt)) => {
                debug!("{} answered in {:?}", host, rtt);
                Ok(())
            }
            Err(SurgeError::Timeout { .. }) => Err(Error::probe_timeout(host, self.timeout)),
            Err(e) => Err(Error::probe(host, e.to_string())),
        }
    }
}

/// TCP connect probe.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    ports: Vec<u16>,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe the given ports (falls back to [`DEFAULT_TCP_PORTS`] when empty).
    pub fn new(ports: Vec<u16>, timeout: Duration) -> Self {
        let ports = if ports.is_empty() {
            DEFAULT_TCP_PORTS.to_vec()
        } else {
            ports
        };
        Self { ports, timeout }
    }

    /// Ports this probe connects to.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, host: &str) -> Result<()> {
        let attempt = async {
            let ip = resolve_host(host).await?;
            let connects = self.ports.iter().map(|&port| {
                Box::pin(async move {
                    match TcpStream::connect((ip, port)).await {
                        Ok(_) => Ok(()),
                        // A reset means something answered.
                        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => Ok(()),
                        Err(e) => Err(Error::probe(host, format!("port {port}: {e}"))),
                    }
                })
            });
            select_ok(connects).await.map(|_| ())
        };

        timeout(self.timeout, attempt)
            .await
            .map_err(|_| Error::probe_timeout(host, self.timeout))?
    }
}
