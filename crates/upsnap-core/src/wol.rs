//! Wake-on-LAN magic packets.
//!
//! A magic packet is six `0xFF` bytes followed by the target MAC address
//! repeated sixteen times, sent as a single UDP broadcast datagram. There is
//! no acknowledgment; a successful send is all that can be observed.
//!
//! # Example
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use upsnap_core::WakeSender;
//!
//! # async fn example() -> upsnap_core::Result<()> {
//! let sender = WakeSender::new();
//! sender.wake("AA:BB:CC:DD:EE:FF", Ipv4Addr::new(192, 168, 1, 255)).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use upsnap_types::{Device, MacAddress};

use crate::error::{Error, Result};

/// Conventional Wake-on-LAN UDP port (discard).
pub const WOL_PORT: u16 = 9;

/// Size of a magic packet payload in bytes.
pub const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

/// A Wake-on-LAN magic packet payload.
#[derive(Clone, PartialEq, Eq)]
pub struct MagicPacket([u8; MAGIC_PACKET_LEN]);

impl MagicPacket {
    /// Build the packet for `mac`.
    #[must_use]
    pub fn new(mac: MacAddress) -> Self {
        let mut payload = [0xFF; MAGIC_PACKET_LEN];
        let octets = mac.octets();
        for chunk in payload[6..].chunks_exact_mut(6) {
            chunk.copy_from_slice(&octets);
        }
        Self(payload)
    }

    /// The raw payload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Upper-case hex encoding of the payload.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02X}")).collect()
    }
}

impl fmt::Debug for MagicPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MagicPacket").field(&self.to_hex()).finish()
    }
}

/// Datagram transport used to emit magic packets.
///
/// Abstracted so tests can observe sends without touching the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `payload` as a single broadcast datagram to `target`.
    async fn send_broadcast(&self, payload: &[u8], target: SocketAddrV4) -> Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_broadcast(&self, payload: &[u8], target: SocketAddrV4) -> Result<()> {
        (**self).send_broadcast(payload, target).await
    }
}

/// UDP transport bound to an ephemeral port with `SO_BROADCAST` set.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpTransport;

#[async_trait]
impl Transport for UdpTransport {
    async fn send_broadcast(&self, payload: &[u8], target: SocketAddrV4) -> Result<()> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        let sent = socket.send_to(payload, target).await?;
        if sent != payload.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short datagram: sent {sent} of {} bytes", payload.len()),
            )));
        }
        Ok(())
    }
}

/// Sends Wake-on-LAN magic packets.
#[derive(Debug, Clone)]
pub struct WakeSender<T = UdpTransport> {
    transport: T,
    port: u16,
}

impl WakeSender<UdpTransport> {
    /// Create a sender using a real UDP socket.
    pub fn new() -> Self {
        Self::with_transport(UdpTransport)
    }
}

impl Default for WakeSender<UdpTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> WakeSender<T> {
    /// Create a sender with a custom transport.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            port: WOL_PORT,
        }
    }

    /// Override the destination port (some NICs listen on 7).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Access the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Parse `mac` and broadcast a magic packet for it to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] without sending anything if `mac` is
    /// malformed, or an I/O error if the datagram could not be sent.
    pub async fn wake(&self, mac: &str, target: Ipv4Addr) -> Result<()> {
        let mac: MacAddress = mac.parse()?;
        self.wake_mac(mac, target).await
    }

    /// Broadcast a magic packet for an already parsed address.
    pub async fn wake_mac(&self, mac: MacAddress, target: Ipv4Addr) -> Result<()> {
        let packet = MagicPacket::new(mac);
        let destination = SocketAddrV4::new(target, self.port);
        debug!("Sending magic packet for {} to {}", mac, destination);
        self.transport
            .send_broadcast(packet.as_bytes(), destination)
            .await
    }

    /// Wake a device record, broadcasting to its resolved target.
    pub async fn wake_device(&self, device: &Device) -> Result<()> {
        let target = device.broadcast_target();
        self.wake_mac(device.mac, target).await?;
        info!(
            "Sent wake packet to {} ({}) via {}",
            device.name, device.mac, target
        );
        Ok(())
    }
}
