//! Link-layer and network address types.

use core::fmt;
use core::str::FromStr;
use std::net::Ipv4Addr;

use crate::error::{ParseError, ParseResult};

/// A 6-octet IEEE 802 MAC address.
///
/// Parses from six two-digit hex octets separated by colons or hyphens
/// (`AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff`). Separators may not be mixed.
/// Always displays as upper-case, colon-separated.
///
/// # Examples
///
/// ```
/// use upsnap_types::MacAddress;
///
/// let mac: MacAddress = "aa-bb-cc-dd-ee-ff".parse().unwrap();
/// assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");
/// assert_eq!(mac.octets(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
///
/// assert!("AA:BB:CC:DD:EE".parse::<MacAddress>().is_err());
/// assert!("AA:BB-CC:DD:EE:FF".parse::<MacAddress>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Create a MAC address from raw octets.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// The raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Whether every octet is zero (incomplete neighbor table entries).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        let invalid = || ParseError::InvalidMac(s.to_string());

        let separator = if s.contains(':') { ':' } else { '-' };
        let mut parts = s.split(separator);
        let mut octets = [0u8; 6];

        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for MacAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// An IPv4 CIDR range such as `192.168.1.0/24`.
///
/// The stored network address is normalized (host bits cleared), so
/// `192.168.1.77/24` and `192.168.1.0/24` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    /// Create a subnet from any address inside it and a prefix length.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> ParseResult<Self> {
        if prefix > 32 {
            return Err(ParseError::InvalidSubnet {
                input: format!("{addr}/{prefix}"),
                reason: "prefix length must be between 0 and 32".to_string(),
            });
        }
        let network = Ipv4Addr::from(u32::from(addr) & Self::mask_bits(prefix));
        Ok(Self { network, prefix })
    }

    fn mask_bits(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        }
    }

    /// The network address.
    #[must_use]
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// The prefix length.
    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// The netmask (e.g. `255.255.255.0` for /24).
    #[must_use]
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(Self::mask_bits(self.prefix))
    }

    /// The directed broadcast address.
    #[must_use]
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !Self::mask_bits(self.prefix))
    }

    /// Whether `addr` lies inside this range.
    #[must_use]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask_bits(self.prefix) == u32::from(self.network)
    }

    /// Number of usable host addresses.
    ///
    /// Network and broadcast addresses are excluded except for /31 and /32,
    /// where every address is a host.
    #[must_use]
    pub fn host_count(&self) -> u64 {
        let total = 1u64 << (32 - u32::from(self.prefix));
        if self.prefix >= 31 { total } else { total - 2 }
    }

    /// Iterate over usable host addresses in ascending order.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        let network = u64::from(u32::from(self.network));
        let broadcast = u64::from(u32::from(self.broadcast()));
        let (first, last) = if self.prefix >= 31 {
            (network, broadcast)
        } else {
            (network + 1, broadcast - 1)
        };
        // Values are bounded by u32::MAX, the truncation is lossless.
        (first..=last).map(|n| Ipv4Addr::from(n as u32))
    }
}

impl FromStr for Subnet {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        let invalid = |reason: &str| ParseError::InvalidSubnet {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| invalid("expected CIDR notation like 192.168.1.0/24"))?;
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| invalid("not an IPv4 address"))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| invalid("prefix length is not a number"))?;

        Self::new(addr, prefix).map_err(|_| invalid("prefix length must be between 0 and 32"))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Subnet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Subnet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
