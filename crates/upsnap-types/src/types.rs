//! Core record types shared by the store, the core and the service.

use core::fmt;
use core::str::FromStr;
use std::net::Ipv4Addr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::net::MacAddress;

/// Default poll interval expression.
pub const DEFAULT_INTERVAL: &str = "@every 3s";

/// Notifications are enabled unless configured otherwise.
pub const DEFAULT_NOTIFICATIONS: bool = true;

/// Default SSH port for remote shutdown.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default remote command issued over SSH.
pub const DEFAULT_SHUTDOWN_COMMAND: &str = "sudo shutdown -h now";

/// Power state of a device as last observed by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceStatus {
    /// The device answered the last reachability probe.
    Online,
    /// The device did not answer, or has not been probed yet.
    #[default]
    Offline,
}

impl DeviceStatus {
    /// Status for a probe outcome.
    #[must_use]
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable { Self::Online } else { Self::Offline }
    }

    /// Lower-case name as stored and serialized.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            other => Err(ParseError::InvalidStatus(other.to_string())),
        }
    }
}

/// How a device is shut down remotely.
///
/// Owner-supplied; the core never generates credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "method", rename_all = "snake_case"))]
pub enum ShutdownMethod {
    /// Open an SSH session (key-based, non-interactive) and run a command.
    Ssh {
        /// Remote login name.
        user: String,
        /// SSH port.
        #[cfg_attr(feature = "serde", serde(default = "default_ssh_port"))]
        port: u16,
        /// Private key file; the client's defaults are used when absent.
        #[cfg_attr(feature = "serde", serde(default))]
        identity_file: Option<String>,
        /// Command executed on the remote host.
        #[cfg_attr(feature = "serde", serde(default = "default_shutdown_command"))]
        command: String,
    },
    /// Run a local shell command that shuts the device down
    /// (for example `net rpc shutdown -I 10.0.0.5 -U user%pass`).
    Command {
        /// Shell command line.
        command: String,
    },
}

#[cfg(feature = "serde")]
fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

#[cfg(feature = "serde")]
fn default_shutdown_command() -> String {
    DEFAULT_SHUTDOWN_COMMAND.to_string()
}

/// A device record.
///
/// Everything except `status` is owner-authored configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Device {
    /// Store-assigned identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Hardware address used for Wake-on-LAN.
    pub mac: MacAddress,
    /// IP address or hostname used for probing and remote shutdown.
    pub ip: String,
    /// Netmask of the device's network, used to derive the broadcast target.
    #[cfg_attr(feature = "serde", serde(default))]
    pub netmask: Option<Ipv4Addr>,
    /// Explicit broadcast target, overrides the derived one.
    #[cfg_attr(feature = "serde", serde(default))]
    pub broadcast: Option<Ipv4Addr>,
    /// Remote shutdown configuration.
    #[cfg_attr(feature = "serde", serde(default))]
    pub shutdown: Option<ShutdownMethod>,
    /// Last observed power state.
    #[cfg_attr(feature = "serde", serde(default))]
    pub status: DeviceStatus,
}

impl Device {
    /// Address the magic packet is broadcast to.
    ///
    /// Explicit `broadcast` wins; otherwise the directed broadcast of
    /// `ip`/`netmask` when `ip` is an IPv4 literal; otherwise the limited
    /// broadcast address.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::net::Ipv4Addr;
    /// use upsnap_types::{Device, DeviceStatus};
    ///
    /// let device = Device {
    ///     id: "abc".into(),
    ///     name: "desktop".into(),
    ///     mac: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
    ///     ip: "192.168.1.20".into(),
    ///     netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
    ///     broadcast: None,
    ///     shutdown: None,
    ///     status: DeviceStatus::Offline,
    /// };
    /// assert_eq!(device.broadcast_target(), Ipv4Addr::new(192, 168, 1, 255));
    /// ```
    #[must_use]
    pub fn broadcast_target(&self) -> Ipv4Addr {
        if let Some(broadcast) = self.broadcast {
            return broadcast;
        }
        if let (Ok(ip), Some(mask)) = (self.ip.parse::<Ipv4Addr>(), self.netmask) {
            return Ipv4Addr::from(u32::from(ip) | !u32::from(mask));
        }
        Ipv4Addr::BROADCAST
    }
}

/// The singleton settings record.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Settings {
    /// Poll interval expression (`@every 3s`, `10s`, `1m 30s`).
    pub interval: String,
    /// Whether status changes are published as notifications.
    pub notifications: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL.to_string(),
            notifications: DEFAULT_NOTIFICATIONS,
        }
    }
}

/// A host found by a network scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ScanHost {
    /// Address that answered the probe.
    pub address: Ipv4Addr,
    /// Link-layer address, if the neighbor table had one.
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_mac_or_empty"))]
    pub mac: Option<MacAddress>,
}

#[cfg(feature = "serde")]
fn serialize_mac_or_empty<S: serde::Serializer>(
    mac: &Option<MacAddress>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match mac {
        Some(mac) => serializer.collect_str(mac),
        None => serializer.serialize_str(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(ip: &str) -> Device {
        Device {
            id: "d1".to_string(),
            name: "NAS".to_string(),
            mac: MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            ip: ip.to_string(),
            netmask: None,
            broadcast: None,
            shutdown: None,
            status: DeviceStatus::Offline,
        }
    }

    #[test]
    fn test_status_roundtrip() {
        assert_eq!("online".parse::<DeviceStatus>().unwrap(), DeviceStatus::Online);
        assert_eq!("offline".parse::<DeviceStatus>().unwrap(), DeviceStatus::Offline);
        assert!("pending".parse::<DeviceStatus>().is_err());
        assert_eq!(DeviceStatus::Online.to_string(), "online");
        assert_eq!(DeviceStatus::default(), DeviceStatus::Offline);
    }

    #[test]
    fn test_status_from_reachable() {
        assert_eq!(DeviceStatus::from_reachable(true), DeviceStatus::Online);
        assert_eq!(DeviceStatus::from_reachable(false), DeviceStatus::Offline);
    }

    #[test]
    fn test_broadcast_target_explicit_wins() {
        let mut d = device("10.0.0.5");
        d.netmask = Some(Ipv4Addr::new(255, 255, 255, 0));
        d.broadcast = Some(Ipv4Addr::new(10, 0, 255, 255));
        assert_eq!(d.broadcast_target(), Ipv4Addr::new(10, 0, 255, 255));
    }

    #[test]
    fn test_broadcast_target_from_netmask() {
        let mut d = device("10.1.2.3");
        d.netmask = Some(Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(d.broadcast_target(), Ipv4Addr::new(10, 1, 255, 255));
    }

    #[test]
    fn test_broadcast_target_falls_back_to_limited() {
        let mut d = device("nas.lan");
        d.netmask = Some(Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(d.broadcast_target(), Ipv4Addr::BROADCAST);
        assert_eq!(device("10.0.0.1").broadcast_target(), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.interval, "@every 3s");
        assert!(settings.notifications);
    }

    #[test]
    fn test_device_json_defaults() {
        let json = r#"{"id":"x","name":"pc","mac":"00-11-22-33-44-55","ip":"pc.lan"}"#;
        let d: Device = serde_json::from_str(json).unwrap();
        assert_eq!(d.mac.to_string(), "00:11:22:33:44:55");
        assert_eq!(d.status, DeviceStatus::Offline);
        assert!(d.shutdown.is_none());
    }

    #[test]
    fn test_shutdown_method_ssh_defaults() {
        let json = r#"{"method":"ssh","user":"admin"}"#;
        let method: ShutdownMethod = serde_json::from_str(json).unwrap();
        assert_eq!(
            method,
            ShutdownMethod::Ssh {
                user: "admin".to_string(),
                port: 22,
                identity_file: None,
                command: "sudo shutdown -h now".to_string(),
            }
        );
    }

    #[test]
    fn test_shutdown_method_command() {
        let json = r#"{"method":"command","command":"net rpc shutdown -I 10.0.0.5"}"#;
        let method: ShutdownMethod = serde_json::from_str(json).unwrap();
        assert!(matches!(method, ShutdownMethod::Command { .. }));
    }

    #[test]
    fn test_scan_host_serializes_missing_mac_as_empty() {
        let host = ScanHost {
            address: Ipv4Addr::new(192, 168, 0, 7),
            mac: None,
        };
        let json = serde_json::to_value(&host).unwrap();
        assert_eq!(json["address"], "192.168.0.7");
        assert_eq!(json["mac"], "");

        let host = ScanHost {
            address: Ipv4Addr::new(192, 168, 0, 8),
            mac: Some(MacAddress::new([1, 2, 3, 4, 5, 6])),
        };
        let json = serde_json::to_value(&host).unwrap();
        assert_eq!(json["mac"], "01:02:03:04:05:06");
    }
}
