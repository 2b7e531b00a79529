//! Record input types and change notifications.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use upsnap_types::{Device, DeviceStatus, MacAddress, ShutdownMethod};

use crate::error::{Error, Result};

/// Owner-authored fields of a device, used to create or update a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDevice {
    /// Display name.
    pub name: String,
    /// Hardware address.
    pub mac: MacAddress,
    /// IP address or hostname.
    pub ip: String,
    /// Netmask used to derive the broadcast target.
    #[serde(default)]
    pub netmask: Option<Ipv4Addr>,
    /// Explicit broadcast target.
    #[serde(default)]
    pub broadcast: Option<Ipv4Addr>,
    /// Remote shutdown configuration.
    #[serde(default)]
    pub shutdown: Option<ShutdownMethod>,
}

impl NewDevice {
    /// Minimal device record.
    pub fn new(name: impl Into<String>, mac: MacAddress, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mac,
            ip: ip.into(),
            netmask: None,
            broadcast: None,
            shutdown: None,
        }
    }

    /// Check the fields the store requires.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidRecord("name must not be empty".to_string()));
        }
        if self.ip.trim().is_empty() {
            return Err(Error::InvalidRecord("ip must not be empty".to_string()));
        }
        if self.ip.contains(char::is_whitespace) {
            return Err(Error::InvalidRecord(format!(
                "ip '{}' must not contain whitespace",
                self.ip
            )));
        }
        Ok(())
    }

    /// Build the full record for `id`.
    pub fn into_device(self, id: String, status: DeviceStatus) -> Device {
        Device {
            id,
            name: self.name,
            mac: self.mac,
            ip: self.ip,
            netmask: self.netmask,
            broadcast: self.broadcast,
            shutdown: self.shutdown,
            status,
        }
    }
}

impl From<&Device> for NewDevice {
    fn from(device: &Device) -> Self {
        Self {
            name: device.name.clone(),
            mac: device.mac,
            ip: device.ip.clone(),
            netmask: device.netmask,
            broadcast: device.broadcast,
            shutdown: device.shutdown.clone(),
        }
    }
}

/// Record collection touched by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// The `devices` table.
    Devices,
    /// The singleton settings record.
    Settings,
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Devices => "devices",
            Self::Settings => "settings",
        })
    }
}

/// Kind of write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// A record was inserted.
    Create,
    /// A record was modified.
    Update,
    /// A record was removed.
    Delete,
}

/// Notification passed to change hooks after a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// Collection that changed.
    pub collection: Collection,
    /// What happened.
    pub action: Action,
    /// Affected record, `None` for bulk writes.
    pub id: Option<String>,
}

impl ChangeEvent {
    /// Event for a single record.
    pub fn record(collection: Collection, action: Action, id: impl Into<String>) -> Self {
        Self {
            collection,
            action,
            id: Some(id.into()),
        }
    }

    /// Event for a write touching many records.
    pub fn bulk(collection: Collection, action: Action) -> Self {
        Self {
            collection,
            action,
            id: None,
        }
    }
}

/// Callback invoked after every committed write.
pub type ChangeHook = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let mac = MacAddress::new([1, 2, 3, 4, 5, 6]);
        assert!(NewDevice::new("nas", mac, "10.0.0.2").validate().is_ok());
        assert!(NewDevice::new(" ", mac, "10.0.0.2").validate().is_err());
        assert!(NewDevice::new("nas", mac, "").validate().is_err());
        assert!(NewDevice::new("nas", mac, "10.0.0.2 -x").validate().is_err());
    }

    #[test]
    fn test_new_device_json() {
        let json = r#"{"name":"pc","mac":"aa:bb:cc:dd:ee:ff","ip":"10.0.0.9",
            "shutdown":{"method":"ssh","user":"root"}}"#;
        let new: NewDevice = serde_json::from_str(json).unwrap();
        assert_eq!(new.mac.to_string(), "AA:BB:CC:DD:EE:FF");
        assert!(matches!(new.shutdown, Some(ShutdownMethod::Ssh { port: 22, .. })));
    }

    #[test]
    fn test_change_event_serialization() {
        let event = ChangeEvent::record(Collection::Devices, Action::Update, "abc");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["collection"], "devices");
        assert_eq!(json["action"], "update");
        assert_eq!(json["id"], "abc");
    }
}
