//! In-memory device registry.
//!
//! Holds the latest device list as an `Arc<Vec<Device>>` inside a
//! [`tokio::sync::watch`] channel. A refresh replaces the whole list, so a
//! reader either sees the old snapshot or the new one, never a mix.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use upsnap_types::Device;

/// Shared, snapshot-based view of all device records.
#[derive(Debug)]
pub struct DeviceRegistry {
    tx: watch::Sender<Arc<Vec<Device>>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        Self { tx }
    }

    /// Create a registry pre-populated with `devices`.
    pub fn with_devices(devices: Vec<Device>) -> Self {
        let registry = Self::new();
        registry.replace(devices);
        registry
    }

    /// Replace the whole device list.
    pub fn replace(&self, devices: Vec<Device>) {
        debug!("Device registry refreshed with {} devices", devices.len());
        self.tx.send_replace(Arc::new(devices));
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Vec<Device>> {
        Arc::clone(&self.tx.borrow())
    }

    /// Look up a device by id in the current snapshot.
    pub fn get(&self, id: &str) -> Option<Device> {
        self.tx.borrow().iter().find(|d| d.id == id).cloned()
    }

    /// Receive every future snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Device>>> {
        self.tx.subscribe()
    }

    /// Number of devices in the current snapshot.
    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    /// Whether the current snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upsnap_types::{DeviceStatus, MacAddress};

    fn device(id: &str) -> Device {
        Device {
            id: id.to_string(),
            name: format!("device-{id}"),
            mac: MacAddress::new([0, 0, 0, 0, 0, 1]),
            ip: "10.0.0.1".to_string(),
            netmask: None,
            broadcast: None,
            shutdown: None,
            status: DeviceStatus::Offline,
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_replace_is_wholesale() {
        let registry = DeviceRegistry::with_devices(vec![device("a"), device("b")]);
        let before = registry.snapshot();

        registry.replace(vec![device("c")]);

        // Old snapshot is untouched
        assert_eq!(before.len(), 2);
        let after = registry.snapshot();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, "c");
        assert!(registry.get("a").is_none());
        assert!(registry.get("c").is_some());
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let registry = DeviceRegistry::with_devices(vec![device("z"), device("a"), device("m")]);
        let ids: Vec<_> = registry.snapshot().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn test_subscribe_sees_refresh() {
        let registry = DeviceRegistry::new();
        let mut rx = registry.subscribe();

        registry.replace(vec![device("a")]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);
    }
}
