//! Main store implementation.

use std::net::Ipv4Addr;
use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use upsnap_types::{Device, DeviceStatus, MacAddress, Settings, ShutdownMethod};

use crate::error::{Error, Result};
use crate::models::{Action, ChangeEvent, ChangeHook, Collection, NewDevice};
use crate::schema;

const DEVICE_COLUMNS: &str = "id, name, mac, ip, netmask, broadcast, shutdown, status";

/// SQLite-based store for device and settings records.
///
/// Hooks registered with [`Store::on_change`] run synchronously after each
/// committed write, on the caller's thread, so they should only hand the
/// event off (for example into a channel).
pub struct Store {
    conn: Connection,
    hooks: Vec<ChangeHook>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self {
            conn,
            hooks: Vec::new(),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn,
            hooks: Vec::new(),
        })
    }

    /// Register a hook that runs after every create, update or delete.
    pub fn on_change<F>(&mut self, hook: F)
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    fn notify(&self, event: ChangeEvent) {
        debug!(
            "{} {:?} {}",
            event.collection,
            event.action,
            event.id.as_deref().unwrap_or("*")
        );
        for hook in &self.hooks {
            hook(&event);
        }
    }

    // === Device operations ===

    /// List all devices in creation order.
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY created, rowid"
        ))?;

        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(devices)
    }

    /// Get a device by ID.
    pub fn get_device(&self, id: &str) -> Result<Option<Device>> {
        let device = self
            .conn
            .query_row(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?"),
                [id],
                device_from_row,
            )
            .optional()?;

        Ok(device)
    }

    /// Insert a new device. New devices start offline.
    pub fn create_device(&mut self, new: NewDevice) -> Result<Device> {
        new.validate()?;
        let id = Uuid::new_v4().simple().to_string();
        let shutdown = encode_shutdown(new.shutdown.as_ref())?;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        self.conn.execute(
            "INSERT INTO devices (id, name, mac, ip, netmask, broadcast, shutdown, status, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id,
                new.name,
                new.mac.to_string(),
                new.ip,
                new.netmask.map(|m| m.to_string()),
                new.broadcast.map(|b| b.to_string()),
                shutdown,
                DeviceStatus::Offline.as_str(),
                now
            ],
        )?;

        info!("Created device {} ({})", new.name, id);
        let device = new.into_device(id, DeviceStatus::Offline);
        self.notify(ChangeEvent::record(
            Collection::Devices,
            Action::Create,
            &device.id,
        ));
        Ok(device)
    }

    /// Replace the owner-authored fields of a device, keeping its status.
    pub fn update_device(&mut self, id: &str, update: NewDevice) -> Result<Device> {
        update.validate()?;
        let shutdown = encode_shutdown(update.shutdown.as_ref())?;

        let changed = self.conn.execute(
            "UPDATE devices SET
                name = ?2, mac = ?3, ip = ?4, netmask = ?5, broadcast = ?6,
                shutdown = ?7, updated = ?8
             WHERE id = ?1",
            params![
                id,
                update.name,
                update.mac.to_string(),
                update.ip,
                update.netmask.map(|m| m.to_string()),
                update.broadcast.map(|b| b.to_string()),
                shutdown,
                OffsetDateTime::now_utc().unix_timestamp()
            ],
        )?;
        if changed == 0 {
            return Err(Error::DeviceNotFound(id.to_string()));
        }

        let device = self
            .get_device(id)?
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
        self.notify(ChangeEvent::record(Collection::Devices, Action::Update, id));
        Ok(device)
    }

    /// Delete a device.
    pub fn delete_device(&mut self, id: &str) -> Result<()> {
        let deleted = self.conn.execute("DELETE FROM devices WHERE id = ?", [id])?;
        if deleted == 0 {
            return Err(Error::DeviceNotFound(id.to_string()));
        }

        info!("Deleted device {}", id);
        self.notify(ChangeEvent::record(Collection::Devices, Action::Delete, id));
        Ok(())
    }

    /// Write the observed status of a device.
    pub fn save_device_status(&mut self, id: &str, status: DeviceStatus) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE devices SET status = ?2, updated = ?3 WHERE id = ?1",
            params![id, status.as_str(), OffsetDateTime::now_utc().unix_timestamp()],
        )?;
        if changed == 0 {
            return Err(Error::DeviceNotFound(id.to_string()));
        }

        self.notify(ChangeEvent::record(Collection::Devices, Action::Update, id));
        Ok(())
    }

    /// Set every device to `status`. Returns the number of rows touched.
    pub fn reset_statuses(&mut self, status: DeviceStatus) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE devices SET status = ?1, updated = ?2",
            params![status.as_str(), OffsetDateTime::now_utc().unix_timestamp()],
        )?;

        if changed > 0 {
            self.notify(ChangeEvent::bulk(Collection::Devices, Action::Update));
        }
        Ok(changed)
    }

    // === Settings operations ===

    /// The stored settings record, if one has been saved.
    pub fn get_settings(&self) -> Result<Option<Settings>> {
        let settings = self
            .conn
            .query_row(
                "SELECT interval, notifications FROM settings WHERE id = 1",
                [],
                |row| {
                    Ok(Settings {
                        interval: row.get(0)?,
                        notifications: row.get(1)?,
                    })
                },
            )
            .optional()?;

        Ok(settings)
    }

    /// Create or replace the settings record.
    pub fn save_settings(&mut self, settings: &Settings) -> Result<()> {
        let existed = self.get_settings()?.is_some();
        self.conn.execute(
            "INSERT INTO settings (id, interval, notifications, updated) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                interval = excluded.interval,
                notifications = excluded.notifications,
                updated = excluded.updated",
            params![
                settings.interval,
                settings.notifications,
                OffsetDateTime::now_utc().unix_timestamp()
            ],
        )?;

        let action = if existed {
            Action::Update
        } else {
            Action::Create
        };
        self.notify(ChangeEvent::record(Collection::Settings, action, "settings"));
        Ok(())
    }
}

fn encode_shutdown(method: Option<&ShutdownMethod>) -> Result<Option<String>> {
    method
        .map(serde_json::to_string)
        .transpose()
        .map_err(Error::from)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_optional_ip(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Ipv4Addr>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| s.parse::<Ipv4Addr>().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    let mac = row
        .get::<_, String>(2)?
        .parse::<MacAddress>()
        .map_err(|e| conversion_error(2, e))?;
    let shutdown = row
        .get::<_, Option<String>>(6)?
        .map(|s| serde_json::from_str::<ShutdownMethod>(&s).map_err(|e| conversion_error(6, e)))
        .transpose()?;
    // Unknown values fall back to offline
    let status = row
        .get::<_, String>(7)?
        .parse::<DeviceStatus>()
        .unwrap_or_default();

    Ok(Device {
        id: row.get(0)?,
        name: row.get(1)?,
        mac,
        ip: row.get(3)?,
        netmask: parse_optional_ip(row, 4)?,
        broadcast: parse_optional_ip(row, 5)?,
        shutdown,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn new_device(name: &str, ip: &str) -> NewDevice {
        NewDevice::new(name, MacAddress::new([0xAA, 0xBB, 0xCC, 0, 0, 1]), ip)
    }

    fn recorded(store: &mut Store) -> Arc<Mutex<Vec<ChangeEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        store.on_change(move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    #[test]
    fn test_create_and_get_device() {
        let mut store = Store::open_in_memory().unwrap();
        let mut new = new_device("nas", "192.168.1.5");
        new.netmask = Some(Ipv4Addr::new(255, 255, 255, 0));
        new.shutdown = Some(ShutdownMethod::Ssh {
            user: "admin".to_string(),
            port: 22,
            identity_file: None,
            command: "sudo poweroff".to_string(),
        });

        let created = store.create_device(new).unwrap();
        assert_eq!(created.status, DeviceStatus::Offline);

        let loaded = store.get_device(&created.id).unwrap().unwrap();
        assert_eq!(loaded, created);
    }

    #[test]
    fn test_get_missing_device() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_device("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_devices_in_creation_order() {
        let mut store = Store::open_in_memory().unwrap();
        for name in ["c", "a", "b"] {
            store.create_device(new_device(name, "10.0.0.1")).unwrap();
        }

        let names: Vec<_> = store
            .list_devices()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_create_rejects_invalid() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store.create_device(new_device("", "10.0.0.1")).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
        assert!(store.list_devices().unwrap().is_empty());
    }

    #[test]
    fn test_update_device_keeps_status() {
        let mut store = Store::open_in_memory().unwrap();
        let created = store.create_device(new_device("pc", "10.0.0.7")).unwrap();
        store
            .save_device_status(&created.id, DeviceStatus::Online)
            .unwrap();

        let updated = store
            .update_device(&created.id, new_device("desktop", "10.0.0.8"))
            .unwrap();
        assert_eq!(updated.name, "desktop");
        assert_eq!(updated.ip, "10.0.0.8");
        assert_eq!(updated.status, DeviceStatus::Online);
    }

    #[test]
    fn test_update_and_delete_missing() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.update_device("nope", new_device("x", "10.0.0.1")),
            Err(Error::DeviceNotFound(_))
        ));
        assert!(matches!(
            store.delete_device("nope"),
            Err(Error::DeviceNotFound(_))
        ));
        assert!(matches!(
            store.save_device_status("nope", DeviceStatus::Online),
            Err(Error::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_delete_device() {
        let mut store = Store::open_in_memory().unwrap();
        let created = store.create_device(new_device("pc", "10.0.0.7")).unwrap();
        store.delete_device(&created.id).unwrap();
        assert!(store.get_device(&created.id).unwrap().is_none());
    }

    #[test]
    fn test_reset_statuses() {
        let mut store = Store::open_in_memory().unwrap();
        let a = store.create_device(new_device("a", "10.0.0.1")).unwrap();
        let b = store.create_device(new_device("b", "10.0.0.2")).unwrap();
        store.save_device_status(&a.id, DeviceStatus::Online).unwrap();
        store.save_device_status(&b.id, DeviceStatus::Online).unwrap();

        assert_eq!(store.reset_statuses(DeviceStatus::Offline).unwrap(), 2);
        assert!(
            store
                .list_devices()
                .unwrap()
                .iter()
                .all(|d| d.status == DeviceStatus::Offline)
        );
    }

    #[test]
    fn test_settings_roundtrip() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(store.get_settings().unwrap().is_none());

        let settings = Settings {
            interval: "@every 10s".to_string(),
            notifications: false,
        };
        store.save_settings(&settings).unwrap();
        assert_eq!(store.get_settings().unwrap(), Some(settings));

        store.save_settings(&Settings::default()).unwrap();
        assert_eq!(store.get_settings().unwrap(), Some(Settings::default()));
    }

    #[test]
    fn test_change_hooks() {
        let mut store = Store::open_in_memory().unwrap();
        let events = recorded(&mut store);

        let created = store.create_device(new_device("pc", "10.0.0.7")).unwrap();
        store
            .save_device_status(&created.id, DeviceStatus::Online)
            .unwrap();
        store.delete_device(&created.id).unwrap();
        store.save_settings(&Settings::default()).unwrap();
        store.save_settings(&Settings::default()).unwrap();

        let events = events.lock().unwrap();
        let kinds: Vec<_> = events.iter().map(|e| (e.collection, e.action)).collect();
        assert_eq!(
            kinds,
            vec![
                (Collection::Devices, Action::Create),
                (Collection::Devices, Action::Update),
                (Collection::Devices, Action::Delete),
                (Collection::Settings, Action::Create),
                (Collection::Settings, Action::Update),
            ]
        );
        assert_eq!(events[0].id.as_deref(), Some(created.id.as_str()));
    }

    #[test]
    fn test_failed_write_does_not_notify() {
        let mut store = Store::open_in_memory().unwrap();
        let events = recorded(&mut store);
        let _ = store.delete_device("missing");
        let _ = store.create_device(new_device("", "10.0.0.1"));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");

        let mut store = Store::open(&path).unwrap();
        store.create_device(new_device("pc", "10.0.0.7")).unwrap();
        drop(store);

        let store = Store::open(&path).unwrap();
        assert_eq!(store.list_devices().unwrap().len(), 1);
    }
}
