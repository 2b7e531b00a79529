//! Startup steps that run before the server accepts requests.

use tokio::sync::mpsc;
use tracing::info;

use upsnap_core::{DeviceStatus, EnvOverrides, ResolvedSettings, resolve_settings};
use upsnap_store::{ChangeEvent, Store};

/// Errors that abort startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The record store failed.
    #[error(transparent)]
    Store(#[from] upsnap_store::Error),
    /// The effective settings are invalid.
    #[error(transparent)]
    Settings(#[from] upsnap_core::Error),
}

/// Resolve the effective settings and persist them.
///
/// Environment overrides win over the stored record, which wins over the
/// defaults. The result is written back so the stored record always shows
/// what the poller actually uses.
pub fn import_settings(
    store: &mut Store,
    env: &EnvOverrides,
) -> Result<ResolvedSettings, StartupError> {
    let stored = store.get_settings()?;
    let resolved = resolve_settings(env, stored.as_ref())?;
    store.save_settings(&resolved.settings)?;

    info!(
        "Ping interval set to {}, notifications {}",
        resolved.settings.interval,
        if resolved.settings.notifications {
            "on"
        } else {
            "off"
        }
    );
    Ok(resolved)
}

/// Mark every device offline until the first poll says otherwise.
pub fn reset_device_states(store: &mut Store) -> Result<usize, StartupError> {
    let count = store.reset_statuses(DeviceStatus::Offline)?;
    info!("Reset {} devices to offline", count);
    Ok(count)
}

/// Forward every store change into a channel.
///
/// The hook itself only enqueues; the listener in [`crate::hooks`] does the
/// work outside the store lock.
pub fn register_change_hook(store: &mut Store) -> mpsc::UnboundedReceiver<ChangeEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    store.on_change(move |event| {
        // Receiver gone means the service is shutting down
        let _ = tx.send(event.clone());
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use upsnap_core::{MacAddress, Settings};
    use upsnap_store::{Collection, NewDevice};

    fn env(interval: Option<&str>, notifications: Option<&str>) -> EnvOverrides {
        EnvOverrides {
            interval: interval.map(String::from),
            notifications: notifications.map(String::from),
        }
    }

    #[test]
    fn test_import_defaults_are_persisted() {
        let mut store = Store::open_in_memory().unwrap();
        let resolved = import_settings(&mut store, &EnvOverrides::default()).unwrap();

        assert_eq!(resolved.interval, std::time::Duration::from_secs(3));
        assert_eq!(store.get_settings().unwrap(), Some(Settings::default()));
    }

    #[test]
    fn test_import_env_overrides_stored() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .save_settings(&Settings {
                interval: "@every 10s".to_string(),
                notifications: true,
            })
            .unwrap();

        import_settings(&mut store, &env(Some("@every 30s"), Some("false"))).unwrap();
        let saved = store.get_settings().unwrap().unwrap();
        assert_eq!(saved.interval, "@every 30s");
        assert!(!saved.notifications);
    }

    #[test]
    fn test_import_keeps_stored_false() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .save_settings(&Settings {
                interval: "@every 5s".to_string(),
                notifications: false,
            })
            .unwrap();

        let resolved = import_settings(&mut store, &EnvOverrides::default()).unwrap();
        assert!(!resolved.settings.notifications);
    }

    #[test]
    fn test_import_rejects_bad_env() {
        let mut store = Store::open_in_memory().unwrap();
        let err = import_settings(&mut store, &env(None, Some("maybe"))).unwrap_err();
        assert!(matches!(err, StartupError::Settings(_)));
        // Nothing persisted on failure
        assert!(store.get_settings().unwrap().is_none());
    }

    #[test]
    fn test_reset_device_states() {
        let mut store = Store::open_in_memory().unwrap();
        let d = store
            .create_device(NewDevice::new("a", MacAddress::new([1; 6]), "10.0.0.1"))
            .unwrap();
        store.save_device_status(&d.id, DeviceStatus::Online).unwrap();

        assert_eq!(reset_device_states(&mut store).unwrap(), 1);
        assert_eq!(
            store.get_device(&d.id).unwrap().unwrap().status,
            DeviceStatus::Offline
        );
    }

    #[test]
    fn test_change_hook_forwards_events() {
        let mut store = Store::open_in_memory().unwrap();
        let mut rx = register_change_hook(&mut store);

        store.save_settings(&Settings::default()).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.collection, Collection::Settings);
        assert!(rx.try_recv().is_err());
    }
}
