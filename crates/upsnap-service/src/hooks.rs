//! Reactions to record store changes.
//!
//! | Collection | Reaction |
//! |------------|----------|
//! | `devices` | reload the device registry |
//! | `settings` | reload the registry, then apply the new interval and notifications flag |
//!
//! Events that arrive together are coalesced, so a poll tick that writes
//! many statuses causes a single registry reload.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use upsnap_core::parse_interval;
use upsnap_store::{ChangeEvent, Collection};

use crate::state::AppState;

/// Spawn the task that consumes store change events.
///
/// The task ends when every sender (the store hook) has been dropped.
pub fn spawn_change_listener(
    state: Arc<AppState>,
    mut rx: mpsc::UnboundedReceiver<ChangeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            while let Ok(next) = rx.try_recv() {
                batch.push(next);
            }
            handle_changes(&state, &batch).await;
        }
        debug!("Change listener stopped");
    })
}

/// Apply a batch of change events.
pub async fn handle_changes(state: &AppState, events: &[ChangeEvent]) {
    let devices = events.iter().any(|e| e.collection == Collection::Devices);
    let settings = events.iter().any(|e| e.collection == Collection::Settings);

    if devices || settings {
        match state.refresh_registry().await {
            Ok(count) => debug!("Registry reloaded with {} devices", count),
            Err(e) => error!("Failed to reload devices: {}", e),
        }
    }
    if settings {
        apply_stored_settings(state).await;
    }
}

/// Push the stored settings into the running poller.
///
/// An unparseable interval leaves the current job untouched. The job is
/// only restarted if one is running, so API-only mode stays API-only.
pub async fn apply_stored_settings(state: &AppState) {
    let stored = match state.store.lock().await.get_settings() {
        Ok(Some(settings)) => settings,
        Ok(None) => return,
        Err(e) => {
            error!("Failed to read settings: {}", e);
            return;
        }
    };

    state.poller().set_notifications(stored.notifications);

    let period = match parse_interval(&stored.interval) {
        Ok(period) => period,
        Err(e) => {
            warn!("Keeping current poll interval: {}", e);
            return;
        }
    };

    if state.scheduler.is_running() {
        state.scheduler.reconfigure(period).await;
    } else {
        info!("Poller disabled, interval {} not applied", stored.interval);
    }
}
