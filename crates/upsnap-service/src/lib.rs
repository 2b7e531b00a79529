//! Record store glue and HTTP API for UpSnap.
//!
//! This crate provides a service that:
//! - Polls every configured device on a schedule and records online/offline
//! - Sends Wake-on-LAN packets and runs remote shutdowns on request
//! - Scans a subnet for responding hosts
//! - Exposes devices and settings over a REST API
//! - Pushes status changes over a WebSocket
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET|POST /api/devices` - List or create devices
//! - `GET|PUT|DELETE /api/devices/{id}` - Manage one device
//! - `GET|PUT /api/settings` - Poll interval and notifications
//! - `GET /api/upsnap/wake/{id}` - Wake a device
//! - `GET /api/upsnap/shutdown/{id}` - Shut a device down
//! - `GET /api/upsnap/scan?subnet=CIDR` - Scan a subnet
//! - `WS /api/ws` - Real-time status stream
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/upsnap/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8090"
//! # Browser origins allowed to call the API; empty means same-origin only
//! cors_origins = ["http://upsnap.lan:8090"]
//!
//! [storage]
//! path = "~/.local/share/upsnap/data.db"
//!
//! [poller]
//! probe = "tcp"
//! tcp_ports = [22, 80, 443, 3389, 445]
//!
//! [scan]
//! default_range = "192.168.1.0/24"
//! timeout_secs = 30
//! ```
//!
//! The poll interval and notifications flag live in the settings record and
//! can be overridden at startup with `UPSNAP_INTERVAL` and
//! `UPSNAP_NOTIFICATIONS`.

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod hooks;
pub mod state;
pub mod ws;

pub use bootstrap::{StartupError, import_settings, register_change_hook, reset_device_states};
pub use config::{
    Config, ConfigError, PollerConfig, ScanConfig, ServerConfig, ShutdownConfig, StorageConfig,
};
pub use hooks::{apply_stored_settings, handle_changes, spawn_change_listener};
pub use state::{AppState, Backends, StoreStatusSink};
pub use ws::WsMessage;

/// Build the full HTTP application: REST routes, WebSocket and layers.
///
/// CORS headers are only sent to origins listed in `server.cors_origins`;
/// with an empty list the API is same-origin only.
pub fn app(state: Arc<AppState>) -> Router {
    let router = Router::new().merge(api::router()).merge(ws::router());

    let router = match cors_layer(&state.config.server.cors_origins) {
        Some(cors) => router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        ),
        None => router.layer(TraceLayer::new_for_http()),
    };
    router.with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]),
    )
}
