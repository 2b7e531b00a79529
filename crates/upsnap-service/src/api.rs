//! REST API endpoints for upsnap-service.
//!
//! # Power Control
//!
//! - `GET /api/upsnap/wake/{id}` - Send a Wake-on-LAN packet to a device
//! - `GET /api/upsnap/shutdown/{id}` - Run a device's shutdown method
//! - `GET /api/upsnap/scan?subnet=CIDR` - Scan a subnet for hosts
//!
//! # Records
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/devices`, `POST /api/devices` - List or create devices
//! - `GET|PUT|DELETE /api/devices/{id}` - Read, replace or delete a device
//! - `GET|PUT /api/settings` - Read or replace the settings record
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors (`{"error": "..."}`) via
//! [`AppError`]:
//!
//! | Error | Status |
//! |-------|--------|
//! | unknown device | 404 |
//! | invalid address, invalid config, invalid record | 400 |
//! | connection, authentication or remote command failure | 502 |
//! | probe timeout | 504 |
//! | store failure | 500 |
//!
//! The store lock is held for single queries only; wake, shutdown and scan
//! run without it.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use upsnap_core::{Device, ScanReport, Settings, Subnet, default_subnet, parse_interval};
use upsnap_store::NewDevice;

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/devices", get(list_devices).post(create_device))
        .route(
            "/api/devices/{id}",
            get(get_device).put(update_device).delete(delete_device),
        )
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/upsnap/wake/{id}", get(wake_device))
        .route("/api/upsnap/shutdown/{id}", get(shutdown_device))
        .route("/api/upsnap/scan", get(scan_network))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Devices in the registry.
    pub devices: usize,
    /// Whether the status poller is running.
    pub poller_running: bool,
    /// Seconds since startup.
    pub uptime_secs: i64,
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let now = OffsetDateTime::now_utc();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        devices: state.registry.len(),
        poller_running: state.scheduler.is_running(),
        uptime_secs: (now - state.started_at).whole_seconds(),
    })
}

async fn list_devices(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Device>>, AppError> {
    let devices = state.store.lock().await.list_devices()?;
    Ok(Json(devices))
}

async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Device>, AppError> {
    Ok(Json(find_device(&state, &id).await?))
}

async fn create_device(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewDevice>,
) -> Result<(StatusCode, Json<Device>), AppError> {
    let device = state.store.lock().await.create_device(new)?;
    Ok((StatusCode::CREATED, Json(device)))
}

async fn update_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<NewDevice>,
) -> Result<Json<Device>, AppError> {
    let device = state.store.lock().await.update_device(&id, update)?;
    Ok(Json(device))
}

async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.lock().await.delete_device(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Result<Json<Settings>, AppError> {
    let settings = state.store.lock().await.get_settings()?.unwrap_or_default();
    Ok(Json(settings))
}

/// Replace the settings record.
///
/// The interval is validated here so a bad value never reaches the store;
/// the change hook then restarts the poller with it.
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, AppError> {
    parse_interval(&settings.interval)?;
    state.store.lock().await.save_settings(&settings)?;
    Ok(Json(settings))
}

/// Send a magic packet to a device.
async fn wake_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Device>, AppError> {
    let device = find_device(&state, &id).await?;
    state.waker.wake_device(&device).await?;
    Ok(Json(device))
}

/// Shut a device down with its configured method.
async fn shutdown_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Device>, AppError> {
    let device = find_device(&state, &id).await?;
    state.shutdown.shutdown(&device).await?;
    Ok(Json(device))
}

/// Query parameters for scans.
#[derive(Debug, Default, Deserialize)]
pub struct ScanQuery {
    /// CIDR range, e.g. `192.168.1.0/24`.
    pub subnet: Option<String>,
}

/// Scan a subnet for responding hosts.
///
/// Without a `subnet` parameter the configured default range is used, and
/// without that the network of the default interface.
async fn scan_network(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScanQuery>,
) -> Result<Json<ScanReport>, AppError> {
    let subnet: Subnet = match query
        .subnet
        .as_deref()
        .or(state.config.scan.default_range.as_deref())
    {
        Some(range) => range
            .parse::<Subnet>()
            .map_err(upsnap_core::Error::from)?,
        None => default_subnet()?,
    };

    info!("Scan of {} requested", subnet);
    let report = state.scanner.scan(&subnet).await?;
    Ok(Json(report))
}

async fn find_device(state: &AppState, id: &str) -> Result<Device, AppError> {
    state
        .store
        .lock()
        .await
        .get_device(id)?
        .ok_or_else(|| AppError::NotFound(format!("Device not found: {}", id)))
}

/// API error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Core(upsnap_core::Error),
    Store(upsnap_store::Error),
}

impl From<upsnap_store::Error> for AppError {
    fn from(e: upsnap_store::Error) -> Self {
        match e {
            upsnap_store::Error::DeviceNotFound(id) => {
                AppError::NotFound(format!("Device not found: {}", id))
            }
            upsnap_store::Error::InvalidRecord(msg) => AppError::BadRequest(msg),
            other => AppError::Store(other),
        }
    }
}

impl From<upsnap_core::Error> for AppError {
    fn from(e: upsnap_core::Error) -> Self {
        AppError::Core(e)
    }
}

fn core_status(e: &upsnap_core::Error) -> StatusCode {
    use upsnap_core::Error;
    match e {
        Error::InvalidAddress(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
        Error::Connect { .. }
        | Error::Auth { .. }
        | Error::Command { .. }
        | Error::Probe { .. } => StatusCode::BAD_GATEWAY,
        Error::ProbeTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Core(e) => (core_status(&e), e.to_string()),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        if status.is_server_error() {
            tracing::warn!("{}: {}", status, message);
        }

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
