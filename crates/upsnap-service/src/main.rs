//! UpSnap service - status poller, power control and HTTP API.
//!
//! Run with: `cargo run -p upsnap-service`

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use upsnap_core::EnvOverrides;
use upsnap_service::{
    AppState, Backends, Config, app, import_settings, register_change_hook, reset_device_states,
    spawn_change_listener,
};
use upsnap_store::Store;

/// UpSnap - wake, monitor and shut down LAN devices.
#[derive(Parser, Debug)]
#[command(name = "upsnap")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Disable the status poller (API only mode).
    #[arg(long)]
    no_poller: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("upsnap_service=info".parse()?)
                .add_directive("upsnap_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    config.validate()?;

    info!("Opening database at {:?}", config.storage.path);
    let mut store = Store::open(&config.storage.path)?;

    // Bad UPSNAP_* values or a bad stored interval abort startup
    let resolved = import_settings(&mut store, &EnvOverrides::from_env())?;
    reset_device_states(&mut store)?;
    let changes = register_change_hook(&mut store);

    let backends = Backends::from_config(&config);
    let state = AppState::new(store, config.clone(), backends);
    let count = state.refresh_registry().await?;
    info!("Loaded {} devices", count);

    let listener_task = spawn_change_listener(state.clone(), changes);

    state
        .poller()
        .set_notifications(resolved.settings.notifications);
    if args.no_poller {
        info!("Status poller disabled");
    } else {
        state.scheduler.start(resolved.interval).await;
    }

    if !config.server.cors_origins.is_empty() {
        info!("CORS allowed for {:?}", config.server.cors_origins);
    }
    let router = app(state.clone());

    let addr: SocketAddr = config.server.bind.parse()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopping status poller");
    state.scheduler.stop().await;
    listener_task.abort();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
