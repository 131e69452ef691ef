//! gv-scan - game library scan service
//!
//! Walks the library root, identifies games through the configured metadata
//! providers and keeps the SQLite catalog in step with the filesystem.
//! Scans are triggered over HTTP; progress streams over SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use gv_common::config::{load_toml_config, resolve_config_path, TomlConfig};
use gv_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gv_scan::db::SqliteCatalog;
use gv_scan::services::{
    CoordinatorSettings, Exclusions, LibraryInventory, Reconciler, ReconcilerSettings, ScanCoordinator,
};
use gv_scan::AppState;

/// Command-line arguments for gv-scan
#[derive(Parser, Debug)]
#[command(name = "gv-scan")]
#[command(about = "Game library scan and reconciliation service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "GV_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides TOML)
    #[arg(short, long, env = "GV_PORT")]
    port: Option<u16>,

    /// Library root containing platform folders (overrides TOML)
    #[arg(short, long, env = "GV_LIBRARY_ROOT")]
    library_root: Option<PathBuf>,

    /// SQLite catalog file (overrides TOML)
    #[arg(short, long, env = "GV_DATABASE")]
    database: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut TomlConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = &self.library_root {
            config.library_root = root.clone();
        }
        if let Some(database) = &self.database {
            config.database_path = database.clone();
        }
    }
}

/// Default filter directive for a configured level
fn default_filter(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("gv_scan={0},gv_common={0},tower_http={0}", level)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let mut config = load_toml_config(config_path.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(&config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting gv-scan on port {}", config.port);
    info!(
        "Version: {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );
    match &config_path {
        Some(path) if path.exists() => info!("Configuration: {}", path.display()),
        Some(path) => warn!("Configuration file {} not found, using defaults", path.display()),
        None => warn!("No configuration directory available, using defaults"),
    }
    info!("Library root: {}", config.library_root.display());
    info!("Database: {}", config.database_path.display());

    let db_pool = gv_common::db::init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let event_bus = EventBus::new(config.scan.event_capacity);

    let exclusions = Exclusions::from_config(&config.exclude).context("Invalid exclusion rules")?;
    let inventory = Arc::new(LibraryInventory::new(config.library_root.clone(), exclusions));
    let catalog = Arc::new(SqliteCatalog::new(db_pool.clone(), config.scan.db_max_lock_wait_ms));
    let providers = gv_scan::config::build_providers(&config);
    info!("Metadata providers: {}", providers.len());

    let reconciler = Arc::new(Reconciler::new(
        catalog,
        inventory,
        providers,
        event_bus.clone(),
        ReconcilerSettings {
            provider_timeout: Duration::from_secs(config.scan.provider_timeout_secs.max(1)),
            platform_bindings: config.platform_bindings.clone(),
        },
    ));

    let run_timeout = match config.scan.run_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let (coordinator, worker) = ScanCoordinator::new(
        db_pool.clone(),
        reconciler,
        CoordinatorSettings {
            queue_capacity: config.scan.queue_capacity,
            run_timeout,
            max_lock_wait_ms: config.scan.db_max_lock_wait_ms,
        },
    );
    tokio::spawn(worker.run());

    if let Some(resumed) = coordinator
        .recover()
        .await
        .context("Failed to recover scan runs")?
    {
        info!(run_id = %resumed.run_id, "Resumed queued scan run");
    }

    let app = gv_scan::build_router(AppState::new(db_pool, event_bus, coordinator));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
