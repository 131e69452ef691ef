//! gv-scan library interface
//!
//! Exposes the scan engine, coordinator and HTTP surface for the binary and
//! for integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod providers;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use gv_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::ScanCoordinator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub coordinator: Arc<ScanCoordinator>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, coordinator: Arc<ScanCoordinator>) -> Self {
        Self {
            db,
            event_bus,
            coordinator,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::scan_routes())
        .route("/scan/events", get(api::scan_event_stream))
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
}
