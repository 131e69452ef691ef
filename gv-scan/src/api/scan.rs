//! Scan run API handlers
//!
//! POST /scan, POST /scan/cancel/{run_id}, GET /scan/status/{run_id}

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use gv_common::models::ScanStats;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{RunState, ScanRequest, ScanRun};
use crate::AppState;

/// POST /scan response
#[derive(Debug, Serialize)]
pub struct StartScanResponse {
    pub run_id: Uuid,
    pub state: RunState,
}

/// POST /scan/cancel response
#[derive(Debug, Serialize)]
pub struct CancelScanResponse {
    pub run_id: Uuid,
    pub cancelling: bool,
}

/// GET /scan/status response
#[derive(Debug, Serialize)]
pub struct ScanStatusResponse {
    pub run_id: Uuid,
    pub state: RunState,
    pub request: ScanRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ScanStats>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<ScanRun> for ScanStatusResponse {
    fn from(run: ScanRun) -> Self {
        Self {
            run_id: run.run_id,
            state: run.state,
            request: run.request,
            failure_reason: run.failure_reason.map(|r| r.to_string()),
            stats: run.stats,
            queued_at: run.queued_at,
            started_at: run.started_at,
            ended_at: run.ended_at,
        }
    }
}

/// POST /scan
///
/// Queue a scan run. Returns 202 Accepted with the run id, 409 while
/// another run is active.
pub async fn start_scan(
    State(state): State<AppState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<StartScanResponse>)> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let handle = state.coordinator.start(request).await?;

    tracing::info!(run_id = %handle.run_id, "Scan run accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(StartScanResponse {
            run_id: handle.run_id,
            state: handle.state,
        }),
    ))
}

/// POST /scan/cancel/{run_id}
pub async fn cancel_scan(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<CancelScanResponse>> {
    if !state.coordinator.cancel(run_id).await {
        return Err(ApiError::NotFound(format!("No active scan run: {}", run_id)));
    }

    Ok(Json(CancelScanResponse {
        run_id,
        cancelling: true,
    }))
}

/// GET /scan/status/{run_id}
pub async fn get_scan_status(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<ScanStatusResponse>> {
    let run = state
        .coordinator
        .status(run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Scan run not found: {}", run_id)))?;

    tracing::debug!(run_id = %run_id, state = %run.state, "Status query");

    Ok(Json(run.into()))
}

/// Build scan routes
pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/scan", post(start_scan))
        .route("/scan/cancel/:run_id", post(cancel_scan))
        .route("/scan/status/:run_id", get(get_scan_status))
}
