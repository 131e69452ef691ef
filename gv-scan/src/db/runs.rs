//! Scan run persistence
//!
//! Runs are written when queued and on every state change so that a queued
//! run survives a restart and an interrupted one can be reported.

use chrono::{DateTime, Utc};
use gv_common::models::ScanStats;
use gv_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{FailureReason, RunState, ScanRequest, ScanRun};
use crate::utils::retry_on_lock;

const RUN_COLUMNS: &str =
    "run_id, state, request, failure_reason, stats, queued_at, started_at, ended_at";

/// States of a run the worker has started but not finished
const RUNNING_STATES: &str =
    "('inventorying', 'identifying', 'matching', 'persisting', 'purging')";

/// Insert or update a run record
pub async fn save_run(pool: &SqlitePool, run: &ScanRun, max_wait_ms: u64) -> Result<()> {
    let run_id = run.run_id.to_string();
    let state = run.state.as_str();
    let request = serde_json::to_string(&run.request)
        .map_err(|e| Error::Internal(format!("Failed to serialize request: {}", e)))?;
    let failure_reason = run.failure_reason.as_ref().map(ToString::to_string);
    let stats = run
        .stats
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize stats: {}", e)))?;
    let queued_at = run.queued_at.to_rfc3339();
    let started_at = run.started_at.map(|dt| dt.to_rfc3339());
    let ended_at = run.ended_at.map(|dt| dt.to_rfc3339());

    retry_on_lock("save_run", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO scan_runs (
                run_id, state, request, failure_reason, stats,
                queued_at, started_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                state = excluded.state,
                failure_reason = excluded.failure_reason,
                stats = excluded.stats,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(&run_id)
        .bind(state)
        .bind(&request)
        .bind(&failure_reason)
        .bind(&stats)
        .bind(&queued_at)
        .bind(&started_at)
        .bind(&ended_at)
        .execute(pool)
        .await?;

        Ok::<_, Error>(())
    })
    .await
}

/// Load one run by id
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<ScanRun>> {
    let row = sqlx::query(&format!("SELECT {} FROM scan_runs WHERE run_id = ?", RUN_COLUMNS))
        .bind(run_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(run_from_row).transpose()
}

/// Oldest run still waiting in the queue
pub async fn oldest_queued_run(pool: &SqlitePool) -> Result<Option<ScanRun>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM scan_runs WHERE state = 'queued' ORDER BY queued_at ASC LIMIT 1",
        RUN_COLUMNS
    ))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(run_from_row).transpose()
}

/// Runs that are queued but will never be picked up, apart from `keep`
pub async fn stale_queued_runs(pool: &SqlitePool, keep: Uuid) -> Result<Vec<ScanRun>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM scan_runs WHERE state = 'queued' AND run_id != ? ORDER BY queued_at ASC",
        RUN_COLUMNS
    ))
    .bind(keep.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(run_from_row).collect()
}

/// Mark every run left in a running state as failed with `Interrupted`
///
/// Returns the number of runs updated.
pub async fn mark_interrupted(pool: &SqlitePool, max_wait_ms: u64) -> Result<u64> {
    let ended_at = Utc::now().to_rfc3339();
    let reason = FailureReason::Interrupted.to_string();

    retry_on_lock("mark_interrupted", max_wait_ms, || async {
        let result = sqlx::query(&format!(
            "UPDATE scan_runs SET state = 'failed', failure_reason = ?, ended_at = ? WHERE state IN {}",
            RUNNING_STATES
        ))
        .bind(&reason)
        .bind(&ended_at)
        .execute(pool)
        .await?;

        Ok::<_, Error>(result.rows_affected())
    })
    .await
}

/// Check whether any run is queued or running
pub async fn has_active_run(pool: &SqlitePool) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM scan_runs WHERE state NOT IN ('done', 'failed')")
            .fetch_one(pool)
            .await?;

    Ok(count > 0)
}

fn parse_time(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

fn run_from_row(row: &SqliteRow) -> Result<ScanRun> {
    let run_id: String = row.try_get("run_id")?;
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|e| Error::Internal(format!("Invalid UUID in database: {}", e)))?;

    let state: String = row.try_get("state")?;
    let request: String = row.try_get("request")?;
    let request: ScanRequest = serde_json::from_str(&request)
        .map_err(|e| Error::Internal(format!("Failed to deserialize request: {}", e)))?;

    let failure_reason: Option<String> = row.try_get("failure_reason")?;
    let stats: Option<String> = row.try_get("stats")?;
    let stats: Option<ScanStats> = stats
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize stats: {}", e)))?;

    let queued_at: String = row.try_get("queued_at")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let ended_at: Option<String> = row.try_get("ended_at")?;

    Ok(ScanRun {
        run_id,
        state: state.parse::<RunState>()?,
        request,
        failure_reason: failure_reason.map(FailureReason::from),
        stats,
        queued_at: parse_time(&queued_at, "queued_at")?,
        started_at: started_at.as_deref().map(|s| parse_time(s, "started_at")).transpose()?,
        ended_at: ended_at.as_deref().map(|s| parse_time(s, "ended_at")).transpose()?,
    })
}
