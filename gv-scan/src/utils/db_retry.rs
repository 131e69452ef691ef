//! Database retry logic
//!
//! Exponential backoff for transient SQLite lock contention. Any other error
//! is returned immediately.

use gv_common::{Error, Result};
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Retry a database operation until it stops reporting "database is locked"
/// or `max_wait_ms` has elapsed
///
/// Backoff starts at 10 ms and doubles up to 1 s between attempts.
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g. "upsert_item")
/// * `max_wait_ms` - Maximum total time to keep retrying
/// * `operation` - Closure producing a fresh attempt each call
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        "Database write went through after lock contention"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_lock_contention() => return Err(err),
            Err(_) => {
                let elapsed = start_time.elapsed();

                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        max_wait_ms,
                        "Gave up waiting for the database lock"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    elapsed_ms = elapsed.as_millis(),
                    backoff_ms,
                    "Database locked, backing off"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}
