//! Run coordinator
//!
//! Admits at most one scan run at a time. A run holds the [`RunLock`] from
//! the moment it is queued until its terminal event has been emitted; the
//! [`RunGuard`] travels with the run through the queue into the worker and
//! releases the lock when dropped.

use chrono::Utc;
use gv_common::events::{EventBus, ScanEvent};
use gv_common::models::ScanStats;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::runs;
use crate::models::{FailureReason, RunState, ScanRequest, ScanRun};
use crate::services::reconciler::{PhaseTracker, Reconciler, RunOutcome};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("A scan run is already queued or running")]
    RunAlreadyActive,

    #[error("Invalid scan request: {0}")]
    InvalidRequest(String),

    #[error("Scan queue is full")]
    QueueFull,

    #[error("Scan worker is not running")]
    WorkerStopped,

    #[error("Persistence error: {0}")]
    Persistence(#[from] gv_common::Error),
}

/// Global single-run lock
#[derive(Debug, Clone, Default)]
pub struct RunLock {
    held: Arc<AtomicBool>,
    releases: Arc<AtomicUsize>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, or `None` when a run already holds it
    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { lock: self.clone() })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Number of times a guard has released the lock
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::Acquire)
    }
}

/// Proof of lock ownership; releases on drop
#[derive(Debug)]
pub struct RunGuard {
    lock: RunLock,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.lock.releases.fetch_add(1, Ordering::AcqRel);
        self.lock.held.store(false, Ordering::Release);
    }
}

/// Identifies an accepted run
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub state: RunState,
}

/// Coordinator tuning
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub queue_capacity: usize,
    /// `None` leaves runs unbounded
    pub run_timeout: Option<Duration>,
    pub max_lock_wait_ms: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            run_timeout: Some(Duration::from_secs(4 * 60 * 60)),
            max_lock_wait_ms: 5000,
        }
    }
}

/// Live handles of the run holding the lock
#[derive(Debug, Clone)]
struct ActiveRun {
    run_id: Uuid,
    cancel: CancellationToken,
    phase: PhaseTracker,
}

/// Queue entry
struct QueuedRun {
    run: ScanRun,
    active: ActiveRun,
    guard: RunGuard,
}

/// Accepts, cancels and reports scan runs
pub struct ScanCoordinator {
    db: SqlitePool,
    lock: RunLock,
    queue: mpsc::Sender<QueuedRun>,
    active: Arc<RwLock<Option<ActiveRun>>>,
    max_lock_wait_ms: u64,
}

impl ScanCoordinator {
    /// Build the coordinator and the worker that drains its queue
    ///
    /// The worker must be spawned (`tokio::spawn(worker.run())`) for runs
    /// to make progress.
    pub fn new(
        db: SqlitePool,
        reconciler: Arc<Reconciler>,
        settings: CoordinatorSettings,
    ) -> (Arc<Self>, ScanWorker) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let active = Arc::new(RwLock::new(None));

        let worker = ScanWorker {
            db: db.clone(),
            event_bus: reconciler.event_bus().clone(),
            reconciler,
            receiver: rx,
            active: Arc::clone(&active),
            run_timeout: settings.run_timeout,
            max_lock_wait_ms: settings.max_lock_wait_ms,
        };

        let coordinator = Arc::new(Self {
            db,
            lock: RunLock::new(),
            queue: tx,
            active,
            max_lock_wait_ms: settings.max_lock_wait_ms,
        });

        (coordinator, worker)
    }

    pub fn lock(&self) -> &RunLock {
        &self.lock
    }

    /// Queue a new run
    ///
    /// Fails with `RunAlreadyActive` while another run is queued or
    /// running; a rejected request leaves no trace.
    pub async fn start(&self, request: ScanRequest) -> Result<RunHandle, CoordinatorError> {
        let request = request
            .validate()
            .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?;

        let guard = self
            .lock
            .try_acquire()
            .ok_or(CoordinatorError::RunAlreadyActive)?;

        let permit = self.queue.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => CoordinatorError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => CoordinatorError::WorkerStopped,
        })?;

        let run = ScanRun::new(request);
        runs::save_run(&self.db, &run, self.max_lock_wait_ms).await?;

        let handle = RunHandle {
            run_id: run.run_id,
            state: run.state,
        };
        let active = ActiveRun {
            run_id: run.run_id,
            cancel: CancellationToken::new(),
            phase: PhaseTracker::new(),
        };
        *self.active.write().await = Some(active.clone());

        tracing::info!(
            run_id = %run.run_id,
            mode = %run.request.mode,
            platforms = ?run.request.platform_ids,
            "Scan run queued"
        );
        permit.send(QueuedRun { run, active, guard });

        Ok(handle)
    }

    /// Request cooperative cancellation of the active run
    ///
    /// Returns `false` when `run_id` is not the active run.
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        let active = self.active.read().await;
        match active.as_ref() {
            Some(run) if run.run_id == run_id => {
                if !run.cancel.is_cancelled() {
                    tracing::info!(run_id = %run_id, "Cancellation requested");
                    run.cancel.cancel();
                }
                true
            }
            _ => false,
        }
    }

    /// Persisted run record, with the live phase of the active run
    pub async fn status(&self, run_id: Uuid) -> Result<Option<ScanRun>, CoordinatorError> {
        let Some(mut run) = runs::load_run(&self.db, run_id).await? else {
            return Ok(None);
        };

        if !run.is_terminal() {
            if let Some(active) = self.active.read().await.as_ref() {
                let live = active.phase.current();
                if active.run_id == run_id && live.is_running() {
                    run.state = live;
                }
            }
        }

        Ok(Some(run))
    }

    /// The run currently holding the lock
    pub async fn active_run(&self) -> Option<RunHandle> {
        self.active.read().await.as_ref().map(|active| RunHandle {
            run_id: active.run_id,
            state: active.phase.current(),
        })
    }

    /// Startup recovery
    ///
    /// Runs left in a running state are failed with `Interrupted`; the
    /// oldest queued run is put back on the queue and any other queued run
    /// is failed with `Interrupted`. Returns the re-queued run, if any.
    pub async fn recover(&self) -> Result<Option<RunHandle>, CoordinatorError> {
        if !runs::has_active_run(&self.db).await? {
            tracing::debug!("No unfinished scan runs to recover");
            return Ok(None);
        }

        let interrupted = runs::mark_interrupted(&self.db, self.max_lock_wait_ms).await?;
        if interrupted > 0 {
            tracing::warn!(count = interrupted, "Marked interrupted scan runs as failed");
        }

        let Some(run) = runs::oldest_queued_run(&self.db).await? else {
            return Ok(None);
        };

        for mut stale in runs::stale_queued_runs(&self.db, run.run_id).await? {
            tracing::warn!(run_id = %stale.run_id, "Dropping stale queued scan run");
            stale.fail(FailureReason::Interrupted, None);
            runs::save_run(&self.db, &stale, self.max_lock_wait_ms).await?;
        }

        let Some(guard) = self.lock.try_acquire() else {
            tracing::warn!(run_id = %run.run_id, "Run lock held, queued scan run not resumed");
            return Ok(None);
        };
        let permit = self.queue.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => CoordinatorError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => CoordinatorError::WorkerStopped,
        })?;

        let handle = RunHandle {
            run_id: run.run_id,
            state: run.state,
        };
        let active = ActiveRun {
            run_id: run.run_id,
            cancel: CancellationToken::new(),
            phase: PhaseTracker::new(),
        };
        *self.active.write().await = Some(active.clone());

        tracing::info!(run_id = %run.run_id, "Resuming queued scan run");
        permit.send(QueuedRun { run, active, guard });

        Ok(Some(handle))
    }
}

/// Drains the run queue, one run at a time
pub struct ScanWorker {
    db: SqlitePool,
    event_bus: EventBus,
    reconciler: Arc<Reconciler>,
    receiver: mpsc::Receiver<QueuedRun>,
    active: Arc<RwLock<Option<ActiveRun>>>,
    run_timeout: Option<Duration>,
    max_lock_wait_ms: u64,
}

impl ScanWorker {
    /// Process queued runs until the coordinator is dropped
    pub async fn run(mut self) {
        tracing::info!("Scan worker started");
        while let Some(queued) = self.receiver.recv().await {
            self.execute(queued).await;
        }
        tracing::info!("Scan worker stopped");
    }

    async fn execute(&self, queued: QueuedRun) {
        let QueuedRun { mut run, active, guard } = queued;
        let run_id = run.run_id;

        let outcome = if active.cancel.is_cancelled() {
            tracing::info!(run_id = %run_id, "Scan run cancelled before start");
            self.event_bus.emit_lossy(ScanEvent::ScanCancelled {
                run_id,
                timestamp: Utc::now(),
            });
            RunOutcome::Failed {
                reason: FailureReason::Cancelled,
                stats: ScanStats::default(),
            }
        } else {
            let transition = run.transition_to(RunState::Inventorying);
            tracing::debug!(
                run_id = %run_id,
                from = %transition.old_state,
                to = %transition.new_state,
                "Scan run starting"
            );
            self.persist(&run).await;
            self.event_bus.emit_lossy(ScanEvent::ScanStarted {
                run_id,
                mode: run.request.mode,
                timestamp: Utc::now(),
            });
            self.drive(&run, &active).await
        };

        match outcome {
            RunOutcome::Done(stats) => {
                run.complete(stats.clone());
                self.persist(&run).await;
                tracing::info!(run_id = %run_id, "Scan run done");
                self.event_bus.emit_lossy(ScanEvent::ScanDone {
                    run_id,
                    stats,
                    timestamp: Utc::now(),
                });
            }
            RunOutcome::Failed { reason, stats } => {
                let message = reason.to_string();
                run.fail(reason, Some(stats));
                self.persist(&run).await;
                tracing::warn!(run_id = %run_id, reason = %message, "Scan run failed");
                self.event_bus.emit_lossy(ScanEvent::ScanDoneFailed {
                    run_id,
                    reason: message,
                    timestamp: Utc::now(),
                });
            }
        }

        *self.active.write().await = None;
        drop(guard);
    }

    /// Run the engine in its own task, bounded by the run timeout
    async fn drive(&self, run: &ScanRun, active: &ActiveRun) -> RunOutcome {
        let reconciler = Arc::clone(&self.reconciler);
        let request = run.request.clone();
        let run_id = run.run_id;
        let cancel = active.cancel.clone();
        let phase = active.phase.clone();

        let mut task = tokio::spawn(async move {
            reconciler.run(run_id, &request, &cancel, &phase).await
        });

        let joined = match self.run_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    // The engine must be gone before the terminal event goes out
                    if let Err(e) = (&mut task).await {
                        if !e.is_cancelled() {
                            tracing::warn!(run_id = %run_id, error = %e, "Timed out scan task ended abnormally");
                        }
                    }
                    tracing::error!(run_id = %run_id, timeout = ?limit, "Scan run timed out");
                    return RunOutcome::Failed {
                        reason: FailureReason::Timeout,
                        stats: ScanStats::default(),
                    };
                }
            },
            None => task.await,
        };

        joined.unwrap_or_else(|e| {
            tracing::error!(run_id = %run_id, error = %e, "Scan task ended abnormally");
            RunOutcome::Failed {
                reason: FailureReason::Internal(e.to_string()),
                stats: ScanStats::default(),
            }
        })
    }

    async fn persist(&self, run: &ScanRun) {
        if let Err(e) = runs::save_run(&self.db, run, self.max_lock_wait_ms).await {
            tracing::error!(run_id = %run.run_id, state = %run.state, "Failed to persist scan run: {}", e);
        }
    }
}
