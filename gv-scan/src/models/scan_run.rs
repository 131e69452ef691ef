//! Scan run state machine
//!
//! A run moves `Queued → Inventorying → {Identifying → Matching → Persisting}
//! per platform → Purging → Done`, or ends `Failed` with a reason from any
//! state.

use chrono::{DateTime, Utc};
use gv_common::models::ScanStats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ScanRequest;

/// Scan run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Accepted and waiting for the worker
    Queued,
    /// Listing platform directories
    Inventorying,
    /// Deciding which items of a platform need identification
    Identifying,
    /// Calling metadata providers
    Matching,
    /// Writing platform and item rows
    Persisting,
    /// Removing rows for vanished files and platforms
    Purging,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Inventorying => "inventorying",
            RunState::Identifying => "identifying",
            RunState::Matching => "matching",
            RunState::Persisting => "persisting",
            RunState::Purging => "purging",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Worker has picked the run up and it has not ended
    pub fn is_running(&self) -> bool {
        !self.is_terminal() && *self != RunState::Queued
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = gv_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunState::Queued),
            "inventorying" => Ok(RunState::Inventorying),
            "identifying" => Ok(RunState::Identifying),
            "matching" => Ok(RunState::Matching),
            "persisting" => Ok(RunState::Persisting),
            "purging" => Ok(RunState::Purging),
            "done" => Ok(RunState::Done),
            "failed" => Ok(RunState::Failed),
            other => Err(gv_common::Error::Internal(format!("Unknown run state: {}", other))),
        }
    }
}

/// Why a run ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum FailureReason {
    /// Library root missing or no supported layout
    FolderStructure(String),
    Cancelled,
    Timeout,
    /// Process stopped while the run was active
    Interrupted,
    Internal(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::FolderStructure(detail) => write!(f, "FolderStructureError: {}", detail),
            FailureReason::Cancelled => f.write_str("Cancelled"),
            FailureReason::Timeout => f.write_str("Timeout"),
            FailureReason::Interrupted => f.write_str("Interrupted"),
            FailureReason::Internal(detail) => write!(f, "Internal: {}", detail),
        }
    }
}

impl From<FailureReason> for String {
    fn from(reason: FailureReason) -> Self {
        reason.to_string()
    }
}

impl From<String> for FailureReason {
    fn from(raw: String) -> Self {
        if let Some(detail) = raw.strip_prefix("FolderStructureError: ") {
            return FailureReason::FolderStructure(detail.to_string());
        }
        if let Some(detail) = raw.strip_prefix("Internal: ") {
            return FailureReason::Internal(detail.to_string());
        }
        match raw.as_str() {
            "Cancelled" => FailureReason::Cancelled,
            "Timeout" => FailureReason::Timeout,
            "Interrupted" => FailureReason::Interrupted,
            _ => FailureReason::Internal(raw),
        }
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub run_id: Uuid,
    pub old_state: RunState,
    pub new_state: RunState,
    pub transitioned_at: DateTime<Utc>,
}

/// One scan run, as persisted in `scan_runs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
    pub run_id: Uuid,
    pub state: RunState,
    pub request: ScanRequest,
    pub failure_reason: Option<FailureReason>,
    pub stats: Option<ScanStats>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ScanRun {
    /// New queued run
    pub fn new(request: ScanRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Queued,
            request,
            failure_reason: None,
            stats: None,
            queued_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Transition to a new state, stamping start and end times
    pub fn transition_to(&mut self, new_state: RunState) -> StateTransition {
        let transition = StateTransition {
            run_id: self.run_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };

        if self.started_at.is_none() && new_state.is_running() {
            self.started_at = Some(transition.transitioned_at);
        }
        if new_state.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }
        self.state = new_state;

        transition
    }

    pub fn complete(&mut self, stats: ScanStats) {
        self.stats = Some(stats);
        self.transition_to(RunState::Done);
    }

    pub fn fail(&mut self, reason: FailureReason, stats: Option<ScanStats>) {
        self.failure_reason = Some(reason);
        if stats.is_some() {
            self.stats = stats;
        }
        self.transition_to(RunState::Failed);
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
