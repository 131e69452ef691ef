//! Data models for gv-scan
//!
//! - Scan request validation
//! - Scan run state machine and failure reasons

pub mod scan_request;
pub mod scan_run;

pub use scan_request::ScanRequest;
pub use scan_run::{FailureReason, RunState, ScanRun, StateTransition};
