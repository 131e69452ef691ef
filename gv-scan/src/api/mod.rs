//! HTTP API handlers for gv-scan
//!
//! REST endpoints to trigger, cancel and inspect scan runs, plus an SSE
//! progress stream.

pub mod health;
pub mod scan;
pub mod sse;

pub use health::health_routes;
pub use scan::scan_routes;
pub use sse::scan_event_stream;
