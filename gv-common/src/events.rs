//! Scan event types and EventBus
//!
//! Events are broadcast via `EventBus` and serialized for SSE transmission.
//! Delivery is best-effort: a slow or absent subscriber never blocks or fails
//! the producer.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{Item, Platform, ScanMode, ScanStats};

/// Scan progress events
///
/// For one run the stream is: `ScanStarted`, then `ScanningPlatform` /
/// `ScanningItem` in processing order, optionally `ScanCancelled`, and finally
/// exactly one of `ScanDone` or `ScanDoneFailed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScanEvent {
    /// Worker picked up a queued run
    #[serde(rename = "scan:started")]
    ScanStarted {
        run_id: Uuid,
        mode: ScanMode,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A platform was identified and written to the catalog
    #[serde(rename = "scan:scanning_platform")]
    ScanningPlatform {
        run_id: Uuid,
        platform: Platform,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An item was identified and written to the catalog
    #[serde(rename = "scan:scanning_item")]
    ScanningItem {
        run_id: Uuid,
        platform_name: String,
        platform_slug: String,
        item: Item,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Cancellation was observed; the run is ending without purge
    #[serde(rename = "scan:cancelled")]
    ScanCancelled {
        run_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Run finished successfully
    #[serde(rename = "scan:done")]
    ScanDone {
        run_id: Uuid,
        stats: ScanStats,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Run ended in failure (including cancellation and timeout)
    #[serde(rename = "scan:done_failed")]
    ScanDoneFailed {
        run_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ScanEvent {
    /// Event type name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            ScanEvent::ScanStarted { .. } => "scan:started",
            ScanEvent::ScanningPlatform { .. } => "scan:scanning_platform",
            ScanEvent::ScanningItem { .. } => "scan:scanning_item",
            ScanEvent::ScanCancelled { .. } => "scan:cancelled",
            ScanEvent::ScanDone { .. } => "scan:done",
            ScanEvent::ScanDoneFailed { .. } => "scan:done_failed",
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            ScanEvent::ScanStarted { run_id, .. }
            | ScanEvent::ScanningPlatform { run_id, .. }
            | ScanEvent::ScanningItem { run_id, .. }
            | ScanEvent::ScanCancelled { run_id, .. }
            | ScanEvent::ScanDone { run_id, .. }
            | ScanEvent::ScanDoneFailed { run_id, .. } => *run_id,
        }
    }

    /// True for the final event of a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::ScanDone { .. } | ScanEvent::ScanDoneFailed { .. }
        )
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for scan events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
///
/// A subscriber that lags behind by more than `capacity` events loses the
/// oldest ones; catalog correctness never depends on delivery.
///
/// # Examples
///
/// ```
/// use gv_common::events::EventBus;
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
/// assert_eq!(event_bus.subscriber_count(), 1);
/// # drop(rx);
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScanEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ScanEvent,
    ) -> Result<usize, broadcast::error::SendError<ScanEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ScanEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
