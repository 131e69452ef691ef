//! Server-Sent Events for scan progress streaming

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// GET /scan/events - SSE stream of every scan event
pub async fn scan_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to scan events");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => match received {
                    Ok(event) => {
                        let event_type = event.event_type();
                        match serde_json::to_string(&event) {
                            Ok(event_json) => {
                                debug!("SSE: Broadcasting scan event: {}", event_type);
                                yield Ok(Event::default().event(event_type).data(event_json));
                            }
                            Err(e) => {
                                warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("SSE: Client lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("SSE: Event bus closed, ending stream");
                        break;
                    }
                },
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
