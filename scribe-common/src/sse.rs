//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE helpers for scribe services.

use crate::events::TranscriptionEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Comment text used for idle keepalive markers
pub const KEEPALIVE_TEXT: &str = "keepalive";

/// Convert a job event into an SSE frame
///
/// Returns `None` (and logs) if the payload cannot be serialized.
pub fn to_sse_event(event: &TranscriptionEvent) -> Option<Event> {
    let event_type = event.event_type();
    match event.data_json() {
        Ok(data) => Some(Event::default().event(event_type).data(data)),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
            None
        }
    }
}

/// Create a simple heartbeat-only SSE stream for connection status monitoring
///
/// # Arguments
/// * `service_name` - Name of the service for logging (e.g., "scribe-ai")
/// * `interval` - Heartbeat period
pub fn create_heartbeat_sse_stream(
    service_name: &'static str,
    interval: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} general events", service_name);

    let stream = async_stream::stream! {
        // Send initial connected status
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            tokio::time::sleep(interval).await;
            debug!("SSE: Sending heartbeat");
            yield Ok(Event::default().comment("heartbeat"));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(interval).text("heartbeat"))
}
