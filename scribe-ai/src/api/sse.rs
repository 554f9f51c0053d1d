//! Server-Sent Events for job progress

use crate::error::ApiResult;
use crate::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use scribe_common::sse::{create_heartbeat_sse_stream, to_sse_event, KEEPALIVE_TEXT};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// GET /api/transcribe/status/:job_id - progress stream for one job
///
/// Emits `progress` events, then exactly one `complete` or `error` event,
/// then ends. A job that already finished gets its terminal event replayed.
/// Idle periods carry `: keepalive` comments.
pub async fn job_event_stream(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let mut subscription = state.orchestrator.registry().subscribe(job_id).await?;
    info!(job_id = %job_id, "SSE client subscribed");

    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            let terminal = event.is_terminal();
            if let Some(frame) = to_sse_event(&event) {
                debug!(job_id = %job_id, event = event.event_type(), "SSE: Sending event");
                yield Ok(frame);
            }
            if terminal {
                break;
            }
        }
        debug!(job_id = %job_id, "SSE stream finished");
    };

    let interval = Duration::from_secs(state.config.keepalive_secs);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(interval).text(KEEPALIVE_TEXT)))
}

/// GET /events - connection heartbeat stream
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    create_heartbeat_sse_stream(
        crate::config::MODULE_NAME,
        Duration::from_secs(state.config.keepalive_secs),
    )
}
