//! Live progress over Server-Sent Events.
//!
//! `GET /api/v1/jobs/:id/progress` sends, in order:
//!
//! 1. `connected`: the ledger row at subscribe time,
//! 2. `progress`: the hub's cached snapshot, if any,
//! 3. `progress`: every snapshot published from then on,
//!
//! with a `heartbeat` repeating the last state whenever the stream has been
//! idle for the heartbeat window. The stream ends after the first message
//! whose status is terminal.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
};
use futures::Stream;
use tracing::{debug, warn};
use uuid::Uuid;

use lectern_core::{Error, ProgressEventKind, ProgressMessage, ProgressSnapshot};

use crate::{ApiError, AppState};

fn progress_event(kind: ProgressEventKind, snapshot: &ProgressSnapshot) -> Event {
    let message = ProgressMessage::from(snapshot);
    Event::default()
        .event(kind.as_str())
        .json_data(&message)
        .unwrap_or_else(|e| {
            warn!(subsystem = "api", error = %e, "Failed to encode progress message");
            Event::default().event(kind.as_str()).comment("encoding failed")
        })
}

/// GET /api/v1/jobs/:id/progress
pub async fn job_progress(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let pipeline = state.control.pipeline();

    // Subscribe before reading the ledger so nothing published in between is lost.
    let mut subscription = pipeline.hub().subscribe(job_id);
    let job = pipeline
        .store()
        .get_job(job_id)
        .await?
        .ok_or(Error::JobNotFound(job_id))?;
    let connected = ProgressSnapshot::from_job(&job, "connected");
    let cached = pipeline.hub().last_snapshot(job_id);
    let heartbeat = state.sse_heartbeat;

    debug!(
        subsystem = "api",
        job_id = %job_id,
        status = %job.status,
        subscriber_count = pipeline.hub().subscriber_count(job_id),
        "Progress stream opened"
    );

    let stream = async_stream::stream! {
        yield Ok(progress_event(ProgressEventKind::Connected, &connected));
        if connected.is_terminal() {
            return;
        }

        let mut last = connected;
        if let Some(snapshot) = cached {
            yield Ok(progress_event(ProgressEventKind::Progress, &snapshot));
            if snapshot.is_terminal() {
                return;
            }
            last = snapshot;
        }

        loop {
            match tokio::time::timeout(heartbeat, subscription.recv()).await {
                Ok(Some(snapshot)) => {
                    yield Ok(progress_event(ProgressEventKind::Progress, &snapshot));
                    if snapshot.is_terminal() {
                        break;
                    }
                    last = snapshot;
                }
                Ok(None) => break,
                Err(_) => {
                    yield Ok(progress_event(ProgressEventKind::Heartbeat, &last.restamped("heartbeat")));
                }
            }
        }
        debug!(subsystem = "api", job_id = %job_id, "Progress stream closed");
    };

    Ok(Sse::new(stream))
}
