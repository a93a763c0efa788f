//! Server-Sent Events rendition of the workflow.
//!
//! Each progress event becomes one SSE event named after its type, with the
//! sequence number as the event id. The stream ends after `result` or
//! `error`. Closing the connection cancels the run.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiError, TriageError};
use crate::models::api::WorkflowRequest;
use crate::services::{events, intake};

use super::triage::validated;

/// POST /api/v1/triage/workflow/stream: run the workflow, streaming progress.
pub async fn stream_workflow(
    State(state): State<AppState>,
    body: Result<Json<WorkflowRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request_id = Uuid::new_v4();
    let fail = |e: TriageError| e.with_request_id(request_id);

    let request = validated(body).map_err(fail)?;
    let images = intake::decode_batch(&request.images, state.intake_limits())
        .await
        .map_err(fail)?;
    let batch = state.batch_request(
        images,
        request.job_context,
        request.job_type,
        request.enable_retry,
        request.max_attempts,
    );

    let (publisher, subscription) =
        events::channel(request_id, state.config.event_channel_capacity);
    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.run(batch, publisher).await {
            debug!(%request_id, error = %e, "Streamed workflow ended without result");
        }
    });

    debug!(%request_id, "Workflow stream opened");
    let stream = subscription.filter_map(|event| async move {
        match Event::default()
            .event(event.kind.name())
            .id(event.sequence.to_string())
            .json_data(&event)
        {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                warn!(sequence = event.sequence, error = %e, "Failed to serialize event");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
