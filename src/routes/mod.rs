pub mod health;
pub mod metrics;
pub mod stream;
pub mod triage;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;
use crate::config::AppConfig;

/// Routes served with the shared application state. `/metrics` is mounted by
/// the binary, which owns the Prometheus recorder.
pub fn router(state: AppState) -> Router {
    let limit = body_limit(&state.config);
    let triage = Router::new()
        .route("/classify", post(triage::classify))
        .route("/analyze-quality", post(triage::analyze_quality))
        .route("/process-batch", post(triage::process_batch))
        .route("/workflow", post(triage::run_workflow))
        .route("/workflow/stream", post(stream::stream_workflow))
        .route("/feedback", post(triage::generate_feedback))
        .route("/job-templates", get(triage::job_templates))
        .route("/standards/reload", post(triage::reload_standards));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1/triage", triage)
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Largest accepted request body: a full batch of base64 images plus slack.
pub fn body_limit(config: &AppConfig) -> usize {
    // Base64 inflates images by a third.
    config.max_image_bytes() * config.max_batch_size / 3 * 4 + 64 * 1024
}
