use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the workflow metrics.
pub fn describe() {
    metrics::describe_counter!("triage_workflows_total", "Workflow runs started");
    metrics::describe_counter!(
        "triage_workflows_completed",
        "Workflow runs that ended with an accepted batch"
    );
    metrics::describe_counter!(
        "triage_workflows_failed",
        "Workflow runs that ended failed or aborted"
    );
    metrics::describe_counter!(
        "triage_classifier_retries_total",
        "Vision model calls retried after a transient failure"
    );
    metrics::describe_counter!(
        "triage_image_degraded_total",
        "Images whose analysis failed in a round"
    );
    metrics::describe_histogram!(
        "triage_workflow_seconds",
        metrics::Unit::Seconds,
        "Wall time of one workflow run"
    );
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
