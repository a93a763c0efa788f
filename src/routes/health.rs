use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub vision_model: ModelHealth,
    pub standards: StandardsHealth,
}

#[derive(Serialize)]
pub struct ModelHealth {
    pub status: String,
    pub model: String,
}

#[derive(Serialize)]
pub struct StandardsHealth {
    pub status: String,
    pub job_templates: usize,
}

/// GET /health: service status with vision model and standards checks.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let configured = state.classifier.is_configured();
    let model_check = ModelHealth {
        status: if configured { "ok" } else { "unconfigured" }.to_string(),
        model: state.classifier.model_name().to_string(),
    };

    let standards = state.standards.snapshot();
    let standards_check = StandardsHealth {
        status: "ok".to_string(),
        job_templates: standards.job_templates.len(),
    };

    let status_code = if configured {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if configured { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            vision_model: model_check,
            standards: standards_check,
        },
    };

    (status_code, Json(response))
}
