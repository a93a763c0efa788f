//! Error taxonomy of the triage service.
//!
//! Per-image failures (`ImageProcessing`, `Model`) are absorbed by the workflow
//! and only surface on single-image endpoints. `Validation` is rejected before
//! a run starts; `Internal` aborts a run.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::models::api::ApiEnvelope;
use crate::services::classifier::ModelError;
use crate::services::quality::QualityError;

#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(#[from] QualityError),

    #[error("Model unavailable: {0}")]
    Model(#[from] ModelError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),
}

impl TriageError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ImageProcessing(_) => "IMAGE_PROCESSING_ERROR",
            Self::Model(_) => "MODEL_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Cancelled(_) => "CANCELLED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ImageProcessing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Model(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Client went away; nobody reads this.
            Self::Cancelled(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Validation failed",
            Self::ImageProcessing(_) => "Image processing failed",
            Self::Model(_) => "AI model service unavailable",
            Self::Internal(_) => "Internal processing error",
            Self::Cancelled(_) => "Request cancelled",
        }
    }

    /// Attach the request id the envelope should carry.
    pub fn with_request_id(self, request_id: Uuid) -> ApiError {
        ApiError {
            request_id,
            error: self,
        }
    }
}

/// A `TriageError` bound to the request it failed, rendered as an error envelope.
#[derive(Debug)]
pub struct ApiError {
    pub request_id: Uuid,
    pub error: TriageError,
}

impl From<TriageError> for ApiError {
    fn from(error: TriageError) -> Self {
        error.with_request_id(Uuid::new_v4())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        if status.is_server_error() {
            tracing::error!(
                request_id = %self.request_id,
                error_code = self.error.error_code(),
                error = %self.error,
                "Request failed"
            );
        } else {
            tracing::warn!(
                request_id = %self.request_id,
                error_code = self.error.error_code(),
                error = %self.error,
                "Request rejected"
            );
        }

        let body = ApiEnvelope::<()>::error(
            self.request_id,
            self.error.public_message(),
            self.error.error_code(),
            serde_json::json!({ "message": self.error.to_string() }),
        );
        (status, Json(body)).into_response()
    }
}
