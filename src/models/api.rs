use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::standards::JobTemplate;
use crate::models::image::{
    Classification, ImageRecord, PhotoCategory, QualityReport, Relevance,
};
use crate::models::workflow::{BatchSummary, JobType};

// ── Envelope ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

/// Status envelope wrapped around every synchronous response.
#[derive(Debug, Serialize)]
pub struct ApiEnvelope<T> {
    pub status: EnvelopeStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
}

impl<T> ApiEnvelope<T> {
    pub fn success(request_id: Uuid, message: impl Into<String>, data: T) -> Self {
        Self {
            status: EnvelopeStatus::Success,
            message: message.into(),
            timestamp: Utc::now(),
            request_id,
            data: Some(data),
            error_code: None,
            error_details: None,
        }
    }

    pub fn error(
        request_id: Uuid,
        message: impl Into<String>,
        error_code: impl Into<String>,
        error_details: serde_json::Value,
    ) -> Self {
        Self {
            status: EnvelopeStatus::Error,
            message: message.into(),
            timestamp: Utc::now(),
            request_id,
            data: None,
            error_code: Some(error_code.into()),
            error_details: Some(error_details),
        }
    }
}

// ── Requests ────────────────────────────────────────────────────────────

/// One image in a request: base64 bytes or a server-side file path.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ImagePayload {
    #[garde(length(min = 1))]
    pub image_base64: Option<String>,

    #[garde(length(min = 1, max = 1024))]
    pub image_path: Option<String>,

    #[garde(length(max = 255))]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ClassifyRequest {
    #[serde(flatten)]
    #[garde(dive)]
    pub image: ImagePayload,

    #[garde(length(max = 2000))]
    pub job_context: Option<String>,

    #[garde(skip)]
    pub job_type: Option<JobType>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct QualityAnalysisRequest {
    #[serde(flatten)]
    #[garde(dive)]
    pub image: ImagePayload,

    /// Selects the pass threshold; the default threshold applies without it.
    #[garde(skip)]
    pub job_type: Option<JobType>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchProcessingRequest {
    #[garde(length(min = 1), dive)]
    pub images: Vec<ImagePayload>,

    #[garde(length(max = 2000))]
    pub job_context: Option<String>,

    #[garde(skip)]
    pub job_type: Option<JobType>,
}

fn default_enable_retry() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct WorkflowRequest {
    #[garde(length(min = 1), dive)]
    pub images: Vec<ImagePayload>,

    #[garde(length(max = 2000))]
    pub job_context: Option<String>,

    #[garde(skip)]
    pub job_type: Option<JobType>,

    #[serde(default = "default_enable_retry")]
    #[garde(skip)]
    pub enable_retry: bool,

    /// Overrides the configured attempt budget.
    #[garde(range(min = 1, max = 5))]
    pub max_attempts: Option<u32>,
}

/// Classification and quality outcome computed elsewhere, for feedback only.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PrecomputedResult {
    #[garde(length(max = 255))]
    pub filename: Option<String>,

    #[garde(skip)]
    pub category: PhotoCategory,

    #[garde(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    #[garde(range(min = 0.0, max = 1.0))]
    pub quality_score: f64,

    #[serde(default)]
    #[garde(skip)]
    pub relevance: Relevance,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FeedbackRequest {
    #[garde(length(min = 1), dive)]
    pub results: Vec<PrecomputedResult>,

    #[garde(skip)]
    pub job_type: Option<JobType>,

    #[serde(default)]
    #[garde(skip)]
    pub reflection_notes: Vec<String>,
}

// ── Response payloads ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ClassifyData {
    pub filename: Option<String>,
    pub job_context: Option<String>,
    pub job_type: Option<JobType>,
    /// Whether the job template lists the category as required or optional.
    /// Absent when no job type was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_for_job: Option<bool>,
    #[serde(flatten)]
    pub classification: Classification,
}

#[derive(Debug, Serialize)]
pub struct QualityData {
    pub filename: Option<String>,
    pub threshold: f64,
    pub passes_threshold: bool,
    #[serde(flatten)]
    pub report: QualityReport,
}

#[derive(Debug, Serialize)]
pub struct BatchData {
    pub total_images: usize,
    pub processed_images: usize,
    pub results: Vec<ImageRecord>,
    pub summary: BatchSummary,
    pub job_context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobTemplateView {
    pub id: JobType,
    #[serde(flatten)]
    pub template: JobTemplate,
}

#[derive(Debug, Serialize)]
pub struct StandardsReloadData {
    pub standards_dir: Option<String>,
    pub job_templates: usize,
}
