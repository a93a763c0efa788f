use std::sync::Arc;
use std::time::Duration;

use crate::config::standards::{Standards, StandardsStore};
use crate::config::AppConfig;
use crate::models::image::ImageInput;
use crate::models::workflow::{BatchRequest, JobType};
use crate::services::classifier::{
    ClassifierClient, ModelError, OpenAiVisionModel, RetryPolicy, UnconfiguredVisionModel,
    VisionModel,
};
use crate::services::intake::IntakeLimits;
use crate::services::quality::QualityScorer;
use crate::services::workflow::WorkflowEngine;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub standards: Arc<StandardsStore>,
    pub quality: Arc<dyn QualityScorer>,
    pub classifier: ClassifierClient,
    pub engine: Arc<WorkflowEngine>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        standards: Standards,
        quality: Arc<dyn QualityScorer>,
        model: Arc<dyn VisionModel>,
    ) -> Self {
        let standards = Arc::new(StandardsStore::new(standards));
        let retry = RetryPolicy {
            max_attempts: config.classifier_max_attempts.max(1),
            base_backoff: Duration::from_millis(config.classifier_backoff_ms),
        };
        let classifier = ClassifierClient::new(model, retry, config.classifier_concurrency);
        let engine = Arc::new(WorkflowEngine::new(
            Arc::clone(&quality),
            classifier.clone(),
            Arc::clone(&standards),
            config.round_concurrency,
        ));

        Self {
            config: Arc::new(config),
            standards,
            quality,
            classifier,
            engine,
        }
    }

    pub fn intake_limits(&self) -> IntakeLimits {
        IntakeLimits {
            max_image_bytes: self.config.max_image_bytes(),
            max_batch_size: self.config.max_batch_size,
        }
    }

    /// Build a run request, falling back to the configured attempt budget.
    pub fn batch_request(
        &self,
        images: Vec<ImageInput>,
        job_context: Option<String>,
        job_type: Option<JobType>,
        enable_retry: bool,
        max_attempts: Option<u32>,
    ) -> BatchRequest {
        BatchRequest {
            images,
            job_context,
            job_type,
            enable_retry,
            max_attempts: max_attempts.unwrap_or(self.config.max_retry_attempts).max(1),
        }
    }
}

/// The configured vision model, or a stand-in that refuses every call when no
/// API key is set.
pub fn vision_model_from_config(config: &AppConfig) -> Result<Arc<dyn VisionModel>, ModelError> {
    match config.vision_api_key.as_deref().filter(|key| !key.is_empty()) {
        Some(api_key) => {
            let model = OpenAiVisionModel::new(
                &config.vision_api_url,
                api_key,
                &config.vision_model,
                Duration::from_secs(config.vision_timeout_secs),
            )?;
            Ok(Arc::new(model))
        }
        None => {
            tracing::warn!("VISION_API_KEY not set, classification is unavailable");
            Ok(Arc::new(UnconfiguredVisionModel))
        }
    }
}
