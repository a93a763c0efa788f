pub mod standards;

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8001").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL of an OpenAI-compatible API serving the vision model.
    #[serde(default = "default_vision_api_url")]
    pub vision_api_url: String,

    /// API key for the vision model. Classification is unavailable without it.
    pub vision_api_key: Option<String>,

    /// Vision model identifier
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Per-request timeout for vision model calls, in seconds
    #[serde(default = "default_vision_timeout_secs")]
    pub vision_timeout_secs: u64,

    /// Default attempt budget of a workflow run when the request does not set one
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Attempts per classification call before giving up
    #[serde(default = "default_classifier_max_attempts")]
    pub classifier_max_attempts: u32,

    /// Base backoff between classification attempts, in milliseconds (doubles per attempt)
    #[serde(default = "default_classifier_backoff_ms")]
    pub classifier_backoff_ms: u64,

    /// Process-wide cap on concurrent vision model calls
    #[serde(default = "default_classifier_concurrency")]
    pub classifier_concurrency: usize,

    /// Images analyzed concurrently within one round of one run
    #[serde(default = "default_round_concurrency")]
    pub round_concurrency: usize,

    /// Maximum accepted size of a single image, in megabytes
    #[serde(default = "default_max_image_size_mb")]
    pub max_image_size_mb: usize,

    /// Maximum number of images in one batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Directory holding job_templates.json, quality_standards.json and
    /// feedback_templates.json. Built-in defaults are used when unset.
    pub standards_dir: Option<PathBuf>,

    /// Buffered progress events per streaming subscriber
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8001".to_string()
}

fn default_vision_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_vision_timeout_secs() -> u64 {
    30
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_classifier_max_attempts() -> u32 {
    3
}

fn default_classifier_backoff_ms() -> u64 {
    500
}

fn default_classifier_concurrency() -> usize {
    4
}

fn default_round_concurrency() -> usize {
    8
}

fn default_max_image_size_mb() -> usize {
    10
}

fn default_max_batch_size() -> usize {
    20
}

fn default_event_channel_capacity() -> usize {
    64
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn max_image_bytes(&self) -> usize {
        self.max_image_size_mb * 1024 * 1024
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            vision_api_url: default_vision_api_url(),
            vision_api_key: None,
            vision_model: default_vision_model(),
            vision_timeout_secs: default_vision_timeout_secs(),
            max_retry_attempts: default_max_retry_attempts(),
            classifier_max_attempts: default_classifier_max_attempts(),
            classifier_backoff_ms: default_classifier_backoff_ms(),
            classifier_concurrency: default_classifier_concurrency(),
            round_concurrency: default_round_concurrency(),
            max_image_size_mb: default_max_image_size_mb(),
            max_batch_size: default_max_batch_size(),
            standards_dir: None,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}
