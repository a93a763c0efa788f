use async_trait::async_trait;
use base64::Engine;
use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::models::image::{Classification, PhotoCategory, Relevance};

/// Longest side sent to the vision model.
pub const MAX_UPLOAD_DIMENSION: u32 = 1024;

/// Similarity needed to snap an unknown category name onto a known one.
const CATEGORY_SNAP_SIMILARITY: f64 = 0.9;

/// Confidence given to answers that were not the requested JSON.
const UNSTRUCTURED_CONFIDENCE: f64 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Vision model is not configured")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vision model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Vision model response was malformed: {0}")]
    Malformed(String),

    #[error("Failed to prepare image for upload: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Classifier is shutting down")]
    Closed,

    #[error("Vision model call failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<ModelError> },
}

impl ModelError {
    /// Timeouts, connection failures, throttling and server errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Image as it is uploaded to the model.
#[derive(Debug, Clone)]
pub struct ImagePart {
    pub mime_type: &'static str,
    pub base64: String,
}

impl ImagePart {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// A multimodal model answering one text prompt about one image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, prompt: &str, image: &ImagePart) -> Result<String, ModelError>;

    fn model_name(&self) -> &str;

    fn is_configured(&self) -> bool {
        true
    }
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiVisionModel {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl OpenAiVisionModel {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl VisionModel for OpenAiVisionModel {
    async fn complete(&self, prompt: &str, image: &ImagePart) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.data_url(),
                        },
                    },
                ],
            }],
            max_tokens: 500,
            temperature: 0.1,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelError::Malformed("response has no message content".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Stand-in used when no API key is configured. Every call fails fast.
pub struct UnconfiguredVisionModel;

#[async_trait]
impl VisionModel for UnconfiguredVisionModel {
    async fn complete(&self, _prompt: &str, _image: &ImagePart) -> Result<String, ModelError> {
        Err(ModelError::NotConfigured)
    }

    fn model_name(&self) -> &str {
        "unconfigured"
    }

    fn is_configured(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based). Doubles every attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// Categorizes images through a [`VisionModel`], retrying transient failures.
/// All clones share one permit pool, capping concurrent model calls process-wide.
#[derive(Clone)]
pub struct ClassifierClient {
    model: Arc<dyn VisionModel>,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl ClassifierClient {
    pub fn new(model: Arc<dyn VisionModel>, retry: RetryPolicy, max_concurrent: usize) -> Self {
        Self {
            model,
            retry,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn is_configured(&self) -> bool {
        self.model.is_configured()
    }

    pub async fn classify(
        &self,
        bytes: Arc<[u8]>,
        job_context: Option<&str>,
    ) -> Result<Classification, ModelError> {
        if !self.model.is_configured() {
            return Err(ModelError::NotConfigured);
        }

        let image = tokio::task::spawn_blocking(move || prepare_image(&bytes))
            .await
            .map_err(|e| ModelError::Malformed(format!("image preparation task failed: {e}")))??;

        let prompt = build_prompt(job_context);
        let answer = self.complete_with_retry(&prompt, &image).await?;
        Ok(parse_classification(&answer))
    }

    async fn complete_with_retry(
        &self,
        prompt: &str,
        image: &ImagePart,
    ) -> Result<String, ModelError> {
        let mut attempt = 1;
        loop {
            let result = {
                let _permit = self.permits.acquire().await.map_err(|_| ModelError::Closed)?;
                self.model.complete(prompt, image).await
            };

            match result {
                Ok(answer) => return Ok(answer),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Vision model call failed, retrying"
                    );
                    metrics::counter!("triage_classifier_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if attempt > 1 => {
                    return Err(ModelError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Re-encode images larger than [`MAX_UPLOAD_DIMENSION`] as JPEG; smaller ones
/// are uploaded untouched.
pub fn prepare_image(bytes: &[u8]) -> Result<ImagePart, ModelError> {
    let format = image::guess_format(bytes)?;
    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format).into_dimensions()?;
    let engine = base64::engine::general_purpose::STANDARD;

    if width <= MAX_UPLOAD_DIMENSION && height <= MAX_UPLOAD_DIMENSION {
        return Ok(ImagePart {
            mime_type: format.to_mime_type(),
            base64: engine.encode(bytes),
        });
    }

    debug!(width, height, "Downscaling image before upload");
    let resized = image::load_from_memory_with_format(bytes, format)?
        .resize(MAX_UPLOAD_DIMENSION, MAX_UPLOAD_DIMENSION, FilterType::Triangle)
        .to_rgb8();
    let mut encoded = Vec::new();
    resized.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)?;

    Ok(ImagePart {
        mime_type: ImageFormat::Jpeg.to_mime_type(),
        base64: engine.encode(&encoded),
    })
}

pub fn build_prompt(job_context: Option<&str>) -> String {
    let categories = PhotoCategory::iter()
        .map(|category| format!("- {}: {}", category, category.hint()))
        .collect::<Vec<_>>()
        .join("\n");
    let context = job_context
        .filter(|c| !c.trim().is_empty())
        .map(|c| format!("\nJob context: {c}\n"))
        .unwrap_or_default();

    format!(
        "You are classifying a photo taken by a field service technician.\n\
         Choose exactly one category:\n{categories}\n{context}\n\
         Respond with ONLY a JSON object with these fields:\n\
         {{\"category\": \"<category>\", \"confidence\": <0.0-1.0>, \
         \"description\": \"<one sentence>\", \"relevance\": \"high|medium|low\", \
         \"quality_flags\": [\"<issue>\", ...]}}"
    )
}

#[derive(Deserialize)]
struct RawClassification {
    category: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    relevance: Option<String>,
    #[serde(default)]
    quality_flags: Vec<String>,
}

fn default_confidence() -> f64 {
    UNSTRUCTURED_CONFIDENCE
}

/// Turn the model's answer into a classification. Answers that are not the
/// requested JSON become `other` with a neutral confidence.
pub fn parse_classification(answer: &str) -> Classification {
    let parsed = extract_json(answer)
        .and_then(|json| serde_json::from_str::<RawClassification>(json).ok());

    let Some(raw) = parsed else {
        debug!("Vision model answer was not JSON, filing as other");
        return Classification {
            category: PhotoCategory::Other,
            confidence: UNSTRUCTURED_CONFIDENCE,
            description: answer.trim().chars().take(200).collect(),
            relevance: Relevance::Medium,
            quality_flags: vec!["unstructured_response".to_string()],
        };
    };

    Classification {
        category: normalize_category(&raw.category),
        confidence: if raw.confidence.is_finite() {
            raw.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        },
        description: raw.description,
        relevance: raw
            .relevance
            .and_then(|r| Relevance::from_str(r.trim()).ok())
            .unwrap_or_default(),
        quality_flags: raw.quality_flags,
    }
}

/// The outermost `{...}` span, ignoring code fences and chatter around it.
fn extract_json(answer: &str) -> Option<&str> {
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    (start < end).then(|| &answer[start..=end])
}

/// Map a free-form category name onto the closed set.
pub fn normalize_category(raw: &str) -> PhotoCategory {
    let key = raw.trim().to_lowercase().replace([' ', '-'], "_");
    if let Ok(category) = PhotoCategory::from_str(&key) {
        return category;
    }

    PhotoCategory::iter()
        .map(|category| {
            let name: &'static str = category.into();
            (category, strsim::jaro_winkler(&key, name))
        })
        .filter(|(_, score)| *score >= CATEGORY_SNAP_SIMILARITY)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(category, _)| category)
        .unwrap_or(PhotoCategory::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn png(width: u32, height: u32) -> Arc<[u8]> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes.into()
    }

    /// Fails with the given status a fixed number of times, then answers.
    struct FlakyModel {
        failures: u32,
        status: u16,
        calls: AtomicU32,
    }

    #[async_trait]
    impl VisionModel for FlakyModel {
        async fn complete(&self, _prompt: &str, _image: &ImagePart) -> Result<String, ModelError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(ModelError::Status {
                    status: self.status,
                    body: "unavailable".to_string(),
                });
            }
            Ok(r#"{"category": "after_work", "confidence": 0.9, "description": "Finished panel", "relevance": "high"}"#.to_string())
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    fn client(model: Arc<FlakyModel>) -> ClassifierClient {
        let retry = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        };
        ClassifierClient::new(model, retry, 2)
    }

    #[test]
    fn test_parse_fenced_json() {
        let answer = "```json\n{\"category\": \"before_work\", \"confidence\": 0.82, \"description\": \"Panel\", \"relevance\": \"HIGH\"}\n```";
        let classification = parse_classification(answer);
        assert_eq!(classification.category, PhotoCategory::BeforeWork);
        assert_eq!(classification.confidence, 0.82);
        assert_eq!(classification.relevance, Relevance::High);
    }

    #[test]
    fn test_non_json_answer_is_other_half_confidence() {
        let classification = parse_classification("I think this shows a water heater.");
        assert_eq!(classification.category, PhotoCategory::Other);
        assert_eq!(classification.confidence, 0.5);
        assert_eq!(classification.quality_flags, vec!["unstructured_response"]);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let classification =
            parse_classification(r#"{"category": "during_work", "confidence": 7}"#);
        assert_eq!(classification.confidence, 1.0);
        assert_eq!(classification.relevance, Relevance::Medium);
    }

    #[test]
    fn test_normalize_category_snaps_near_misses() {
        assert_eq!(normalize_category("After Work"), PhotoCategory::AfterWork);
        assert_eq!(normalize_category("safety-documentation"), PhotoCategory::SafetyDocumentation);
        assert_eq!(normalize_category("equipment_photos"), PhotoCategory::EquipmentPhoto);
        assert_eq!(normalize_category("selfie"), PhotoCategory::Other);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_prepare_image_downscales_large_images() {
        let small = prepare_image(&png(64, 32)).unwrap();
        assert_eq!(small.mime_type, "image/png");

        let large = prepare_image(&png(2048, 1024)).unwrap();
        assert_eq!(large.mime_type, "image/jpeg");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&large.base64)
            .unwrap();
        let resized = image::load_from_memory(&decoded).unwrap();
        assert_eq!((resized.width(), resized.height()), (1024, 512));
    }

    #[test]
    fn test_prompt_lists_every_category_and_context() {
        let prompt = build_prompt(Some("Replace breaker in unit 4"));
        for category in PhotoCategory::iter() {
            assert!(prompt.contains(&category.to_string()));
        }
        assert!(prompt.contains("Replace breaker in unit 4"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let model = Arc::new(FlakyModel {
            failures: 2,
            status: 503,
            calls: AtomicU32::new(0),
        });
        let classification = client(model.clone())
            .classify(png(8, 8), None)
            .await
            .unwrap();
        assert_eq!(classification.category, PhotoCategory::AfterWork);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let model = Arc::new(FlakyModel {
            failures: 10,
            status: 429,
            calls: AtomicU32::new(0),
        });
        let err = client(model.clone())
            .classify(png(8, 8), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Exhausted { attempts: 3, .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let model = Arc::new(FlakyModel {
            failures: 10,
            status: 400,
            calls: AtomicU32::new(0),
        });
        let err = client(model.clone())
            .classify(png(8, 8), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Status { status: 400, .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_model_fails_fast() {
        let client = ClassifierClient::new(
            Arc::new(UnconfiguredVisionModel),
            RetryPolicy::default(),
            1,
        );
        let err = client.classify(png(8, 8), None).await.unwrap_err();
        assert!(matches!(err, ModelError::NotConfigured));
    }
}
