//! In-memory fakes and builders shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use photo_triage::app_state::AppState;
use photo_triage::config::standards::{QualityStandards, Standards};
use photo_triage::config::AppConfig;
use photo_triage::models::image::{
    ImageMetadata, PhotoCategory, QualityFactors, QualityReport, ResolutionBand,
};
use photo_triage::services::classifier::{ImagePart, ModelError, VisionModel};
use photo_triage::services::quality::{QualityAnalyzer, QualityError, QualityScorer};

use crate::fixtures::to_base64;

/// Model answer in the requested JSON shape.
pub fn answer(category: PhotoCategory, confidence: f64) -> String {
    serde_json::json!({
        "category": category.to_string(),
        "confidence": confidence,
        "description": format!("{} photo", category.label()),
        "relevance": "high",
        "quality_flags": [],
    })
    .to_string()
}

#[derive(Clone)]
enum Script {
    Answer(String),
    FailWith(u16),
}

/// Vision model answering per image, keyed by the uploaded bytes.
#[derive(Default)]
pub struct ScriptedVisionModel {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedVisionModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(self, image: &[u8], category: PhotoCategory, confidence: f64) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(to_base64(image), Script::Answer(answer(category, confidence)));
        self
    }

    /// Every call for this image fails with the given HTTP status.
    pub fn failing(self, image: &[u8], status: u16) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(to_base64(image), Script::FailWith(status));
        self
    }

    pub fn calls_for(&self, image: &[u8]) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&to_base64(image))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl VisionModel for ScriptedVisionModel {
    async fn complete(&self, _prompt: &str, image: &ImagePart) -> Result<String, ModelError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(image.base64.clone())
            .or_default() += 1;

        let script = self.scripts.lock().unwrap().get(&image.base64).cloned();
        match script {
            Some(Script::Answer(answer)) => Ok(answer),
            Some(Script::FailWith(status)) => Err(ModelError::Status {
                status,
                body: "scripted failure".to_string(),
            }),
            None => Ok(answer(PhotoCategory::Other, 0.3)),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Vision model that never answers in time.
pub struct StalledVisionModel;

#[async_trait]
impl VisionModel for StalledVisionModel {
    async fn complete(&self, _prompt: &str, _image: &ImagePart) -> Result<String, ModelError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Err(ModelError::Malformed("stalled".to_string()))
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

/// Quality scorer returning a scripted score sequence per image. The last
/// score repeats once the sequence is used up. Unscripted images go to the
/// real analyzer.
#[derive(Default)]
pub struct ScriptedScorer {
    scores: Mutex<HashMap<String, Vec<f64>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scoring(self, image: &[u8], scores: &[f64]) -> Self {
        self.scores
            .lock()
            .unwrap()
            .insert(to_base64(image), scores.to_vec());
        self
    }
}

#[async_trait]
impl QualityScorer for ScriptedScorer {
    async fn score(
        &self,
        bytes: Arc<[u8]>,
        standards: &QualityStandards,
    ) -> Result<QualityReport, QualityError> {
        let key = to_base64(&bytes);
        let script = self.scores.lock().unwrap().get(&key).cloned();
        let Some(scores) = script else {
            return QualityAnalyzer.score(bytes, standards).await;
        };

        let call = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(key).or_default();
            *entry += 1;
            *entry - 1
        };
        let score = scores[call.min(scores.len() - 1)];

        Ok(QualityReport {
            quality_score: score,
            quality_grade: standards.grades.grade(score),
            factors: QualityFactors {
                sharpness: score,
                brightness: score,
                contrast: score,
                noise: score,
            },
            metadata: ImageMetadata {
                format: Some("png".to_string()),
                width: 64,
                height: 64,
                resolution: ResolutionBand::Low,
            },
            recommendations: Vec::new(),
        })
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        classifier_backoff_ms: 1,
        ..AppConfig::default()
    }
}

pub fn app_state(scorer: Arc<dyn QualityScorer>, model: Arc<dyn VisionModel>) -> AppState {
    AppState::new(test_config(), Standards::default(), scorer, model)
}
