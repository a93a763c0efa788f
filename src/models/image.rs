use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Closed set of photo categories a field photo can be filed under.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    Display,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PhotoCategory {
    EquipmentPhoto,
    BeforeWork,
    DuringWork,
    AfterWork,
    DamageAssessment,
    SafetyDocumentation,
    MaterialInventory,
    EnvironmentalConditions,
    Other,
}

impl PhotoCategory {
    /// Human label used in prompts and feedback ("Before Work").
    pub fn label(&self) -> String {
        let raw: &'static str = self.into();
        raw.split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Prompt hint describing what belongs in this category.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::EquipmentPhoto => "Photos of tools, machinery, or equipment",
            Self::BeforeWork => "Photos taken before starting work (initial conditions)",
            Self::DuringWork => "Photos taken while work is in progress",
            Self::AfterWork => "Photos showing completed work or final results",
            Self::DamageAssessment => "Photos documenting damage or issues",
            Self::SafetyDocumentation => "Photos related to safety protocols or hazards",
            Self::MaterialInventory => "Photos of materials, parts, or supplies",
            Self::EnvironmentalConditions => {
                "Photos of weather, site conditions, or surroundings"
            }
            Self::Other => "Photos that don't fit the above categories",
        }
    }
}

/// Quality grade ladder. Declared worst-first so `Ord` ranks `Poor` lowest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QualityGrade {
    Poor,
    Fair,
    Good,
    Excellent,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Relevance {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionBand {
    Low,
    Medium,
    High,
}

/// Per-factor scores, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityFactors {
    pub sharpness: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub noise: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub format: Option<String>,
    pub width: u32,
    pub height: u32,
    pub resolution: ResolutionBand,
}

/// Output of the quality analyzer for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub quality_score: f64,
    pub quality_grade: QualityGrade,
    pub factors: QualityFactors,
    pub metadata: ImageMetadata,
    pub recommendations: Vec<String>,
}

/// Output of the classifier for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: PhotoCategory,
    pub confidence: f64,
    pub description: String,
    pub relevance: Relevance,
    #[serde(default)]
    pub quality_flags: Vec<String>,
}

impl Classification {
    /// Record used when the model could not produce a usable answer.
    pub fn degraded(reason: &str) -> Self {
        Self {
            category: PhotoCategory::Other,
            confidence: 0.0,
            description: format!("Error: {reason}"),
            relevance: Relevance::Low,
            quality_flags: vec!["processing_error".to_string()],
        }
    }
}

/// Where the bytes of a submitted image live.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Arc<[u8]>),
    Path(PathBuf),
}

/// One image of a batch as submitted by the caller.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub source: ImageSource,
    pub filename: Option<String>,
}

impl ImageInput {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, filename: Option<String>) -> Self {
        Self {
            source: ImageSource::Bytes(bytes.into()),
            filename,
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string);
        Self {
            source: ImageSource::Path(path),
            filename,
        }
    }

    /// Resolve the image bytes, reading from disk for path references.
    pub async fn load(&self) -> std::io::Result<Arc<[u8]>> {
        match &self.source {
            ImageSource::Bytes(bytes) => Ok(Arc::clone(bytes)),
            ImageSource::Path(path) => Ok(tokio::fs::read(path).await?.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    Analyzed,
    FlaggedForRetry,
    Final,
}

/// Per-image working state, mutated in place across retry rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: usize,
    pub filename: Option<String>,
    pub quality_score: f64,
    pub quality_grade: QualityGrade,
    pub factors: Option<QualityFactors>,
    pub passes_threshold: bool,
    pub category: PhotoCategory,
    pub confidence: f64,
    pub relevance: Relevance,
    pub description: String,
    pub quality_flags: Vec<String>,
    pub recommendations: Vec<String>,
    pub retaken_count: u32,
    pub status: ImageStatus,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
}

const QUALITY_ERROR: &str = "quality";
const CLASSIFICATION_ERROR: &str = "classification";

impl ImageRecord {
    pub fn new(id: usize, filename: Option<String>) -> Self {
        Self {
            id,
            filename,
            quality_score: 0.0,
            quality_grade: QualityGrade::Poor,
            factors: None,
            passes_threshold: false,
            category: PhotoCategory::Other,
            confidence: 0.0,
            relevance: Relevance::Low,
            description: String::new(),
            quality_flags: Vec::new(),
            recommendations: Vec::new(),
            retaken_count: 0,
            status: ImageStatus::Pending,
            errors: Vec::new(),
        }
    }

    /// Whether the record takes part in the next analysis round.
    pub fn needs_analysis(&self) -> bool {
        matches!(
            self.status,
            ImageStatus::Pending | ImageStatus::FlaggedForRetry
        )
    }

    /// Clear round-local state before the record is re-analyzed.
    pub fn begin_round(&mut self) {
        self.errors.clear();
    }

    pub fn apply_quality(&mut self, report: &QualityReport, threshold: f64) {
        self.quality_score = report.quality_score;
        self.quality_grade = report.quality_grade;
        self.factors = Some(report.factors);
        self.passes_threshold = report.quality_score >= threshold;
        self.recommendations = report.recommendations.clone();
    }

    pub fn degrade_quality(&mut self, reason: &str) {
        self.quality_score = 0.0;
        self.quality_grade = QualityGrade::Poor;
        self.factors = None;
        self.passes_threshold = false;
        self.recommendations = vec!["Image could not be analyzed - retake the photo".to_string()];
        self.errors.push(format!("{QUALITY_ERROR}: {reason}"));
    }

    pub fn apply_classification(&mut self, classification: Classification) {
        self.category = classification.category;
        self.confidence = classification.confidence;
        self.relevance = classification.relevance;
        self.description = classification.description;
        self.quality_flags = classification.quality_flags;
    }

    pub fn degrade_classification(&mut self, reason: &str) {
        self.apply_classification(Classification::degraded(reason));
        self.errors.push(format!("{CLASSIFICATION_ERROR}: {reason}"));
    }

    /// True when any analysis of the latest round failed for this image.
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }

    /// True when the latest quality analysis failed. A failed classification
    /// alone leaves the image usable.
    pub fn quality_failed(&self) -> bool {
        self.errors.iter().any(|e| e.starts_with(QUALITY_ERROR))
    }
}
