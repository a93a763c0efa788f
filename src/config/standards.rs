//! Job templates, quality standards and feedback templates.
//!
//! Loaded once at startup into an immutable [`Standards`] value. Each file is
//! optional; a missing file falls back to the built-in defaults below, a
//! malformed one is a startup error. Reloading swaps the whole value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::models::feedback::{ActionKind, Priority, Tone};
use crate::models::image::{PhotoCategory, QualityGrade};
use crate::models::workflow::JobType;

pub const JOB_TEMPLATES_FILE: &str = "job_templates.json";
pub const QUALITY_STANDARDS_FILE: &str = "quality_standards.json";
pub const FEEDBACK_TEMPLATES_FILE: &str = "feedback_templates.json";

#[derive(Debug, thiserror::Error)]
pub enum StandardsError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

// ── Job templates ───────────────────────────────────────────────────────

/// Completeness rules for one job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub name: String,
    pub description: String,
    pub required_categories: Vec<PhotoCategory>,
    #[serde(default)]
    pub optional_categories: Vec<PhotoCategory>,
    pub minimum_photos: usize,
    pub quality_threshold: f64,
    /// Per-category minimum counts above the implicit one-per-required-category.
    #[serde(default)]
    pub required_counts: BTreeMap<PhotoCategory, usize>,
}

impl JobTemplate {
    /// Template applied when the request names no job type.
    pub fn generic() -> Self {
        Self {
            name: "Generic".to_string(),
            description: "No job-specific photo requirements".to_string(),
            required_categories: Vec::new(),
            optional_categories: Vec::new(),
            minimum_photos: 1,
            quality_threshold: 0.7,
            required_counts: BTreeMap::new(),
        }
    }

    /// How many confident photos of `category` the template asks for.
    pub fn required_count(&self, category: PhotoCategory) -> usize {
        let base = usize::from(self.required_categories.contains(&category));
        self.required_counts
            .get(&category)
            .copied()
            .unwrap_or(0)
            .max(base)
    }

    /// Every category the template asks for at least once, including counted ones.
    pub fn all_required(&self) -> Vec<PhotoCategory> {
        let mut categories = self.required_categories.clone();
        for (category, count) in &self.required_counts {
            if *count > 0 && !categories.contains(category) {
                categories.push(*category);
            }
        }
        categories
    }
}

/// On-disk shape of `job_templates.json`.
#[derive(Debug, Deserialize)]
struct JobTemplatesFile {
    templates: Vec<JobTemplateEntry>,
}

#[derive(Debug, Deserialize)]
struct JobTemplateEntry {
    id: JobType,
    name: String,
    #[serde(default)]
    description: String,
    required_photo_categories: Vec<PhotoCategory>,
    #[serde(default)]
    optional_categories: Vec<PhotoCategory>,
    quality_requirements: QualityRequirements,
}

#[derive(Debug, Deserialize)]
struct QualityRequirements {
    minimum_photos: usize,
    quality_threshold: f64,
    #[serde(default)]
    required_counts: BTreeMap<PhotoCategory, usize>,
}

impl From<JobTemplateEntry> for JobTemplate {
    fn from(entry: JobTemplateEntry) -> Self {
        Self {
            name: entry.name,
            description: entry.description,
            required_categories: entry.required_photo_categories,
            optional_categories: entry.optional_categories,
            minimum_photos: entry.quality_requirements.minimum_photos,
            quality_threshold: entry.quality_requirements.quality_threshold,
            required_counts: entry.quality_requirements.required_counts,
        }
    }
}

fn builtin_job_templates() -> BTreeMap<JobType, JobTemplate> {
    use PhotoCategory::*;

    let mut templates = BTreeMap::new();
    templates.insert(
        JobType::ElectricalInspection,
        JobTemplate {
            name: "Electrical Inspection".to_string(),
            description: "Panel and circuit inspection with safety documentation".to_string(),
            required_categories: vec![BeforeWork, EquipmentPhoto, SafetyDocumentation, AfterWork],
            optional_categories: vec![DamageAssessment, DuringWork],
            minimum_photos: 4,
            quality_threshold: 0.7,
            required_counts: BTreeMap::from([(EquipmentPhoto, 2)]),
        },
    );
    templates.insert(
        JobType::PlumbingRepair,
        JobTemplate {
            name: "Plumbing Repair".to_string(),
            description: "Leak or fixture repair with damage documentation".to_string(),
            required_categories: vec![BeforeWork, DamageAssessment, AfterWork],
            optional_categories: vec![DuringWork, MaterialInventory],
            minimum_photos: 3,
            quality_threshold: 0.65,
            required_counts: BTreeMap::new(),
        },
    );
    templates.insert(
        JobType::HvacMaintenance,
        JobTemplate {
            name: "HVAC Maintenance".to_string(),
            description: "Unit service and filter replacement".to_string(),
            required_categories: vec![BeforeWork, EquipmentPhoto, AfterWork],
            optional_categories: vec![DuringWork, MaterialInventory, EnvironmentalConditions],
            minimum_photos: 3,
            quality_threshold: 0.65,
            required_counts: BTreeMap::new(),
        },
    );
    templates.insert(
        JobType::GeneralMaintenance,
        JobTemplate {
            name: "General Maintenance".to_string(),
            description: "General job requirements".to_string(),
            required_categories: vec![BeforeWork, AfterWork],
            optional_categories: vec![EquipmentPhoto, DuringWork],
            minimum_photos: 2,
            quality_threshold: 0.6,
            required_counts: BTreeMap::new(),
        },
    );
    templates
}

// ── Quality standards ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub sharpness: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub noise: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            sharpness: 0.4,
            brightness: 0.2,
            contrast: 0.2,
            noise: 0.2,
        }
    }
}

/// Divisors mapping raw image statistics onto [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorNormalisers {
    pub laplacian_variance: f64,
    pub contrast_stddev: f64,
    pub brightness_midpoint: f64,
    pub noise_blur_sigma: f32,
}

impl Default for FactorNormalisers {
    fn default() -> Self {
        Self {
            laplacian_variance: 1000.0,
            contrast_stddev: 64.0,
            brightness_midpoint: 128.0,
            noise_blur_sigma: 1.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeThresholds {
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            excellent: 0.8,
            good: 0.6,
            fair: 0.4,
        }
    }
}

impl GradeThresholds {
    pub fn grade(&self, score: f64) -> QualityGrade {
        if score >= self.excellent {
            QualityGrade::Excellent
        } else if score >= self.good {
            QualityGrade::Good
        } else if score >= self.fair {
            QualityGrade::Fair
        } else {
            QualityGrade::Poor
        }
    }
}

/// Conditions that make an image retake-eligible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConditions {
    pub quality_below: f64,
    pub other_confidence_below: f64,
}

impl Default for RetryConditions {
    fn default() -> Self {
        Self {
            quality_below: 0.5,
            other_confidence_below: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceMultipliers {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for RelevanceMultipliers {
    fn default() -> Self {
        Self {
            high: 1.0,
            medium: 0.7,
            low: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityStandards {
    pub weights: FactorWeights,
    pub normalisers: FactorNormalisers,
    pub grades: GradeThresholds,
    /// Per-image pass threshold when no job template applies.
    pub default_threshold: f64,
    /// Fraction of passing images needed for a batch to be accepted.
    pub minimum_pass_rate: f64,
    /// Confidence a classification needs to count towards category coverage.
    pub coverage_confidence: f64,
    /// Share of `other` images above which subjects are considered unclear.
    pub unclear_other_ratio: f64,
    /// Factor score below which lighting/focus advice is given.
    pub weak_factor: f64,
    pub retry: RetryConditions,
    pub relevance: RelevanceMultipliers,
}

impl Default for QualityStandards {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            normalisers: FactorNormalisers::default(),
            grades: GradeThresholds::default(),
            default_threshold: 0.7,
            minimum_pass_rate: 0.7,
            coverage_confidence: 0.5,
            unclear_other_ratio: 0.3,
            weak_factor: 0.5,
            retry: RetryConditions::default(),
            relevance: RelevanceMultipliers::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QualityStandardsFile {
    quality_standards: QualityStandards,
}

// ── Feedback templates ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeTemplate {
    pub message: String,
    pub tone: Tone,
    pub recommendations: Vec<String>,
}

/// Coverage commentary. `{categories}` is replaced with the missing list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageTemplates {
    pub well_categorized: String,
    pub missing_categories: String,
    pub unclear_subjects: String,
}

impl Default for CoverageTemplates {
    fn default() -> Self {
        Self {
            well_categorized: "All required photo categories are documented.".to_string(),
            missing_categories: "Missing required photos: {categories}.".to_string(),
            unclear_subjects:
                "Several photos have unclear subjects and could not be categorized.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTemplate {
    pub priority: Priority,
    pub icon: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackTemplates {
    pub quality_assessment: BTreeMap<QualityGrade, GradeTemplate>,
    pub coverage: CoverageTemplates,
    pub actionable_items: BTreeMap<ActionKind, ActionTemplate>,
    pub encouragement: Vec<String>,
}

impl Default for FeedbackTemplates {
    fn default() -> Self {
        let grade = |message: &str, tone: Tone, recommendations: &[&str]| GradeTemplate {
            message: message.to_string(),
            tone,
            recommendations: recommendations.iter().map(|r| r.to_string()).collect(),
        };
        let action = |priority: Priority, icon: &str, text: &str| ActionTemplate {
            priority,
            icon: icon.to_string(),
            text: text.to_string(),
        };

        Self {
            quality_assessment: BTreeMap::from([
                (
                    QualityGrade::Excellent,
                    grade(
                        "Excellent photo quality!",
                        Tone::Positive,
                        &["Continue this high standard"],
                    ),
                ),
                (
                    QualityGrade::Good,
                    grade(
                        "Good photo quality overall.",
                        Tone::Encouraging,
                        &["Minor improvements possible"],
                    ),
                ),
                (
                    QualityGrade::Fair,
                    grade(
                        "Photos are acceptable but could be improved.",
                        Tone::Constructive,
                        &["Focus on image sharpness", "Ensure proper lighting"],
                    ),
                ),
                (
                    QualityGrade::Poor,
                    grade(
                        "Photo quality needs improvement.",
                        Tone::Helpful,
                        &["Several photos should be retaken"],
                    ),
                ),
            ]),
            coverage: CoverageTemplates::default(),
            actionable_items: BTreeMap::from([
                (
                    ActionKind::RetakePhotos,
                    action(
                        Priority::High,
                        "camera",
                        "Retake photos that failed the quality check",
                    ),
                ),
                (
                    ActionKind::AdditionalShots,
                    action(
                        Priority::Medium,
                        "plus",
                        "Take additional shots to cover the required categories",
                    ),
                ),
                (
                    ActionKind::LightingImprovement,
                    action(
                        Priority::Low,
                        "sun",
                        "Improve lighting: avoid dark or washed-out shots",
                    ),
                ),
                (
                    ActionKind::FocusImprovement,
                    action(
                        Priority::Low,
                        "focus",
                        "Hold the camera steady and tap to focus before shooting",
                    ),
                ),
            ]),
            encouragement: vec!["Good documentation helps create valuable job records".to_string()],
        }
    }
}

impl FeedbackTemplates {
    /// Template for a grade, falling back to `fair` like the reference templates do.
    pub fn for_grade(&self, grade: QualityGrade) -> GradeTemplate {
        self.quality_assessment
            .get(&grade)
            .or_else(|| self.quality_assessment.get(&QualityGrade::Fair))
            .cloned()
            .unwrap_or_else(|| GradeTemplate {
                message: String::new(),
                tone: Tone::Constructive,
                recommendations: Vec::new(),
            })
    }

    pub fn for_action(&self, kind: ActionKind) -> Option<&ActionTemplate> {
        self.actionable_items.get(&kind)
    }
}

#[derive(Debug, Deserialize)]
struct FeedbackTemplatesFile {
    feedback_templates: FeedbackTemplates,
}

// ── Aggregate ───────────────────────────────────────────────────────────

/// All read-only configuration consumed by scoring, reflection and feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct Standards {
    pub job_templates: BTreeMap<JobType, JobTemplate>,
    pub generic_template: JobTemplate,
    pub quality: QualityStandards,
    pub feedback: FeedbackTemplates,
}

impl Default for Standards {
    fn default() -> Self {
        Self {
            job_templates: builtin_job_templates(),
            generic_template: JobTemplate::generic(),
            quality: QualityStandards::default(),
            feedback: FeedbackTemplates::default(),
        }
    }
}

impl Standards {
    /// Load standards from `dir`, or the built-in defaults when `dir` is `None`.
    pub fn load(dir: Option<&Path>) -> Result<Self, StandardsError> {
        let Some(dir) = dir else {
            info!("No standards directory configured, using built-in standards");
            return Ok(Self::default());
        };

        let mut standards = Self::default();

        if let Some(file) = read_json::<JobTemplatesFile>(&dir.join(JOB_TEMPLATES_FILE))? {
            standards.job_templates = file
                .templates
                .into_iter()
                .map(|entry| (entry.id, JobTemplate::from(entry)))
                .collect();
        }
        if let Some(file) = read_json::<QualityStandardsFile>(&dir.join(QUALITY_STANDARDS_FILE))? {
            standards.quality = file.quality_standards;
            standards.generic_template.quality_threshold = standards.quality.default_threshold;
        }
        if let Some(file) =
            read_json::<FeedbackTemplatesFile>(&dir.join(FEEDBACK_TEMPLATES_FILE))?
        {
            standards.feedback = file.feedback_templates;
        }

        info!(
            dir = %dir.display(),
            job_templates = standards.job_templates.len(),
            "Loaded photo standards"
        );
        Ok(standards)
    }

    /// Template for a job type; the generic template when none is given or configured.
    pub fn template_for(&self, job_type: Option<JobType>) -> &JobTemplate {
        job_type
            .and_then(|jt| self.job_templates.get(&jt))
            .unwrap_or(&self.generic_template)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StandardsError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Standards file not found, using defaults");
            return Ok(None);
        }
        Err(source) => {
            return Err(StandardsError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StandardsError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Shared handle to the current standards. Readers take a cheap snapshot;
/// a reload replaces the whole value at once.
#[derive(Debug)]
pub struct StandardsStore {
    current: RwLock<Arc<Standards>>,
}

impl StandardsStore {
    pub fn new(standards: Standards) -> Self {
        Self {
            current: RwLock::new(Arc::new(standards)),
        }
    }

    pub fn snapshot(&self) -> Arc<Standards> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, standards: Standards) {
        let next = Arc::new(standards);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
