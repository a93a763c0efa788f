use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::image::PhotoCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tone {
    Positive,
    Encouraging,
    Constructive,
    Helpful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CoverageComment {
    WellCategorized,
    MissingCategories,
    UnclearSubjects,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Kinds of actionable items, in display order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    RetakePhotos,
    AdditionalShots,
    LightingImprovement,
    FocusImprovement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionableItem {
    pub kind: ActionKind,
    pub priority: Priority,
    pub icon: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub image_ids: Vec<usize>,
}

/// Rendered feedback for a finished batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub tone: Tone,
    pub message: String,
    pub coverage: CoverageComment,
    pub coverage_message: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub missing_categories: Vec<PhotoCategory>,
    pub recommendations: Vec<String>,
    pub actionable_items: Vec<ActionableItem>,
    pub priority_level: Priority,
    pub encouragement: Option<String>,
    pub total_images_analyzed: usize,
    pub text: String,
}
