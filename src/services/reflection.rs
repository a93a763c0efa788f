//! Reflection over one finished analysis round.
//!
//! Decision priority: accept when enough images pass and the job template is
//! covered; otherwise retry the retake-eligible images while the attempt
//! budget allows; otherwise abort.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::standards::{JobTemplate, QualityStandards};
use crate::models::image::{ImageRecord, PhotoCategory};
use crate::models::workflow::{Decision, WorkflowState};

/// Category coverage of a batch against a job template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coverage {
    /// Required categories with fewer confident images than the template asks for.
    pub missing_categories: Vec<PhotoCategory>,
    pub minimum_photos: usize,
    pub photo_count: usize,
}

impl Coverage {
    pub fn minimum_met(&self) -> bool {
        self.photo_count >= self.minimum_photos
    }

    pub fn is_complete(&self) -> bool {
        self.missing_categories.is_empty() && self.minimum_met()
    }
}

/// Count confident images per category and compare against the template.
pub fn coverage(images: &[ImageRecord], template: &JobTemplate, confidence_bar: f64) -> Coverage {
    let mut confident: BTreeMap<PhotoCategory, usize> = BTreeMap::new();
    for record in images.iter().filter(|r| r.confidence >= confidence_bar) {
        *confident.entry(record.category).or_default() += 1;
    }

    let missing_categories = template
        .all_required()
        .into_iter()
        .filter(|category| {
            confident.get(category).copied().unwrap_or(0) < template.required_count(*category)
        })
        .collect();

    Coverage {
        missing_categories,
        minimum_photos: template.minimum_photos,
        photo_count: images.len(),
    }
}

/// Whether an image should be retaken on another round.
pub fn is_retake_eligible(record: &ImageRecord, standards: &QualityStandards) -> bool {
    record.quality_score < standards.retry.quality_below
        || (record.category == PhotoCategory::Other
            && record.confidence < standards.retry.other_confidence_below)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReflectionMetrics {
    pub attempt: u32,
    pub max_attempts: u32,
    pub quality_pass_rate: f64,
    pub passed: usize,
    pub total: usize,
    pub coverage: Coverage,
    pub eligible_for_retry: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reflection {
    pub decision: Decision,
    pub note: String,
    pub metrics: ReflectionMetrics,
}

/// Evaluate the batch and pick exactly one decision.
pub fn reflect(
    state: &WorkflowState,
    template: &JobTemplate,
    standards: &QualityStandards,
) -> Reflection {
    let total = state.images.len();
    let passed = state.images.iter().filter(|r| r.passes_threshold).count();
    let quality_pass_rate = state.quality_pass_rate();
    let coverage = coverage(&state.images, template, standards.coverage_confidence);
    let eligible_for_retry: Vec<usize> = state
        .images
        .iter()
        .filter(|r| is_retake_eligible(r, standards))
        .map(|r| r.id)
        .collect();

    let decision = if quality_pass_rate >= standards.minimum_pass_rate && coverage.is_complete() {
        Decision::Accept
    } else if state.retry_permitted() && !eligible_for_retry.is_empty() {
        Decision::Retry {
            image_ids: eligible_for_retry.clone(),
        }
    } else {
        Decision::Abort
    };

    let metrics = ReflectionMetrics {
        attempt: state.attempt,
        max_attempts: state.max_attempts,
        quality_pass_rate,
        passed,
        total,
        coverage,
        eligible_for_retry,
    };
    let note = render_note(&decision, &metrics, state.retry_permitted());

    Reflection {
        decision,
        note,
        metrics,
    }
}

fn render_note(decision: &Decision, metrics: &ReflectionMetrics, retry_permitted: bool) -> String {
    let coverage = &metrics.coverage;
    let coverage_text = if coverage.is_complete() {
        "coverage complete".to_string()
    } else if !coverage.missing_categories.is_empty() {
        let names: Vec<String> = coverage
            .missing_categories
            .iter()
            .map(|c| c.to_string())
            .collect();
        format!("missing {}", names.join(", "))
    } else {
        format!(
            "{} of {} minimum photos",
            coverage.photo_count, coverage.minimum_photos
        )
    };

    let outcome = match decision {
        Decision::Accept => "accepting batch".to_string(),
        Decision::Retry { image_ids } => format!("retrying {} image(s) {:?}", image_ids.len(), image_ids),
        Decision::Abort if !retry_permitted => "attempt budget exhausted, aborting".to_string(),
        Decision::Abort => "nothing eligible for retake, aborting".to_string(),
    };

    format!(
        "Attempt {}/{}: {}/{} images passed quality ({:.0}%), {}; {}",
        metrics.attempt,
        metrics.max_attempts,
        metrics.passed,
        metrics.total,
        metrics.quality_pass_rate * 100.0,
        coverage_text,
        outcome
    )
}
