//! Templated feedback and batch summaries.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::config::standards::{JobTemplate, Standards};
use crate::models::feedback::{
    ActionKind, ActionableItem, CoverageComment, Feedback, Priority,
};
use crate::models::image::{ImageRecord, PhotoCategory, QualityFactors, QualityGrade, Relevance};
use crate::models::workflow::{BatchSummary, WorkflowState};
use crate::services::reflection;

/// Reflection notes echoed in the text block.
const NOTES_IN_TEXT: usize = 3;

/// Feedback for the final state of a run.
pub fn for_state(state: &WorkflowState, template: &JobTemplate, standards: &Standards) -> Feedback {
    generate(&state.images, &state.reflection_notes, template, standards)
}

/// Render feedback for a set of analyzed images. Deterministic for identical input.
pub fn generate(
    images: &[ImageRecord],
    reflection_notes: &[String],
    template: &JobTemplate,
    standards: &Standards,
) -> Feedback {
    let quality = &standards.quality;
    let templates = &standards.feedback;

    let worst_grade = images
        .iter()
        .map(|r| r.quality_grade)
        .min()
        .unwrap_or(QualityGrade::Poor);
    let grade_template = templates.for_grade(worst_grade);

    let coverage = reflection::coverage(images, template, quality.coverage_confidence);
    let other_count = images
        .iter()
        .filter(|r| r.category == PhotoCategory::Other)
        .count();
    let other_ratio = ratio(other_count, images.len());

    let (coverage_comment, coverage_message) = if !coverage.missing_categories.is_empty() {
        let labels: Vec<String> = coverage
            .missing_categories
            .iter()
            .map(PhotoCategory::label)
            .collect();
        (
            CoverageComment::MissingCategories,
            templates
                .coverage
                .missing_categories
                .replace("{categories}", &labels.join(", ")),
        )
    } else if other_ratio > quality.unclear_other_ratio {
        (
            CoverageComment::UnclearSubjects,
            templates.coverage.unclear_subjects.clone(),
        )
    } else {
        (
            CoverageComment::WellCategorized,
            templates.coverage.well_categorized.clone(),
        )
    };

    let failing: Vec<usize> = images
        .iter()
        .filter(|r| !r.passes_threshold)
        .map(|r| r.id)
        .collect();
    let dark_or_bright = weak_factor_ids(images, quality.weak_factor, |f| f.brightness);
    let blurry = weak_factor_ids(images, quality.weak_factor, |f| f.sharpness);

    let mut triggered = Vec::new();
    if !failing.is_empty() {
        triggered.push((ActionKind::RetakePhotos, failing.clone()));
    }
    if !coverage.is_complete() {
        triggered.push((ActionKind::AdditionalShots, Vec::new()));
    }
    if !dark_or_bright.is_empty() {
        triggered.push((ActionKind::LightingImprovement, dark_or_bright));
    }
    if !blurry.is_empty() {
        triggered.push((ActionKind::FocusImprovement, blurry));
    }

    let mut actionable_items: Vec<ActionableItem> = triggered
        .into_iter()
        .filter_map(|(kind, image_ids)| {
            templates.for_action(kind).map(|action| ActionableItem {
                kind,
                priority: action.priority,
                icon: action.icon.clone(),
                text: action.text.clone(),
                image_ids,
            })
        })
        .collect();
    actionable_items.sort_by_key(|item| (item.priority, item.kind));

    let fail_rate = ratio(failing.len(), images.len());
    let priority_level = if fail_rate > 0.5 {
        Priority::High
    } else if fail_rate > 0.2 {
        Priority::Medium
    } else {
        Priority::Low
    };

    let mut recommendations = grade_template.recommendations.clone();
    for record in images.iter().filter(|r| !r.passes_threshold) {
        for recommendation in &record.recommendations {
            if !recommendations.contains(recommendation) {
                recommendations.push(recommendation.clone());
            }
        }
    }

    let mut feedback = Feedback {
        tone: grade_template.tone,
        message: grade_template.message.clone(),
        coverage: coverage_comment,
        coverage_message,
        missing_categories: coverage.missing_categories,
        recommendations,
        actionable_items,
        priority_level,
        encouragement: templates.encouragement.first().cloned(),
        total_images_analyzed: images.len(),
        text: String::new(),
    };
    feedback.text = render_text(&feedback, images, reflection_notes);
    feedback
}

fn weak_factor_ids(
    images: &[ImageRecord],
    weak: f64,
    factor: impl Fn(&QualityFactors) -> f64,
) -> Vec<usize> {
    images
        .iter()
        .filter(|r| r.factors.as_ref().is_some_and(|f| factor(f) < weak))
        .map(|r| r.id)
        .collect()
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn render_text(feedback: &Feedback, images: &[ImageRecord], notes: &[String]) -> String {
    let passed = images.iter().filter(|r| r.passes_threshold).count();
    let mut distribution: BTreeMap<PhotoCategory, usize> = BTreeMap::new();
    for record in images {
        *distribution.entry(record.category).or_default() += 1;
    }

    let mut text = String::new();
    let _ = writeln!(text, "{}", feedback.message);
    let _ = writeln!(
        text,
        "Quality: {}/{} photos passed ({:.0}%)",
        passed,
        images.len(),
        ratio(passed, images.len()) * 100.0
    );
    let categories: Vec<String> = distribution
        .iter()
        .map(|(category, count)| format!("{} x{}", category.label(), count))
        .collect();
    let _ = writeln!(text, "Categories: {}", categories.join(", "));
    let _ = writeln!(text, "Coverage: {}", feedback.coverage_message);

    if !feedback.recommendations.is_empty() {
        let _ = writeln!(text, "Recommendations:");
        for recommendation in &feedback.recommendations {
            let _ = writeln!(text, "- {recommendation}");
        }
    }

    let recent = &notes[notes.len().saturating_sub(NOTES_IN_TEXT)..];
    if !recent.is_empty() {
        let _ = writeln!(text, "Review notes:");
        for note in recent {
            let _ = writeln!(text, "- {note}");
        }
    }

    if let Some(encouragement) = &feedback.encouragement {
        let _ = writeln!(text, "{encouragement}");
    }
    text.trim_end().to_string()
}

/// Aggregate statistics over one analysis round.
pub fn summarize(images: &[ImageRecord], standards: &Standards) -> BatchSummary {
    let multipliers = &standards.quality.relevance;
    let total = images.len();
    let successful = images.iter().filter(|r| !r.is_degraded()).count();
    let quality_passes = images.iter().filter(|r| r.passes_threshold).count();

    let mut categories = BTreeMap::new();
    let mut quality_grades = BTreeMap::new();
    let mut combined_total = 0.0;
    for record in images {
        *categories.entry(record.category).or_insert(0) += 1;
        *quality_grades.entry(record.quality_grade).or_insert(0) += 1;
        if !record.is_degraded() {
            let multiplier = match record.relevance {
                Relevance::High => multipliers.high,
                Relevance::Medium => multipliers.medium,
                Relevance::Low => multipliers.low,
            };
            combined_total += (0.4 * record.confidence + 0.6 * record.quality_score) * multiplier;
        }
    }

    let failed_quality = total - quality_passes;
    let low_relevance = images
        .iter()
        .filter(|r| r.relevance == Relevance::Low)
        .count();
    let uncategorized = categories.get(&PhotoCategory::Other).copied().unwrap_or(0);

    let mut recommendations = Vec::new();
    if failed_quality > 0 {
        recommendations.push(format!(
            "{failed_quality} photo(s) failed the quality check and should be retaken"
        ));
    }
    if low_relevance > 0 {
        recommendations.push(format!(
            "{low_relevance} photo(s) have low relevance to the job"
        ));
    }
    if uncategorized > 0 {
        recommendations.push(format!(
            "{uncategorized} photo(s) could not be categorized clearly"
        ));
    }

    BatchSummary {
        total,
        successful,
        quality_passes,
        quality_pass_rate: ratio(quality_passes, total),
        categories,
        quality_grades,
        average_combined_score: if total == 0 {
            0.0
        } else {
            combined_total / total as f64
        },
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::feedback::Tone;
    use crate::models::workflow::JobType;

    fn record(
        id: usize,
        category: PhotoCategory,
        grade: QualityGrade,
        score: f64,
        passes: bool,
    ) -> ImageRecord {
        let mut record = ImageRecord::new(id, None);
        record.category = category;
        record.confidence = 0.9;
        record.relevance = Relevance::High;
        record.quality_grade = grade;
        record.quality_score = score;
        record.passes_threshold = passes;
        record.factors = Some(QualityFactors {
            sharpness: 0.9,
            brightness: 0.9,
            contrast: 0.9,
            noise: 0.9,
        });
        record
    }

    fn general() -> (Standards, JobTemplate) {
        let standards = Standards::default();
        let template = standards
            .template_for(Some(JobType::GeneralMaintenance))
            .clone();
        (standards, template)
    }

    #[test]
    fn test_tone_follows_worst_grade() {
        let (standards, template) = general();
        let images = vec![
            record(0, PhotoCategory::BeforeWork, QualityGrade::Excellent, 0.9, true),
            record(1, PhotoCategory::AfterWork, QualityGrade::Good, 0.7, true),
        ];
        let feedback = generate(&images, &[], &template, &standards);
        assert_eq!(feedback.tone, Tone::Encouraging);
        assert_eq!(feedback.coverage, CoverageComment::WellCategorized);
        assert_eq!(feedback.priority_level, Priority::Low);
        assert!(feedback.actionable_items.is_empty());
    }

    #[test]
    fn test_missing_categories_take_precedence() {
        let (standards, template) = general();
        let images = vec![
            record(0, PhotoCategory::BeforeWork, QualityGrade::Good, 0.7, true),
            record(1, PhotoCategory::Other, QualityGrade::Good, 0.7, true),
        ];
        let feedback = generate(&images, &[], &template, &standards);
        assert_eq!(feedback.coverage, CoverageComment::MissingCategories);
        assert_eq!(feedback.missing_categories, vec![PhotoCategory::AfterWork]);
        assert!(feedback.coverage_message.contains("After Work"));
    }

    #[test]
    fn test_unclear_subjects_when_many_other() {
        let standards = Standards::default();
        let template = JobTemplate::generic();
        let images = vec![
            record(0, PhotoCategory::Other, QualityGrade::Good, 0.7, true),
            record(1, PhotoCategory::Other, QualityGrade::Good, 0.7, true),
            record(2, PhotoCategory::AfterWork, QualityGrade::Good, 0.7, true),
        ];
        let feedback = generate(&images, &[], &template, &standards);
        assert_eq!(feedback.coverage, CoverageComment::UnclearSubjects);
    }

    #[test]
    fn test_actionable_items_are_ordered_by_priority() {
        let (standards, template) = general();
        let mut dark = record(0, PhotoCategory::BeforeWork, QualityGrade::Poor, 0.2, false);
        if let Some(factors) = dark.factors.as_mut() {
            factors.brightness = 0.1;
            factors.sharpness = 0.1;
        }
        let feedback = generate(&[dark], &[], &template, &standards);
        let kinds: Vec<ActionKind> = feedback.actionable_items.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::RetakePhotos,
                ActionKind::AdditionalShots,
                ActionKind::LightingImprovement,
                ActionKind::FocusImprovement,
            ]
        );
        assert_eq!(feedback.actionable_items[0].icon, "camera");
        assert_eq!(feedback.actionable_items[0].image_ids, vec![0]);
        assert_eq!(feedback.tone, Tone::Helpful);
        assert_eq!(feedback.priority_level, Priority::High);
    }

    #[test]
    fn test_text_keeps_last_three_notes() {
        let (standards, template) = general();
        let images = vec![record(0, PhotoCategory::BeforeWork, QualityGrade::Fair, 0.5, false)];
        let notes: Vec<String> = (1..=4).map(|i| format!("note {i}")).collect();
        let feedback = generate(&images, &notes, &template, &standards);
        assert!(!feedback.text.contains("note 1"));
        assert!(feedback.text.contains("note 2"));
        assert!(feedback.text.contains("note 4"));
        assert!(feedback.text.contains("Quality: 0/1 photos passed (0%)"));
    }

    #[test]
    fn test_summary_combined_score() {
        let standards = Standards::default();
        let mut medium = record(1, PhotoCategory::AfterWork, QualityGrade::Good, 0.5, false);
        medium.relevance = Relevance::Medium;
        medium.confidence = 0.5;
        let mut broken = ImageRecord::new(2, None);
        broken.degrade_classification("timeout");
        let images = vec![
            record(0, PhotoCategory::BeforeWork, QualityGrade::Excellent, 1.0, true),
            medium,
            broken,
        ];

        let summary = summarize(&images, &standards);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.quality_passes, 1);
        // (0.36 + 0.6) * 1.0 + (0.2 + 0.3) * 0.7 + 0
        let expected = (0.96 + 0.35) / 3.0;
        assert!((summary.average_combined_score - expected).abs() < 1e-9);
        assert_eq!(summary.categories.get(&PhotoCategory::Other), Some(&1));
        assert_eq!(summary.recommendations.len(), 3);
    }
}
