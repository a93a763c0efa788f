mod fixtures;
mod helpers;

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use photo_triage::error::TriageError;
use photo_triage::models::event::{EventKind, Step};
use photo_triage::models::feedback::CoverageComment;
use photo_triage::models::image::{ImageInput, ImageStatus, PhotoCategory};
use photo_triage::models::workflow::{BatchRequest, JobType, TerminalResult, WorkflowStatus};
use photo_triage::services::classifier::UnconfiguredVisionModel;
use photo_triage::services::events::{self, EventPublisher};
use photo_triage::services::quality::QualityAnalyzer;

use fixtures::{corrupt_photo, dark_photo, sharp_photo};
use helpers::{app_state, ScriptedScorer, ScriptedVisionModel, StalledVisionModel};

fn request(
    photos: &[Vec<u8>],
    job_type: Option<JobType>,
    enable_retry: bool,
    max_attempts: u32,
) -> BatchRequest {
    BatchRequest {
        images: photos
            .iter()
            .enumerate()
            .map(|(i, bytes)| ImageInput::from_bytes(bytes.clone(), Some(format!("photo_{i}.png"))))
            .collect(),
        job_context: Some("Replace kitchen faucet".to_string()),
        job_type,
        enable_retry,
        max_attempts,
    }
}

async fn run_detached(
    scorer: ScriptedScorer,
    model: ScriptedVisionModel,
    request: BatchRequest,
) -> TerminalResult {
    let state = app_state(Arc::new(scorer), Arc::new(model));
    let outcome = state
        .engine
        .run(request, EventPublisher::detached(Uuid::new_v4()))
        .await;
    tokio_test::assert_ok!(outcome)
}

#[tokio::test]
async fn test_covered_batch_completes_in_one_attempt() {
    let photos = vec![sharp_photo(0), sharp_photo(1), sharp_photo(2)];
    let scorer = ScriptedScorer::new()
        .scoring(&photos[0], &[0.9])
        .scoring(&photos[1], &[0.8])
        .scoring(&photos[2], &[0.65]);
    let model = ScriptedVisionModel::new()
        .answering(&photos[0], PhotoCategory::BeforeWork, 0.9)
        .answering(&photos[1], PhotoCategory::AfterWork, 0.85)
        .answering(&photos[2], PhotoCategory::DuringWork, 0.8);

    let result = run_detached(
        scorer,
        model,
        request(&photos, Some(JobType::GeneralMaintenance), true, 3),
    )
    .await;

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert!(result.success);
    assert_eq!(result.attempts_made, 1);
    assert_eq!(result.quality_pass_rate, 1.0);
    assert_eq!(result.reflection_notes.len(), 1);
    assert_eq!(result.feedback.coverage, CoverageComment::WellCategorized);
    assert!(result.failure_reason.is_none());
    assert!(result.images.iter().all(|r| r.status == ImageStatus::Final));
    assert_eq!(result.summary.total, 3);
}

#[tokio::test]
async fn test_low_quality_image_is_retaken_and_accepted() {
    let photo = dark_photo(1);
    let scorer = ScriptedScorer::new().scoring(&photo, &[0.3, 0.75]);
    let model = ScriptedVisionModel::new().answering(&photo, PhotoCategory::EquipmentPhoto, 0.9);

    let result = run_detached(scorer, model, request(&[photo], None, true, 3)).await;

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.attempts_made, 2);
    assert_eq!(result.reflection_notes.len(), 2);
    assert_eq!(result.images[0].retaken_count, 1);
    assert_eq!(result.images[0].quality_score, 0.75);
    assert!(result.images[0].passes_threshold);
}

#[tokio::test]
async fn test_missing_category_with_nothing_to_retake_fails() {
    let photos = vec![sharp_photo(3), sharp_photo(4)];
    let scorer = ScriptedScorer::new()
        .scoring(&photos[0], &[0.9])
        .scoring(&photos[1], &[0.9]);
    let model = ScriptedVisionModel::new()
        .answering(&photos[0], PhotoCategory::BeforeWork, 0.9)
        .answering(&photos[1], PhotoCategory::BeforeWork, 0.9);

    let result = run_detached(
        scorer,
        model,
        request(&photos, Some(JobType::GeneralMaintenance), true, 3),
    )
    .await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert!(!result.success);
    assert_eq!(result.attempts_made, 1);
    assert_eq!(result.feedback.coverage, CoverageComment::MissingCategories);
    assert_eq!(result.feedback.missing_categories, vec![PhotoCategory::AfterWork]);
    assert!(result
        .failure_reason
        .as_deref()
        .is_some_and(|reason| reason.contains("after_work")));
}

#[tokio::test]
async fn test_classifier_failure_degrades_one_image_only() {
    let photos = vec![sharp_photo(5), sharp_photo(6), sharp_photo(7)];
    let scorer = ScriptedScorer::new()
        .scoring(&photos[0], &[0.9])
        .scoring(&photos[1], &[0.9])
        .scoring(&photos[2], &[0.9]);
    let model = Arc::new(
        ScriptedVisionModel::new()
            .answering(&photos[0], PhotoCategory::BeforeWork, 0.9)
            .answering(&photos[1], PhotoCategory::AfterWork, 0.9)
            .failing(&photos[2], 503),
    );

    let state = app_state(Arc::new(scorer), model.clone());
    let result = state
        .engine
        .run(
            request(&photos, Some(JobType::GeneralMaintenance), true, 3),
            EventPublisher::detached(Uuid::new_v4()),
        )
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.attempts_made, 1);
    let broken = &result.images[2];
    assert_eq!(broken.category, PhotoCategory::Other);
    assert_eq!(broken.confidence, 0.0);
    assert!(broken.errors.iter().any(|e| e.starts_with("classification")));
    assert_eq!(model.calls_for(&photos[2]), 3);
    assert_eq!(result.summary.successful, 2);
}

#[tokio::test]
async fn test_attempts_never_exceed_budget() {
    let photo = dark_photo(2);
    let scorer = ScriptedScorer::new().scoring(&photo, &[0.2]);
    let model = ScriptedVisionModel::new().answering(&photo, PhotoCategory::AfterWork, 0.9);

    let result = run_detached(scorer, model, request(&[photo], None, true, 3)).await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(result.attempts_made, 3);
    assert_eq!(result.reflection_notes.len(), 3);
    assert_eq!(result.images[0].retaken_count, 2);
    assert!(result.reflection_notes[2].contains("budget exhausted"));
}

#[tokio::test]
async fn test_retry_disabled_runs_a_single_round() {
    let photo = dark_photo(3);
    let scorer = ScriptedScorer::new().scoring(&photo, &[0.2, 0.9]);
    let model = ScriptedVisionModel::new().answering(&photo, PhotoCategory::AfterWork, 0.9);

    let result = run_detached(scorer, model, request(&[photo], None, false, 5)).await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(result.attempts_made, 1);
    assert_eq!(result.images[0].retaken_count, 0);
}

#[tokio::test]
async fn test_every_image_unreadable_fails_with_feedback() {
    let photos = vec![corrupt_photo(1), corrupt_photo(2)];
    let model = ScriptedVisionModel::new()
        .failing(&photos[0], 400)
        .failing(&photos[1], 400);

    let result = run_detached(
        ScriptedScorer::new(),
        model,
        request(&photos, None, true, 3),
    )
    .await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(result.attempts_made, 1);
    assert!(result.reflection_notes.is_empty());
    assert_eq!(result.feedback.total_images_analyzed, 2);
    assert_eq!(
        result.failure_reason.as_deref(),
        Some("Every image failed analysis")
    );
}

#[tokio::test]
async fn test_classifier_outage_with_passing_quality_still_completes() {
    let photo = sharp_photo(12);
    let scorer = ScriptedScorer::new().scoring(&photo, &[0.9]);
    let model = ScriptedVisionModel::new().failing(&photo, 503);

    let result = run_detached(scorer, model, request(&[photo], None, true, 3)).await;

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.attempts_made, 1);
    assert_eq!(result.reflection_notes.len(), 1);
    assert!(result.failure_reason.is_none());
    assert_eq!(result.images[0].category, PhotoCategory::Other);
    assert!(result.images[0].passes_threshold);
}

#[tokio::test]
async fn test_unconfigured_model_does_not_fail_generic_batch() {
    let photos = vec![sharp_photo(13), sharp_photo(14)];
    let state = app_state(Arc::new(QualityAnalyzer), Arc::new(UnconfiguredVisionModel));

    let result = state
        .engine
        .run(
            request(&photos, None, true, 3),
            EventPublisher::detached(Uuid::new_v4()),
        )
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.summary.successful, 0);
    assert!(result.images.iter().all(|r| r.passes_threshold));
    assert!(result
        .images
        .iter()
        .all(|r| r.errors.iter().any(|e| e.starts_with("classification"))));
}

#[tokio::test]
async fn test_events_are_ordered_and_end_with_result() {
    let photo = dark_photo(4);
    let scorer = ScriptedScorer::new().scoring(&photo, &[0.3, 0.75]);
    let model = ScriptedVisionModel::new().answering(&photo, PhotoCategory::EquipmentPhoto, 0.9);
    let state = app_state(Arc::new(scorer), Arc::new(model));

    let request_id = Uuid::new_v4();
    let (publisher, mut subscription) = events::channel(request_id, 4);
    let engine = state.engine.clone();
    let run = tokio::spawn(async move { engine.run(request(&[photo], None, true, 3), publisher).await });

    let mut received = Vec::new();
    while let Some(event) = subscription.recv().await {
        received.push(event);
    }
    let result = run.await.unwrap().unwrap();

    let sequences: Vec<u64> = received.iter().map(|e| e.sequence).collect();
    let expected: Vec<u64> = (1..=received.len() as u64).collect();
    assert_eq!(sequences, expected);
    assert!(received.iter().all(|e| e.request_id == request_id));

    assert!(matches!(received[0].kind, EventKind::Started { total_images: 1, max_attempts: 3 }));
    let last = received.last().unwrap();
    assert!(matches!(&last.kind, EventKind::Result { result: r } if r.attempts_made == 2));
    assert_eq!(
        received.iter().filter(|e| e.kind.is_terminal()).count(),
        1
    );

    let reflections = received
        .iter()
        .filter(|e| matches!(e.kind, EventKind::StepCompleted { step: Step::Reflect, .. }))
        .count();
    assert_eq!(reflections, result.reflection_notes.len());
    assert!(received
        .iter()
        .any(|e| matches!(e.kind, EventKind::Processing { step: Step::Retry, attempt: 1 })));
}

#[tokio::test]
async fn test_dropping_subscriber_cancels_run() {
    let state = app_state(Arc::new(QualityAnalyzer), Arc::new(StalledVisionModel));
    let (publisher, mut subscription) = events::channel(Uuid::new_v4(), 8);
    let engine = state.engine.clone();
    let photos = vec![sharp_photo(10)];
    let run = tokio::spawn(async move { engine.run(request(&photos, None, true, 3), publisher).await });

    let first = subscription.recv().await.unwrap();
    assert!(matches!(first.kind, EventKind::Started { .. }));
    drop(subscription);

    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run should stop once the subscriber is gone")
        .unwrap();
    assert!(matches!(outcome, Err(TriageError::Cancelled(_))));
}

#[tokio::test]
async fn test_process_batch_summarizes_one_round() {
    let photos = vec![sharp_photo(11), dark_photo(5)];
    let model = ScriptedVisionModel::new()
        .answering(&photos[0], PhotoCategory::AfterWork, 0.9)
        .answering(&photos[1], PhotoCategory::BeforeWork, 0.6);
    let state = app_state(Arc::new(QualityAnalyzer), Arc::new(model));

    let (images, summary) = state
        .engine
        .analyze_batch(&request(&photos, None, false, 1))
        .await
        .unwrap();

    assert_eq!(images.len(), 2);
    assert!(images[0].passes_threshold);
    assert!(!images[1].passes_threshold);
    assert_eq!(summary.total, 2);
    assert_eq!(summary.quality_passes, 1);
    assert_eq!(summary.quality_pass_rate, 0.5);
    assert_eq!(summary.categories.get(&PhotoCategory::AfterWork), Some(&1));
}
