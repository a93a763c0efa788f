use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use garde::Validate;
use std::sync::Arc;
use strum::IntoEnumIterator;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::config::standards::Standards;
use crate::error::{ApiError, TriageError};
use crate::models::api::{
    ApiEnvelope, BatchData, BatchProcessingRequest, ClassifyData, ClassifyRequest,
    FeedbackRequest, JobTemplateView, PrecomputedResult, QualityAnalysisRequest, QualityData,
    StandardsReloadData, WorkflowRequest,
};
use crate::models::feedback::Feedback;
use crate::models::image::{ImageRecord, ImageStatus};
use crate::models::workflow::{JobType, TerminalResult};
use crate::services::events::EventPublisher;
use crate::services::{feedback, intake};

type ApiResult<T> = Result<Json<ApiEnvelope<T>>, ApiError>;

/// Unwrap the JSON body and run its `garde` rules.
pub(crate) fn validated<T: Validate>(
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, TriageError>
where
    T::Context: Default,
{
    let Json(body) = body.map_err(|e| TriageError::Validation(e.body_text()))?;
    body.validate()
        .map_err(|report| TriageError::Validation(report.to_string()))?;
    Ok(body)
}

/// POST /api/v1/triage/classify: categorize one image.
pub async fn classify(
    State(state): State<AppState>,
    body: Result<Json<ClassifyRequest>, JsonRejection>,
) -> ApiResult<ClassifyData> {
    let request_id = Uuid::new_v4();
    let fail = |e: TriageError| e.with_request_id(request_id);

    let request = validated(body).map_err(fail)?;
    let input = intake::decode_image(&request.image, state.intake_limits())
        .await
        .map_err(fail)?;
    let bytes = input
        .load()
        .await
        .map_err(|e| fail(TriageError::ImageProcessing(e.into())))?;

    let classification = state
        .classifier
        .classify(bytes, request.job_context.as_deref())
        .await
        .map_err(|e| fail(e.into()))?;

    let expected_for_job = request.job_type.map(|job_type| {
        let standards = state.standards.snapshot();
        let template = standards.template_for(Some(job_type));
        template.required_categories.contains(&classification.category)
            || template.optional_categories.contains(&classification.category)
    });

    tracing::info!(
        %request_id,
        category = %classification.category,
        confidence = classification.confidence,
        job_type = ?request.job_type,
        "Image classified"
    );
    Ok(Json(ApiEnvelope::success(
        request_id,
        "Image classified",
        ClassifyData {
            filename: input.filename,
            job_context: request.job_context,
            job_type: request.job_type,
            expected_for_job,
            classification,
        },
    )))
}

/// POST /api/v1/triage/analyze-quality: score one image.
pub async fn analyze_quality(
    State(state): State<AppState>,
    body: Result<Json<QualityAnalysisRequest>, JsonRejection>,
) -> ApiResult<QualityData> {
    let request_id = Uuid::new_v4();
    let fail = |e: TriageError| e.with_request_id(request_id);

    let request = validated(body).map_err(fail)?;
    let input = intake::decode_image(&request.image, state.intake_limits())
        .await
        .map_err(fail)?;
    let bytes = input
        .load()
        .await
        .map_err(|e| fail(TriageError::ImageProcessing(e.into())))?;

    let standards = state.standards.snapshot();
    let threshold = standards.template_for(request.job_type).quality_threshold;
    let report = state
        .quality
        .score(bytes, &standards.quality)
        .await
        .map_err(|e| fail(e.into()))?;

    Ok(Json(ApiEnvelope::success(
        request_id,
        "Quality analysis completed",
        QualityData {
            filename: input.filename,
            threshold,
            passes_threshold: report.quality_score >= threshold,
            report,
        },
    )))
}

/// POST /api/v1/triage/process-batch: one analysis round, no reflection.
pub async fn process_batch(
    State(state): State<AppState>,
    body: Result<Json<BatchProcessingRequest>, JsonRejection>,
) -> ApiResult<BatchData> {
    let request_id = Uuid::new_v4();
    let fail = |e: TriageError| e.with_request_id(request_id);

    let request = validated(body).map_err(fail)?;
    let images = intake::decode_batch(&request.images, state.intake_limits())
        .await
        .map_err(fail)?;
    let batch = state.batch_request(
        images,
        request.job_context.clone(),
        request.job_type,
        false,
        Some(1),
    );

    let (results, summary) = state.engine.analyze_batch(&batch).await.map_err(fail)?;
    Ok(Json(ApiEnvelope::success(
        request_id,
        format!("Processed {} images", results.len()),
        BatchData {
            total_images: batch.images.len(),
            processed_images: results.len(),
            results,
            summary,
            job_context: request.job_context,
        },
    )))
}

/// POST /api/v1/triage/workflow: run the full workflow and wait for the result.
pub async fn run_workflow(
    State(state): State<AppState>,
    body: Result<Json<WorkflowRequest>, JsonRejection>,
) -> ApiResult<TerminalResult> {
    let request_id = Uuid::new_v4();
    let fail = |e: TriageError| e.with_request_id(request_id);

    let request = validated(body).map_err(fail)?;
    let images = intake::decode_batch(&request.images, state.intake_limits())
        .await
        .map_err(fail)?;
    let batch = state.batch_request(
        images,
        request.job_context,
        request.job_type,
        request.enable_retry,
        request.max_attempts,
    );

    let result = state
        .engine
        .run(batch, EventPublisher::detached(request_id))
        .await
        .map_err(fail)?;

    let message = if result.success {
        format!("Workflow completed after {} attempt(s)", result.attempts_made)
    } else {
        format!("Workflow failed after {} attempt(s)", result.attempts_made)
    };
    Ok(Json(ApiEnvelope::success(request_id, message, result)))
}

/// POST /api/v1/triage/feedback: feedback for results computed elsewhere.
pub async fn generate_feedback(
    State(state): State<AppState>,
    body: Result<Json<FeedbackRequest>, JsonRejection>,
) -> ApiResult<Feedback> {
    let request_id = Uuid::new_v4();
    let request = validated(body).map_err(|e| e.with_request_id(request_id))?;

    let standards = state.standards.snapshot();
    let template = standards.template_for(request.job_type);
    let images: Vec<ImageRecord> = request
        .results
        .iter()
        .enumerate()
        .map(|(id, result)| precomputed_record(id, result, template.quality_threshold, &standards))
        .collect();

    let feedback = feedback::generate(&images, &request.reflection_notes, template, &standards);
    Ok(Json(ApiEnvelope::success(
        request_id,
        "Feedback generated",
        feedback,
    )))
}

/// GET /api/v1/triage/job-templates: configured job templates.
pub async fn job_templates(State(state): State<AppState>) -> Json<ApiEnvelope<Vec<JobTemplateView>>> {
    let standards: Arc<Standards> = state.standards.snapshot();
    let templates = JobType::iter()
        .filter_map(|id| {
            standards.job_templates.get(&id).map(|template| JobTemplateView {
                id,
                template: template.clone(),
            })
        })
        .collect::<Vec<_>>();

    Json(ApiEnvelope::success(
        Uuid::new_v4(),
        format!("{} job templates", templates.len()),
        templates,
    ))
}

/// POST /api/v1/triage/standards/reload: re-read the standards directory and
/// swap it in for runs that start afterwards.
pub async fn reload_standards(State(state): State<AppState>) -> ApiResult<StandardsReloadData> {
    let request_id = Uuid::new_v4();
    let fail = |e: TriageError| e.with_request_id(request_id);

    let dir = state.config.standards_dir.clone();
    let load_dir = dir.clone();
    let standards = tokio::task::spawn_blocking(move || Standards::load(load_dir.as_deref()))
        .await
        .map_err(|e| fail(TriageError::Internal(format!("standards reload task failed: {e}"))))?
        .map_err(|e| fail(TriageError::Internal(e.to_string())))?;

    let job_templates = standards.job_templates.len();
    state.standards.replace(standards);
    tracing::info!(%request_id, job_templates, "Standards reloaded");

    Ok(Json(ApiEnvelope::success(
        request_id,
        "Standards reloaded",
        StandardsReloadData {
            standards_dir: dir.map(|d| d.display().to_string()),
            job_templates,
        },
    )))
}

fn precomputed_record(
    id: usize,
    result: &PrecomputedResult,
    threshold: f64,
    standards: &Standards,
) -> ImageRecord {
    let mut record = ImageRecord::new(id, result.filename.clone());
    record.category = result.category;
    record.confidence = result.confidence;
    record.relevance = result.relevance;
    record.quality_score = result.quality_score;
    record.quality_grade = standards.quality.grades.grade(result.quality_score);
    record.passes_threshold = result.quality_score >= threshold;
    record.status = ImageStatus::Final;
    record
}
