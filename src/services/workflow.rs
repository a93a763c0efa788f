//! The triage state machine.
//!
//! One call to [`WorkflowEngine::run`] drives a batch through bounded
//! analyze / reflect / retry rounds and ends in `completed` or `failed`.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::standards::{JobTemplate, Standards, StandardsStore};
use crate::error::TriageError;
use crate::models::event::{ErrorDetail, EventKind, Step};
use crate::models::image::{
    Classification, ImageInput, ImageRecord, ImageStatus, QualityReport,
};
use crate::models::workflow::{
    BatchRequest, BatchSummary, Decision, TerminalResult, WorkflowState, WorkflowStatus,
};
use crate::services::classifier::{ClassifierClient, ModelError};
use crate::services::events::{EventError, EventPublisher};
use crate::services::feedback;
use crate::services::quality::{QualityError, QualityScorer};
use crate::services::reflection::{self, Reflection};

impl From<EventError> for TriageError {
    fn from(e: EventError) -> Self {
        TriageError::Cancelled(e.to_string())
    }
}

/// Outcome of both analyses for one image in one round.
struct ImageAnalysis {
    id: usize,
    quality: Result<QualityReport, QualityError>,
    classification: Result<Classification, ModelError>,
}

/// Runs triage workflows. Cheap to share; holds no per-run state.
pub struct WorkflowEngine {
    quality: Arc<dyn QualityScorer>,
    classifier: ClassifierClient,
    standards: Arc<StandardsStore>,
    round_concurrency: usize,
}

impl WorkflowEngine {
    pub fn new(
        quality: Arc<dyn QualityScorer>,
        classifier: ClassifierClient,
        standards: Arc<StandardsStore>,
        round_concurrency: usize,
    ) -> Self {
        Self {
            quality,
            classifier,
            standards,
            round_concurrency: round_concurrency.max(1),
        }
    }

    /// Run a batch to a terminal result, publishing progress along the way.
    ///
    /// Ends with [`TriageError::Cancelled`] as soon as the event subscriber
    /// disconnects; in-flight analyses are dropped.
    pub async fn run(
        &self,
        request: BatchRequest,
        mut events: EventPublisher,
    ) -> Result<TerminalResult, TriageError> {
        let request_id = events.request_id();
        let cancel = events.cancellation();
        let started = Instant::now();
        metrics::counter!("triage_workflows_total").increment(1);

        let mut state = WorkflowState::new(request_id, &request);
        let span = tracing::info_span!("workflow", %request_id);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TriageError::Cancelled(
                "event subscriber disconnected".to_string(),
            )),
            result = self.drive(&request, &mut state, &mut events).instrument(span) => result,
        };

        metrics::histogram!("triage_workflow_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => {
                if result.success {
                    metrics::counter!("triage_workflows_completed").increment(1);
                } else {
                    metrics::counter!("triage_workflows_failed").increment(1);
                }
                info!(
                    %request_id,
                    status = %result.status,
                    attempts = result.attempts_made,
                    pass_rate = result.quality_pass_rate,
                    events = events.published() + 1,
                    "Workflow finished"
                );
                events
                    .publish(EventKind::Result {
                        result: Box::new(result.clone()),
                    })
                    .await?;
                Ok(result)
            }
            Err(TriageError::Cancelled(reason)) => {
                let interrupted = state.abandon(&reason);
                warn!(
                    %request_id,
                    reason = %reason,
                    interrupted = %interrupted,
                    status = %state.status,
                    attempt = state.attempt,
                    events = events.published(),
                    "Workflow cancelled"
                );
                Err(TriageError::Cancelled(reason))
            }
            Err(e) => {
                metrics::counter!("triage_workflows_failed").increment(1);
                tracing::error!(%request_id, error = %e, "Workflow aborted");
                // Best effort; the caller gets the error either way.
                let _ = events
                    .publish(EventKind::Error {
                        detail: ErrorDetail {
                            error_code: e.error_code().to_string(),
                            message: e.to_string(),
                        },
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        request: &BatchRequest,
        state: &mut WorkflowState,
        events: &mut EventPublisher,
    ) -> Result<TerminalResult, TriageError> {
        let standards = self.standards.snapshot();
        let template = standards.template_for(request.job_type);

        info!(
            images = state.images.len(),
            job_type = ?request.job_type,
            max_attempts = state.max_attempts,
            "Workflow started"
        );
        events
            .publish(EventKind::Started {
                total_images: state.images.len(),
                max_attempts: state.max_attempts,
            })
            .await?;

        loop {
            let attempt = state.attempt;
            state.transition(WorkflowStatus::Analyzing)?;
            events
                .publish(EventKind::Processing {
                    step: Step::Analyze,
                    attempt,
                })
                .await?;

            let analyzed = self
                .analyze_round(state, request, template, &standards, events)
                .await?;
            events
                .publish(EventKind::StepCompleted {
                    step: Step::Analyze,
                    attempt,
                    result: serde_json::json!({
                        "analyzed": analyzed,
                        "quality_pass_rate": state.quality_pass_rate(),
                        "degraded": state.images.iter().filter(|r| r.is_degraded()).count(),
                    }),
                })
                .await?;

            if state.all_quality_failed() {
                warn!(attempt, "Every image failed analysis");
                return self
                    .finish(
                        state,
                        WorkflowStatus::Failed,
                        Some("Every image failed analysis".to_string()),
                        template,
                        &standards,
                        events,
                    )
                    .await;
            }

            state.transition(WorkflowStatus::Reflecting)?;
            events
                .publish(EventKind::Processing {
                    step: Step::Reflect,
                    attempt,
                })
                .await?;

            let Reflection {
                decision,
                note,
                metrics: reflection_metrics,
            } = reflection::reflect(state, template, &standards.quality);
            info!(attempt, decision = decision.name(), note = %note, "Reflection");
            state.reflection_notes.push(note.clone());
            events
                .publish(EventKind::StepCompleted {
                    step: Step::Reflect,
                    attempt,
                    result: serde_json::json!({
                        "decision": decision,
                        "note": note,
                        "metrics": reflection_metrics,
                    }),
                })
                .await?;

            match decision {
                Decision::Accept => {
                    return self
                        .finish(state, WorkflowStatus::Completed, None, template, &standards, events)
                        .await;
                }
                Decision::Retry { image_ids } if image_ids.is_empty() => {
                    return self
                        .finish(state, WorkflowStatus::Completed, None, template, &standards, events)
                        .await;
                }
                Decision::Retry { image_ids } if state.retry_permitted() => {
                    state.transition(WorkflowStatus::Retrying)?;
                    events
                        .publish(EventKind::Processing {
                            step: Step::Retry,
                            attempt,
                        })
                        .await?;
                    state.schedule_retry(&image_ids)?;
                    events
                        .publish(EventKind::StepCompleted {
                            step: Step::Retry,
                            attempt,
                            result: serde_json::json!({
                                "image_ids": image_ids,
                                "next_attempt": state.attempt,
                            }),
                        })
                        .await?;
                }
                Decision::Retry { .. } | Decision::Abort => {
                    let reason = failure_reason(state, &reflection_metrics.coverage);
                    return self
                        .finish(
                            state,
                            WorkflowStatus::Failed,
                            Some(reason),
                            template,
                            &standards,
                            events,
                        )
                        .await;
                }
            }
        }
    }

    /// Analyze every pending or flagged image once. Returns how many were analyzed.
    async fn analyze_round(
        &self,
        state: &mut WorkflowState,
        request: &BatchRequest,
        template: &JobTemplate,
        standards: &Standards,
        events: &mut EventPublisher,
    ) -> Result<usize, TriageError> {
        let attempt = state.attempt;
        let pending: Vec<usize> = state
            .images
            .iter()
            .filter(|r| r.needs_analysis())
            .map(|r| r.id)
            .collect();
        let job_context = request.job_context.as_deref();

        let mut round = futures::stream::iter(pending.into_iter().map(|id| {
            self.analyze_image(id, &request.images[id], job_context, standards)
        }))
        .buffer_unordered(self.round_concurrency);

        let mut analyzed = 0;
        while let Some(analysis) = round.next().await {
            let record = state.images.get_mut(analysis.id).ok_or_else(|| {
                TriageError::Internal(format!("analysis for unknown image {}", analysis.id))
            })?;
            apply_analysis(record, analysis, template.quality_threshold);
            analyzed += 1;

            events
                .publish(EventKind::StepCompleted {
                    step: Step::AnalyzeImage,
                    attempt,
                    result: serde_json::json!({
                        "image_id": record.id,
                        "filename": record.filename,
                        "quality_score": record.quality_score,
                        "quality_grade": record.quality_grade,
                        "passes_threshold": record.passes_threshold,
                        "category": record.category,
                        "confidence": record.confidence,
                        "degraded": record.is_degraded(),
                    }),
                })
                .await?;
        }
        Ok(analyzed)
    }

    async fn analyze_image(
        &self,
        id: usize,
        input: &ImageInput,
        job_context: Option<&str>,
        standards: &Standards,
    ) -> ImageAnalysis {
        let bytes = match input.load().await {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = e.to_string();
                return ImageAnalysis {
                    id,
                    quality: Err(QualityError::Io(e)),
                    classification: Err(ModelError::Io(std::io::Error::other(message))),
                };
            }
        };

        let (quality, classification) = tokio::join!(
            self.quality.score(bytes.clone(), &standards.quality),
            self.classifier.classify(bytes, job_context),
        );
        ImageAnalysis {
            id,
            quality,
            classification,
        }
    }

    async fn finish(
        &self,
        state: &mut WorkflowState,
        status: WorkflowStatus,
        failure_reason: Option<String>,
        template: &JobTemplate,
        standards: &Standards,
        events: &mut EventPublisher,
    ) -> Result<TerminalResult, TriageError> {
        let attempt = state.attempt;
        events
            .publish(EventKind::Processing {
                step: Step::Feedback,
                attempt,
            })
            .await?;

        let feedback = feedback::for_state(state, template, standards);
        let summary = feedback::summarize(&state.images, standards);
        events
            .publish(EventKind::StepCompleted {
                step: Step::Feedback,
                attempt,
                result: serde_json::json!({
                    "tone": feedback.tone,
                    "priority_level": feedback.priority_level,
                    "actionable_items": feedback.actionable_items.len(),
                }),
            })
            .await?;

        state.finish(status, feedback.clone())?;
        state.failure_reason = failure_reason.clone();
        Ok(TerminalResult {
            request_id: state.request_id,
            status,
            success: status == WorkflowStatus::Completed,
            attempts_made: state.attempt,
            quality_pass_rate: state.quality_pass_rate(),
            images: state.images.clone(),
            reflection_notes: state.reflection_notes.clone(),
            feedback,
            failure_reason,
            summary,
        })
    }

    /// One analysis round over the whole batch, without reflection or retries.
    pub async fn analyze_batch(
        &self,
        request: &BatchRequest,
    ) -> Result<(Vec<ImageRecord>, BatchSummary), TriageError> {
        let standards = self.standards.snapshot();
        let template = standards.template_for(request.job_type);
        let mut events = EventPublisher::detached(Uuid::new_v4());
        let mut state = WorkflowState::new(events.request_id(), request);

        state.transition(WorkflowStatus::Analyzing)?;
        self.analyze_round(&mut state, request, template, &standards, &mut events)
            .await?;

        let summary = feedback::summarize(&state.images, &standards);
        Ok((state.images, summary))
    }
}

fn apply_analysis(record: &mut ImageRecord, analysis: ImageAnalysis, threshold: f64) {
    record.begin_round();

    match analysis.quality {
        Ok(report) => record.apply_quality(&report, threshold),
        Err(e) => {
            warn!(image_id = record.id, error = %e, "Quality analysis failed");
            record.degrade_quality(&e.to_string());
        }
    }
    match analysis.classification {
        Ok(classification) => record.apply_classification(classification),
        Err(e) => {
            warn!(image_id = record.id, error = %e, "Classification failed");
            record.degrade_classification(&e.to_string());
        }
    }

    if record.is_degraded() {
        metrics::counter!("triage_image_degraded_total").increment(1);
    }
    record.status = ImageStatus::Analyzed;
}

fn failure_reason(state: &WorkflowState, coverage: &reflection::Coverage) -> String {
    if !coverage.missing_categories.is_empty() {
        let names: Vec<String> = coverage
            .missing_categories
            .iter()
            .map(|c| c.to_string())
            .collect();
        format!("Missing required photo categories: {}", names.join(", "))
    } else if !coverage.minimum_met() {
        format!(
            "Only {} of {} required photos submitted",
            coverage.photo_count, coverage.minimum_photos
        )
    } else {
        format!(
            "Quality pass rate {:.0}% below the required minimum after {} attempt(s)",
            state.quality_pass_rate() * 100.0,
            state.attempt
        )
    }
}
