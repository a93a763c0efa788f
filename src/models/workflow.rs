use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::error::TriageError;
use crate::models::feedback::Feedback;
use crate::models::image::{ImageInput, ImageRecord, ImageStatus, PhotoCategory, QualityGrade};

/// Job types with a configured job template.
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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    ElectricalInspection,
    PlumbingRepair,
    HvacMaintenance,
    GeneralMaintenance,
}

/// Immutable input of one workflow run.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub images: Vec<ImageInput>,
    pub job_context: Option<String>,
    pub job_type: Option<JobType>,
    pub enable_retry: bool,
    pub max_attempts: u32,
}

impl BatchRequest {
    /// Attempt budget actually granted to the run.
    pub fn effective_max_attempts(&self) -> u32 {
        if self.enable_retry {
            self.max_attempts.max(1)
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowStatus {
    Started,
    Analyzing,
    Reflecting,
    Retrying,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legal edges of the triage state machine.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Started, Analyzing)
                | (Analyzing, Reflecting)
                | (Analyzing, Failed)
                | (Reflecting, Retrying)
                | (Reflecting, Completed)
                | (Reflecting, Failed)
                | (Retrying, Analyzing)
        )
    }
}

/// Outcome chosen by reflection for the current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Retry { image_ids: Vec<usize> },
    Abort,
}

impl Decision {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Retry { .. } => "retry",
            Self::Abort => "abort",
        }
    }
}

/// Aggregate state of one run. Owned by the orchestrator for the run's lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub request_id: Uuid,
    pub job_type: Option<JobType>,
    pub job_context: Option<String>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub retry_enabled: bool,
    pub images: Vec<ImageRecord>,
    pub reflection_notes: Vec<String>,
    pub status: WorkflowStatus,
    pub final_feedback: Option<Feedback>,
    pub failure_reason: Option<String>,
}

impl WorkflowState {
    pub fn new(request_id: Uuid, request: &BatchRequest) -> Self {
        let images = request
            .images
            .iter()
            .enumerate()
            .map(|(id, input)| ImageRecord::new(id, input.filename.clone()))
            .collect();

        Self {
            request_id,
            job_type: request.job_type,
            job_context: request.job_context.clone(),
            attempt: 1,
            max_attempts: request.effective_max_attempts(),
            retry_enabled: request.enable_retry,
            images,
            reflection_notes: Vec::new(),
            status: WorkflowStatus::Started,
            final_feedback: None,
            failure_reason: None,
        }
    }

    /// Whether reflection may still ask for another round.
    pub fn retry_permitted(&self) -> bool {
        self.retry_enabled && self.attempt < self.max_attempts
    }

    pub fn transition(&mut self, next: WorkflowStatus) -> Result<(), TriageError> {
        if !self.status.can_transition_to(next) {
            return Err(TriageError::Internal(format!(
                "illegal workflow transition {} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Flag the named images for another round and advance the attempt counter.
    pub fn schedule_retry(&mut self, image_ids: &[usize]) -> Result<(), TriageError> {
        if !self.retry_permitted() {
            return Err(TriageError::Internal(format!(
                "retry scheduled with exhausted budget ({}/{})",
                self.attempt, self.max_attempts
            )));
        }
        for id in image_ids {
            let record = self.images.get_mut(*id).ok_or_else(|| {
                TriageError::Internal(format!("retry names unknown image id {id}"))
            })?;
            record.status = ImageStatus::FlaggedForRetry;
            record.retaken_count += 1;
        }
        self.attempt += 1;
        Ok(())
    }

    /// Enter a terminal status and record the feedback. Feedback is set once.
    pub fn finish(
        &mut self,
        status: WorkflowStatus,
        feedback: Feedback,
    ) -> Result<(), TriageError> {
        if !status.is_terminal() {
            return Err(TriageError::Internal(format!(
                "finish called with non-terminal status {status}"
            )));
        }
        if self.final_feedback.is_some() {
            return Err(TriageError::Internal(
                "final feedback already recorded".to_string(),
            ));
        }
        self.transition(status)?;
        for record in &mut self.images {
            record.status = ImageStatus::Final;
        }
        self.final_feedback = Some(feedback);
        Ok(())
    }

    pub fn quality_pass_rate(&self) -> f64 {
        if self.images.is_empty() {
            return 0.0;
        }
        let passes = self.images.iter().filter(|r| r.passes_threshold).count();
        passes as f64 / self.images.len() as f64
    }

    /// No image has a usable quality score, so reflection has nothing to judge.
    pub fn all_quality_failed(&self) -> bool {
        !self.images.is_empty() && self.images.iter().all(ImageRecord::quality_failed)
    }

    /// Stop a run that cannot deliver a result. Skips the transition table and
    /// leaves terminal states alone. Returns the status the run was in.
    pub fn abandon(&mut self, reason: &str) -> WorkflowStatus {
        let previous = self.status;
        if !previous.is_terminal() {
            self.status = WorkflowStatus::Failed;
            self.failure_reason = Some(reason.to_string());
        }
        previous
    }
}

/// Aggregate statistics over one analysis round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub quality_passes: usize,
    pub quality_pass_rate: f64,
    pub categories: BTreeMap<PhotoCategory, usize>,
    pub quality_grades: BTreeMap<QualityGrade, usize>,
    pub average_combined_score: f64,
    pub recommendations: Vec<String>,
}

/// Final answer of a run, returned to the caller and sent as the `result` event.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalResult {
    pub request_id: Uuid,
    pub status: WorkflowStatus,
    pub success: bool,
    pub attempts_made: u32,
    pub quality_pass_rate: f64,
    pub images: Vec<ImageRecord>,
    pub reflection_notes: Vec<String>,
    pub feedback: Feedback,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub summary: BatchSummary,
}
