use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::models::workflow::TerminalResult;

/// Workflow steps reported in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    Analyze,
    AnalyzeImage,
    Reflect,
    Retry,
    Feedback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub error_code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Started {
        total_images: usize,
        max_attempts: u32,
    },
    Processing {
        step: Step,
        attempt: u32,
    },
    StepCompleted {
        step: Step,
        attempt: u32,
        result: serde_json::Value,
    },
    Result {
        result: Box<TerminalResult>,
    },
    Error {
        detail: ErrorDetail,
    },
}

impl EventKind {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Processing { .. } => "processing",
            Self::StepCompleted { .. } => "step_completed",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }
}

/// One progress event of a run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEvent {
    pub request_id: Uuid,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}
