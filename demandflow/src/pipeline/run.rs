//! The record of one pipeline run.

use crate::core::{StageOutput, StageStatus};
use crate::errors::DemandflowError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Per-stage result within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    /// The stage name.
    pub stage: String,
    /// Final status in this run.
    pub status: StageStatus,
    /// Attempts made (0 if the stage never started).
    pub attempts: usize,
    /// Wall time across all attempts, in milliseconds.
    pub duration_ms: f64,
    /// Error message if the stage failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    pub(crate) fn pending(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Pending,
            attempts: 0,
            duration_ms: 0.0,
            error: None,
        }
    }

    pub(crate) fn transition(&mut self, next: StageStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal stage transition {} -> {}",
            self.status,
            next
        );
        self.status = next;
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every stage succeeded.
    Succeeded,
    /// A stage failed; no later stage ran.
    Failed {
        /// The failing stage.
        stage: String,
        /// The error that ended the run.
        error: DemandflowError,
    },
    /// The run was aborted between stages.
    Cancelled {
        /// Why.
        reason: String,
        /// The stage that would have started next.
        next_stage: String,
    },
}

/// One end-to-end execution of a stage graph.
#[derive(Debug)]
pub struct PipelineRun {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Stage records in execution order.
    pub records: Vec<StageRecord>,
    /// Outputs of the stages that succeeded.
    pub outputs: HashMap<String, StageOutput>,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Total run time in milliseconds.
    pub duration_ms: f64,
}

impl PipelineRun {
    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded)
    }

    /// Returns the status of a stage, if it belongs to the run.
    #[must_use]
    pub fn status_of(&self, stage: &str) -> Option<StageStatus> {
        self.records
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| r.status)
    }

    /// Returns the record of a stage, if it belongs to the run.
    #[must_use]
    pub fn record(&self, stage: &str) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.stage == stage)
    }

    /// Returns the failing stage and error, if the run failed.
    #[must_use]
    pub fn failure(&self) -> Option<(&str, &DemandflowError)> {
        match &self.outcome {
            RunOutcome::Failed { stage, error } => Some((stage.as_str(), error)),
            _ => None,
        }
    }

    /// A JSON summary suitable for logs and CLI output.
    #[must_use]
    pub fn summary(&self) -> serde_json::Value {
        let (status, detail) = match &self.outcome {
            RunOutcome::Succeeded => ("succeeded", serde_json::Value::Null),
            RunOutcome::Failed { stage, error } => (
                "failed",
                serde_json::json!({
                    "stage": stage,
                    "kind": error.root_cause().kind(),
                    "error": error.to_string(),
                }),
            ),
            RunOutcome::Cancelled { reason, next_stage } => (
                "cancelled",
                serde_json::json!({ "reason": reason, "next_stage": next_stage }),
            ),
        };
        serde_json::json!({
            "run_id": self.run_id.to_string(),
            "pipeline": &self.pipeline,
            "started_at": self.started_at.to_rfc3339(),
            "status": status,
            "detail": detail,
            "duration_ms": self.duration_ms,
            "stages": &self.records,
        })
    }

    /// Converts the run into the outputs of every stage, or the error that ended it.
    ///
    /// # Errors
    ///
    /// Returns the failing stage's error, or `Cancelled`.
    pub fn into_result(self) -> Result<HashMap<String, StageOutput>, DemandflowError> {
        match self.outcome {
            RunOutcome::Succeeded => Ok(self.outputs),
            RunOutcome::Failed { error, .. } => Err(error),
            RunOutcome::Cancelled { reason, .. } => Err(DemandflowError::Cancelled(reason)),
        }
    }
}
