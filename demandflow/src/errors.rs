//! Error types for the demandflow pipeline.
//!
//! `DemandflowError` is the single error returned by store adapters, the
//! transformer, stage actions and the pipeline executor. Build-time problems
//! with a stage graph are reported as [`PipelineValidationError`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for demandflow operations.
#[derive(Debug, Error)]
pub enum DemandflowError {
    /// The relational source could not be reached (connect, pool or timeout).
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The relational source rejected or could not answer the query.
    #[error("Query error: {0}")]
    QueryError(String),

    /// The blob store could not be reached or refused the request.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// No object exists under the requested key.
    #[error("Object not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// A demand row carried a product name outside the rule table.
    #[error("Unknown product category '{value}'")]
    UnknownProductCategory {
        /// The offending product name.
        value: String,
    },

    /// A demand row could not be interpreted (bad date, negative demand, ...).
    #[error("Invalid record at row {row}: {message}")]
    InvalidRecord {
        /// Zero-based data row index.
        row: usize,
        /// What was wrong with it.
        message: String,
    },

    /// A stage failed on every attempt its retry policy allowed.
    #[error("Stage '{stage}' failed after {attempts} attempt(s): {source}")]
    StageExhaustedRetries {
        /// The stage name.
        stage: String,
        /// Number of attempts made, including the first.
        attempts: usize,
        /// The error from the final attempt.
        #[source]
        source: Box<DemandflowError>,
    },

    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A cycle was detected in the pipeline.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A stage read an output that a declared dependency did not produce.
    #[error("Stage '{stage}' is missing input '{key}' from '{dependency}'")]
    MissingInput {
        /// The reading stage.
        stage: String,
        /// The dependency expected to produce the value.
        dependency: String,
        /// The missing output key.
        key: String,
    },

    /// A stage read from a stage it does not depend on.
    #[error("Stage '{stage}' attempted to read '{dependency}', which is not a declared dependency")]
    UndeclaredDependency {
        /// The reading stage.
        stage: String,
        /// The stage it tried to read.
        dependency: String,
    },

    /// A stage was about to start while a dependency had not succeeded.
    #[error("Stage '{stage}' cannot start: dependency '{dependency}' has not succeeded")]
    DependencyNotSatisfied {
        /// The stage that was about to start.
        stage: String,
        /// The dependency that had not succeeded.
        dependency: String,
    },

    /// The run was aborted between stages.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// CSV encoding or decoding failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A dataframe operation in the transformer failed.
    #[error("Frame error: {0}")]
    Frame(#[from] polars::error::PolarsError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DemandflowError {
    /// Creates an unknown product category error.
    #[must_use]
    pub fn unknown_product(value: impl Into<String>) -> Self {
        Self::UnknownProductCategory {
            value: value.into(),
        }
    }

    /// Creates an invalid record error.
    #[must_use]
    pub fn invalid_record(row: usize, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            row,
            message: message.into(),
        }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Returns a stable snake_case name for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::QueryError(_) => "query_error",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::NotFound { .. } => "not_found",
            Self::UnknownProductCategory { .. } => "unknown_product_category",
            Self::InvalidRecord { .. } => "invalid_record",
            Self::StageExhaustedRetries { .. } => "stage_exhausted_retries",
            Self::Validation(_) => "validation",
            Self::CycleDetected(_) => "cycle_detected",
            Self::MissingInput { .. } => "missing_input",
            Self::UndeclaredDependency { .. } => "undeclared_dependency",
            Self::DependencyNotSatisfied { .. } => "dependency_not_satisfied",
            Self::Cancelled(_) => "cancelled",
            Self::Config(_) => "config",
            Self::Csv(_) => "csv",
            Self::Frame(_) => "frame",
            Self::Io(_) => "io",
        }
    }

    /// Returns the innermost error, looking through `StageExhaustedRetries`.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::StageExhaustedRetries { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Metadata about a graph validation error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a stage graph fails validation at build time.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "PIPELINE-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("PIPELINE-TEST", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "rename_file");

        assert_eq!(info.code, "PIPELINE-TEST");
        assert_eq!(info.fix_hint.as_deref(), Some("Fix this by doing that"));
        assert_eq!(info.context.get("stage").map(String::as_str), Some("rename_file"));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> a"));
        let validation: PipelineValidationError = err.into();
        assert_eq!(validation.code(), Some("PIPELINE-CYCLE"));
        assert_eq!(validation.stages.len(), 3);
    }

    #[test]
    fn test_exhausted_retries_root_cause() {
        let err = DemandflowError::StageExhaustedRetries {
            stage: "transform_and_load".to_string(),
            attempts: 2,
            source: Box::new(DemandflowError::unknown_product("luxury")),
        };

        assert_eq!(err.kind(), "stage_exhausted_retries");
        assert_eq!(err.root_cause().kind(), "unknown_product_category");
        assert!(err.to_string().contains("transform_and_load"));
        assert!(err.to_string().contains("luxury"));
    }

    #[test]
    fn test_not_found_display() {
        let err = DemandflowError::not_found("src/table_material_demand.csv");
        assert_eq!(err.to_string(), "Object not found: src/table_material_demand.csv");
    }
}
