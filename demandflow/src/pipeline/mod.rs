//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage specifications and the validating builder
//! - Fixed-delay retry around a single stage
//! - The sequential DAG executor and its run record

mod builder;
mod dag;
mod retry;
mod run;
mod spec;

pub use builder::PipelineBuilder;
pub use dag::StageGraph;
pub use retry::{RetryPolicy, StageAttempts, StageRunner};
pub use run::{PipelineRun, RunOutcome, StageRecord};
pub use spec::StageSpec;
