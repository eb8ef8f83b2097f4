//! # Demandflow
//!
//! Moves the product-demand table from a relational source into a blob store,
//! then derives raw-material demand from it through a fixed rule table,
//! aggregation, a wide-to-long reshape and a grams-to-kilograms conversion.
//!
//! The job runs on a small in-process stage DAG:
//!
//! - **Stages** with declared dependencies, executed in topological order
//! - **Retry** per stage with a bounded number of attempts and a fixed delay
//! - **Events** for every stage transition, logged through `tracing`
//! - **Cancellation** between stages
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use demandflow::prelude::*;
//!
//! let config = JobConfig::load(None)?;
//! let job = DemandJob::from_config(&config).await?;
//! let run = job.graph()?.run().await;
//! println!("{}", run.summary());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod job;
pub mod pipeline;
pub mod stages;
pub mod staging;
pub mod store;
pub mod table;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::JobConfig;
    pub use crate::context::{StageContext, StageInputs};
    pub use crate::core::{StageOutput, StageStatus};
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, DemandflowError, PipelineValidationError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink};
    pub use crate::job::DemandJob;
    pub use crate::pipeline::{
        PipelineBuilder, PipelineRun, RetryPolicy, RunOutcome, StageGraph, StageRecord, StageSpec,
    };
    pub use crate::stages::{FnStage, NoOpStage, Stage, StageFuture};
    pub use crate::staging::StagingArea;
    pub use crate::store::{BlobStore, MemoryBlobStore, MemorySource, RelationalSource, TabularStore};
    pub use crate::table::{MaterialDemandRecord, ProductCategory, RawMaterial, Table};
    pub use crate::transform::DemandTransformer;
}
