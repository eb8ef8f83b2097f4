//! The `database_to_datalake` job.
//!
//! Four stages in a line:
//!
//! ```text
//! fetch_from_database -> download_from_store -> rename_file -> transform_and_load
//! ```
//!
//! Every write is a full overwrite, so re-running a stage after a partial
//! failure never leaves duplicated or appended data behind.

use crate::config::JobConfig;
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::errors::{DemandflowError, PipelineValidationError};
use crate::pipeline::{PipelineBuilder, RetryPolicy, StageGraph};
use crate::stages::Stage;
use crate::staging::StagingArea;
use crate::store::TabularStore;
use crate::transform::DemandTransformer;
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Pipeline name.
pub const PIPELINE_NAME: &str = "database_to_datalake";

/// Stage that copies the source table into the blob store.
pub const FETCH_FROM_DATABASE: &str = "fetch_from_database";
/// Stage that downloads the raw object into the staging area.
pub const DOWNLOAD_FROM_STORE: &str = "download_from_store";
/// Stage that gives the download its canonical name.
pub const RENAME_FILE: &str = "rename_file";
/// Stage that derives material demand and uploads it.
pub const TRANSFORM_AND_LOAD: &str = "transform_and_load";

/// Output key of `download_from_store`.
pub const DOWNLOADED_PATH: &str = "downloaded_path";
/// Output key of `rename_file`.
pub const CANONICAL_PATH: &str = "canonical_path";

#[derive(Debug)]
struct JobResources {
    store: TabularStore,
    staging: StagingArea,
    transformer: DemandTransformer,
    query: String,
    raw_key: String,
    material_key: String,
    canonical_name: String,
}

/// The demand job: its resources plus the stage chain over them.
#[derive(Debug, Clone)]
pub struct DemandJob {
    resources: Arc<JobResources>,
    retry: RetryPolicy,
}

impl DemandJob {
    /// Creates a job over an already-built store.
    #[must_use]
    pub fn new(store: TabularStore, config: &JobConfig) -> Self {
        Self {
            resources: Arc::new(JobResources {
                store,
                staging: StagingArea::new(&config.staging.dir),
                transformer: DemandTransformer::new(),
                query: config.source.query.clone(),
                raw_key: config.keys.raw_demand.clone(),
                material_key: config.keys.material_demand.clone(),
                canonical_name: config.staging.canonical_name.clone(),
            }),
            retry: config.retry.policy(),
        }
    }

    /// Connects to Postgres and S3 as configured.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the database URL or bucket is invalid.
    #[cfg(all(feature = "postgres", feature = "s3"))]
    pub async fn from_config(config: &JobConfig) -> Result<Self, DemandflowError> {
        use crate::store::{PgSource, S3BlobStore};

        let source = PgSource::connect_lazy(&config.source)?;
        let blobs = S3BlobStore::new(&config.store).await?;
        let store = TabularStore::new(
            Arc::new(source),
            Arc::new(blobs),
            config.source.timeout(),
            config.store.timeout(),
        );
        Ok(Self::new(store, config))
    }

    /// Overrides the retry policy for every stage.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the retry policy applied to every stage.
    #[must_use]
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Builds the stage graph.
    ///
    /// # Errors
    ///
    /// Never fails for this fixed chain; the error type comes from the builder.
    pub fn graph(&self) -> Result<StageGraph, PipelineValidationError> {
        let r = &self.resources;
        PipelineBuilder::new(PIPELINE_NAME)
            .with_default_retry(self.retry)
            .stage(FETCH_FROM_DATABASE, Arc::new(FetchFromDatabase(r.clone())), &[])?
            .stage(DOWNLOAD_FROM_STORE, Arc::new(DownloadFromStore(r.clone())), &[FETCH_FROM_DATABASE])?
            .stage(RENAME_FILE, Arc::new(RenameFile(r.clone())), &[DOWNLOAD_FROM_STORE])?
            .stage(TRANSFORM_AND_LOAD, Arc::new(TransformAndLoad(r.clone())), &[RENAME_FILE])?
            .build()
    }
}

#[derive(Debug)]
struct FetchFromDatabase(Arc<JobResources>);

#[async_trait]
impl Stage for FetchFromDatabase {
    fn name(&self) -> &str {
        FETCH_FROM_DATABASE
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, DemandflowError> {
        let table = self.0.store.extract_table(&self.0.query).await?;
        self.0.store.put_object(&self.0.raw_key, &table).await?;
        Ok(StageOutput::ok_value("rows", json!(table.len())).with_value("key", json!(&self.0.raw_key)))
    }
}

#[derive(Debug)]
struct DownloadFromStore(Arc<JobResources>);

#[async_trait]
impl Stage for DownloadFromStore {
    fn name(&self) -> &str {
        DOWNLOAD_FROM_STORE
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, DemandflowError> {
        let table = self.0.store.get_object(&self.0.raw_key).await?;
        let path = self.0.staging.write_download(&table).await?;
        Ok(StageOutput::ok_value(DOWNLOADED_PATH, json!(path.display().to_string())))
    }
}

#[derive(Debug)]
struct RenameFile(Arc<JobResources>);

#[async_trait]
impl Stage for RenameFile {
    fn name(&self) -> &str {
        RENAME_FILE
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, DemandflowError> {
        let downloaded = PathBuf::from(ctx.inputs().require_str(DOWNLOAD_FROM_STORE, DOWNLOADED_PATH)?);
        let canonical = self.0.staging.rename(&downloaded, &self.0.canonical_name).await?;
        Ok(StageOutput::ok_value(CANONICAL_PATH, json!(canonical.display().to_string())))
    }
}

#[derive(Debug)]
struct TransformAndLoad(Arc<JobResources>);

#[async_trait]
impl Stage for TransformAndLoad {
    fn name(&self) -> &str {
        TRANSFORM_AND_LOAD
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, DemandflowError> {
        let canonical = PathBuf::from(ctx.inputs().require_str(RENAME_FILE, CANONICAL_PATH)?);
        let product_demand = self.0.staging.read_table(&canonical).await?;
        let material_demand = self.0.transformer.transform_table(&product_demand)?;

        self.0.store.put_object(&self.0.material_key, &material_demand).await?;
        self.0.staging.discard(&canonical).await?;

        info!(
            input_rows = product_demand.len(),
            output_rows = material_demand.len(),
            key = %self.0.material_key,
            "Material demand loaded"
        );
        Ok(StageOutput::ok_value("rows", json!(material_demand.len()))
            .with_value("key", json!(&self.0.material_key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBlobStore, MemorySource};
    use std::time::Duration;

    fn job(dir: &std::path::Path) -> DemandJob {
        let mut config = JobConfig::default();
        config.staging.dir = dir.to_path_buf();
        let store = TabularStore::new(
            Arc::new(MemorySource::new(crate::table::Table::default())),
            Arc::new(MemoryBlobStore::new()),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        DemandJob::new(store, &config)
    }

    #[test]
    fn test_graph_shape() {
        let dir = tempfile::tempdir().unwrap();
        let graph = job(dir.path()).graph().unwrap();

        assert_eq!(graph.name(), PIPELINE_NAME);
        assert_eq!(
            graph.execution_order(),
            [FETCH_FROM_DATABASE, DOWNLOAD_FROM_STORE, RENAME_FILE, TRANSFORM_AND_LOAD]
        );
        assert!(graph.stage(RENAME_FILE).unwrap().dependencies.contains(DOWNLOAD_FROM_STORE));
    }

    #[test]
    fn test_default_retry_policy() {
        let dir = tempfile::tempdir().unwrap();
        let graph = job(dir.path()).graph().unwrap();

        for name in graph.execution_order() {
            assert_eq!(
                graph.stage(name).unwrap().retry,
                RetryPolicy::new(1, Duration::from_secs(10))
            );
        }
    }
}
