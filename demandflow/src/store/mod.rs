//! Tabular I/O against the relational source and the staging blob store.
//!
//! The two backends sit behind small traits so the job can run against
//! Postgres + S3 in production and in-memory stores in tests. [`TabularStore`]
//! puts a timeout around every call and handles the CSV encoding; it does no
//! transformation of its own.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "s3")]
mod s3;

pub use memory::{MemoryBlobStore, MemorySource};
#[cfg(feature = "postgres")]
pub use postgres::PgSource;
#[cfg(feature = "s3")]
pub use s3::S3BlobStore;

use crate::errors::DemandflowError;
use crate::table::Table;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A queryable relational source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelationalSource: Send + Sync {
    /// Runs `query` and returns every row.
    async fn fetch(&self, query: &str) -> Result<Table, DemandflowError>;
}

/// An object store addressed by key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes `bytes` under `key`, replacing any existing object.
    async fn put_object(&self, key: &str, bytes: Bytes) -> Result<(), DemandflowError>;

    /// Reads the object under `key`.
    async fn get_object(&self, key: &str) -> Result<Bytes, DemandflowError>;
}

/// Table-level access to the source and the blob store.
#[derive(Clone)]
pub struct TabularStore {
    source: Arc<dyn RelationalSource>,
    blobs: Arc<dyn BlobStore>,
    source_timeout: Duration,
    store_timeout: Duration,
}

impl std::fmt::Debug for TabularStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabularStore")
            .field("source_timeout", &self.source_timeout)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl TabularStore {
    /// Creates a store over the given backends.
    #[must_use]
    pub fn new(
        source: Arc<dyn RelationalSource>,
        blobs: Arc<dyn BlobStore>,
        source_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            source,
            blobs,
            source_timeout,
            store_timeout,
        }
    }

    /// Runs `query` against the source.
    ///
    /// # Errors
    ///
    /// `SourceUnavailable` if the source cannot be reached in time,
    /// `QueryError` if it rejects the query.
    pub async fn extract_table(&self, query: &str) -> Result<Table, DemandflowError> {
        let table = tokio::time::timeout(self.source_timeout, self.source.fetch(query))
            .await
            .map_err(|_| {
                DemandflowError::SourceUnavailable(format!(
                    "query timed out after {}s",
                    self.source_timeout.as_secs_f64()
                ))
            })??;
        info!(rows = table.len(), columns = table.headers().len(), "Extracted table");
        Ok(table)
    }

    /// Writes `table` as CSV under `key`, replacing any existing object.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the store cannot be reached in time.
    pub async fn put_object(&self, key: &str, table: &Table) -> Result<(), DemandflowError> {
        let bytes = Bytes::from(table.to_csv()?);
        let size = bytes.len();
        tokio::time::timeout(self.store_timeout, self.blobs.put_object(key, bytes))
            .await
            .map_err(|_| self.store_timeout_error("put", key))??;
        info!(key, rows = table.len(), bytes = size, "Stored object");
        Ok(())
    }

    /// Reads the CSV object under `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key does not exist, `StoreUnavailable` if the store
    /// cannot be reached in time, `Csv` if the object is not valid CSV.
    pub async fn get_object(&self, key: &str) -> Result<Table, DemandflowError> {
        let bytes = tokio::time::timeout(self.store_timeout, self.blobs.get_object(key))
            .await
            .map_err(|_| self.store_timeout_error("get", key))??;
        debug!(key, bytes = bytes.len(), "Fetched object");
        Table::from_csv(&bytes)
    }

    fn store_timeout_error(&self, op: &str, key: &str) -> DemandflowError {
        DemandflowError::StoreUnavailable(format!(
            "{op} '{key}' timed out after {}s",
            self.store_timeout.as_secs_f64()
        ))
    }
}
