//! In-memory backends for tests and local dry runs.

use super::{BlobStore, RelationalSource};
use crate::errors::DemandflowError;
use crate::table::Table;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// A source that answers every query with the same table.
///
/// Failures queued with [`MemorySource::fail_next`] are returned first, one per call.
#[derive(Debug, Default)]
pub struct MemorySource {
    table: Table,
    delay: Option<Duration>,
    failures: Mutex<VecDeque<DemandflowError>>,
    queries: Mutex<Vec<String>>,
}

impl MemorySource {
    /// Creates a source that returns `table`.
    #[must_use]
    pub fn new(table: Table) -> Self {
        Self {
            table,
            ..Self::default()
        }
    }

    /// Sleeps before answering each query.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes the next call fail with `error`.
    pub fn fail_next(&self, error: DemandflowError) {
        self.failures.lock().push_back(error);
    }

    /// Returns every query received, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl RelationalSource for MemorySource {
    async fn fetch(&self, query: &str) -> Result<Table, DemandflowError> {
        self.queries.lock().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.table.clone())
    }
}

/// A blob store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
    delay: Option<Duration>,
    failures: Mutex<VecDeque<DemandflowError>>,
    puts: Mutex<usize>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps before serving each put or get.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes the next put or get fail with `error`.
    pub fn fail_next(&self, error: DemandflowError) {
        self.failures.lock().push_back(error);
    }

    /// Stores raw bytes directly, bypassing failure injection.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Bytes>) {
        self.objects.write().insert(key.into(), bytes.into());
    }

    /// Returns the raw bytes under `key`.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).cloned()
    }

    /// Returns every key in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Number of successful puts.
    #[must_use]
    pub fn put_count(&self) -> usize {
        *self.puts.lock()
    }

    async fn serve(&self) -> Result<(), DemandflowError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_object(&self, key: &str, bytes: Bytes) -> Result<(), DemandflowError> {
        self.serve().await?;
        self.objects.write().insert(key.to_string(), bytes);
        *self.puts.lock() += 1;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, DemandflowError> {
        self.serve().await?;
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| DemandflowError::not_found(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_next_is_consumed() {
        let source = MemorySource::new(Table::new(["a"]));
        source.fail_next(DemandflowError::SourceUnavailable("down".to_string()));

        assert!(source.fetch("SELECT 1").await.is_err());
        assert!(source.fetch("SELECT 1").await.is_ok());
        assert_eq!(source.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_blob_roundtrip_and_count() {
        let store = MemoryBlobStore::new();
        store.put_object("k", Bytes::from_static(b"a,b\n")).await.unwrap();

        assert_eq!(store.get_object("k").await.unwrap(), Bytes::from_static(b"a,b\n"));
        assert_eq!(store.put_count(), 1);
        assert!(matches!(
            store.get_object("nope").await,
            Err(DemandflowError::NotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blob_delay() {
        let store = MemoryBlobStore::new().with_delay(Duration::from_secs(3));
        let started = tokio::time::Instant::now();

        store.put_object("k", Bytes::from_static(b"x")).await.unwrap();
        store.get_object("k").await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }
}
