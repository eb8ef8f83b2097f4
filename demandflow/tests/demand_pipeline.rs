//! End-to-end runs of the demand job against in-memory stores.

use demandflow::config::JobConfig;
use demandflow::core::StageStatus;
use demandflow::errors::DemandflowError;
use demandflow::events::CollectingEventSink;
use demandflow::job::{DemandJob, DOWNLOAD_FROM_STORE, FETCH_FROM_DATABASE, RENAME_FILE, TRANSFORM_AND_LOAD};
use demandflow::pipeline::RetryPolicy;
use demandflow::store::{MemoryBlobStore, MemorySource, TabularStore};
use demandflow::table::{MaterialDemandRecord, RawMaterial, Table};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    config: JobConfig,
    source: Arc<MemorySource>,
    blobs: Arc<MemoryBlobStore>,
    events: Arc<CollectingEventSink>,
}

impl Harness {
    fn new(table: Table) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = JobConfig::default();
        config.staging.dir = dir.path().join("staging");
        Self {
            _dir: dir,
            config,
            source: Arc::new(MemorySource::new(table)),
            blobs: Arc::new(MemoryBlobStore::new()),
            events: Arc::new(CollectingEventSink::new()),
        }
    }

    fn job(&self, retry: RetryPolicy) -> DemandJob {
        let store = TabularStore::new(
            self.source.clone(),
            self.blobs.clone(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        DemandJob::new(store, &self.config).with_retry(retry)
    }

    fn material_demand(&self) -> Vec<MaterialDemandRecord> {
        let bytes = self
            .blobs
            .object(&self.config.keys.material_demand)
            .expect("material demand object");
        Table::from_csv(&bytes).unwrap().to_records().unwrap()
    }

    fn staging_dir(&self) -> &Path {
        &self.config.staging.dir
    }
}

fn product_demand() -> Table {
    let mut table = Table::new(["date", "shop_id", "product_name", "demand"]);
    table.push_row(["2023-01-01", "1", "cheap", "100"]).unwrap();
    table.push_row(["2023-01-01", "1", "medium", "10"]).unwrap();
    table.push_row(["2023-01-02", "2", "expensive", "5"]).unwrap();
    table
}

fn record(date: &str, shop: &str, material: RawMaterial, kg: f64) -> MaterialDemandRecord {
    MaterialDemandRecord {
        date: date.parse().unwrap(),
        shop_id: shop.to_string(),
        raw_material: material,
        demand_kg: kg,
    }
}

fn no_retry() -> RetryPolicy {
    RetryPolicy::none()
}

#[tokio::test]
async fn test_full_run_publishes_material_demand() {
    let harness = Harness::new(product_demand());
    let graph = harness.job(no_retry()).graph().unwrap().with_event_sink(harness.events.clone());

    let run = graph.run().await;

    assert!(run.is_success(), "{}", run.summary());
    assert_eq!(
        harness.material_demand(),
        vec![
            record("2023-01-01", "1", RawMaterial::LocalArabica, 2.1),
            record("2023-01-02", "2", RawMaterial::LocalArabica, 0.0),
            record("2023-01-01", "1", RawMaterial::ForeignArabica, 0.1),
            record("2023-01-02", "2", RawMaterial::ForeignArabica, 0.05),
            record("2023-01-01", "1", RawMaterial::Robusta, 0.0),
            record("2023-01-02", "2", RawMaterial::Robusta, 0.05),
        ]
    );
    assert_eq!(
        harness.source.queries(),
        vec!["SELECT * FROM dbo.table_product_demand".to_string()]
    );
    assert!(harness.blobs.object("src/table_product_demand.csv").is_some());
    assert_eq!(harness.events.events_of_type("stage.completed").len(), 4);
}

#[tokio::test]
async fn test_staging_area_is_left_empty() {
    let harness = Harness::new(product_demand());
    let run = harness.job(no_retry()).graph().unwrap().run().await;
    assert!(run.is_success());

    let leftovers = std::fs::read_dir(harness.staging_dir()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_rerun_overwrites_instead_of_appending() {
    let harness = Harness::new(product_demand());
    let job = harness.job(no_retry());

    assert!(job.graph().unwrap().run().await.is_success());
    let first = harness.material_demand();
    assert!(job.graph().unwrap().run().await.is_success());

    assert_eq!(harness.material_demand(), first);
    assert_eq!(harness.blobs.keys().len(), 2);
}

#[tokio::test]
async fn test_unknown_product_fails_transform_and_keeps_previous_output() {
    let harness = Harness::new(product_demand());
    harness.blobs.insert("src/table_material_demand.csv", "previous");

    let mut bad = product_demand();
    bad.push_row(["2023-01-03", "3", "luxury", "1"]).unwrap();
    let bad_harness = Harness {
        source: Arc::new(MemorySource::new(bad)),
        ..harness
    };

    let run = bad_harness.job(no_retry()).graph().unwrap().run().await;

    let (stage, err) = run.failure().unwrap();
    assert_eq!(stage, TRANSFORM_AND_LOAD);
    assert!(matches!(
        err.root_cause(),
        DemandflowError::UnknownProductCategory { value } if value == "luxury"
    ));
    assert_eq!(run.status_of(RENAME_FILE), Some(StageStatus::Succeeded));
    assert_eq!(
        bad_harness.blobs.object("src/table_material_demand.csv").unwrap(),
        "previous"
    );
}

#[tokio::test]
async fn test_source_outage_retried_then_succeeds() {
    let harness = Harness::new(product_demand());
    harness
        .source
        .fail_next(DemandflowError::SourceUnavailable("connection refused".to_string()));
    harness
        .source
        .fail_next(DemandflowError::SourceUnavailable("connection refused".to_string()));

    let run = harness
        .job(RetryPolicy::new(2, Duration::from_millis(1)))
        .graph()
        .unwrap()
        .run()
        .await;

    assert!(run.is_success());
    assert_eq!(run.record(FETCH_FROM_DATABASE).unwrap().attempts, 3);
    assert_eq!(run.record(DOWNLOAD_FROM_STORE).unwrap().attempts, 1);
}

#[tokio::test]
async fn test_store_outage_exhausts_retries_and_halts() {
    let harness = Harness::new(product_demand());
    for _ in 0..2 {
        harness
            .blobs
            .fail_next(DemandflowError::StoreUnavailable("minio down".to_string()));
    }

    let run = harness
        .job(RetryPolicy::new(1, Duration::from_millis(1)))
        .graph()
        .unwrap()
        .run()
        .await;

    assert!(!run.is_success());
    assert_eq!(run.status_of(FETCH_FROM_DATABASE), Some(StageStatus::Failed));
    for later in [DOWNLOAD_FROM_STORE, RENAME_FILE, TRANSFORM_AND_LOAD] {
        assert_eq!(run.status_of(later), Some(StageStatus::Pending));
    }
    let err = run.into_result().unwrap_err();
    assert!(matches!(
        err,
        DemandflowError::StageExhaustedRetries { ref stage, attempts: 2, .. } if stage == FETCH_FROM_DATABASE
    ));
    assert_eq!(err.root_cause().kind(), "store_unavailable");
}
