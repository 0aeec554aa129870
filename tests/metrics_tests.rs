mod common;

use bqingest::metrics::{detect_rowcount_anomaly, emit_metrics, MetricsStore};
use bqingest::warehouse::DatasetLayout;
use chrono::{TimeZone, Utc};
use common::FakeWarehouse;
use std::time::Duration;

fn layout() -> DatasetLayout {
    DatasetLayout::new("bank_raw", "bank_raw_staging", "bank_meta")
}

#[tokio::test]
async fn test_write_metrics_creates_table_and_appends() {
    let warehouse = FakeWarehouse::new();
    let l = layout();
    let store = MetricsStore::new(&warehouse, &l);

    let metrics = emit_metrics("loans", 12, Duration::from_millis(250), Duration::from_secs(2));
    store.write_metrics(&metrics).await.unwrap();
    store.write_metrics(&metrics).await.unwrap();

    let creates = warehouse.executed_matching("CREATE TABLE IF NOT EXISTS `test-project.bank_meta.ingestion_metrics`");
    assert_eq!(creates.len(), 2);
    assert!(creates[0].contains("`table` STRING NOT NULL"));

    let rows = warehouse.inserted();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, l.meta_table("ingestion_metrics"));
    assert_eq!(rows[0].1["table"], "loans");
    assert_eq!(rows[0].1["rows_extracted"], 12);
    assert_eq!(rows[0].1["extraction_time_sec"], 0.25);
}

#[tokio::test]
async fn test_rejected_append_surfaces_as_policy_rejection() {
    let warehouse = FakeWarehouse::new().rejecting_inserts();
    let l = layout();
    let store = MetricsStore::new(&warehouse, &l);

    let err = store
        .write_metrics(&emit_metrics("loans", 1, Duration::ZERO, Duration::ZERO))
        .await
        .unwrap_err();
    assert!(err.is_policy_rejection());
}

#[tokio::test]
async fn test_last_rowcount_query_excludes_current_record() {
    let warehouse = FakeWarehouse::new().with_scalar("ingestion_metrics", Some("250"));
    let l = layout();
    let store = MetricsStore::new(&warehouse, &l);
    let now = Utc.with_ymd_and_hms(2024, 2, 1, 6, 0, 0).unwrap();

    let sql = store.last_rowcount_sql("o'brien", now);
    assert!(sql.contains("FROM `test-project.bank_meta.ingestion_metrics`"));
    assert!(sql.contains(r"`table` = 'o\'brien'"));
    assert!(sql.contains("timestamp < TIMESTAMP '2024-02-01T06:00:00.000000Z'"));
    assert!(sql.ends_with("ORDER BY timestamp DESC LIMIT 1"));

    assert_eq!(store.last_rowcount("loans", now).await.unwrap(), Some(250));
}

#[tokio::test]
async fn test_anomaly_thresholds() {
    let warehouse = FakeWarehouse::new().with_scalar("ingestion_metrics", Some("100"));
    let l = layout();
    let store = MetricsStore::new(&warehouse, &l);
    let now = Utc::now();

    let anomaly = detect_rowcount_anomaly(&store, "loans", 135, 30.0, now).await.unwrap();
    assert_eq!(anomaly.change_pct, 35.0);
    assert!(detect_rowcount_anomaly(&store, "loans", 120, 30.0, now).await.is_none());
}

#[tokio::test]
async fn test_no_history_or_zero_history() {
    let l = layout();
    let now = Utc::now();

    let empty = FakeWarehouse::new();
    let store = MetricsStore::new(&empty, &l);
    assert!(detect_rowcount_anomaly(&store, "loans", 1_000, 1.0, now).await.is_none());

    let zero = FakeWarehouse::new().with_scalar("ingestion_metrics", Some("0"));
    let store = MetricsStore::new(&zero, &l);
    assert!(detect_rowcount_anomaly(&store, "loans", 1_000, 1.0, now).await.is_none());

    let garbage = FakeWarehouse::new().with_scalar("ingestion_metrics", Some("lots"));
    let store = MetricsStore::new(&garbage, &l);
    assert!(detect_rowcount_anomaly(&store, "loans", 1_000, 1.0, now).await.is_none());
}
