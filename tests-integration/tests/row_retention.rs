//! Row retention integration tests
//!
//! Deletes time-series rows past an age cutoff. Row keys sort newest first, so
//! the cutoff is a row key range scanned page by page.

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use common::table::{RowFilter, TableStore};
use common::testing::{FlakyTableStore, TestConfigBuilder};
use common::storage::Stores;
use maintenance::pruner::TableStoragePruner;
use std::sync::Arc;
use tests_integration::fixtures::MaintenanceTestContext;
use tests_integration::{generators, init_test_logging};
use tokio_util::sync::CancellationToken;

const TABLE: &str = "SensorReadings";

/// 25 readings older than two months and 5 recent ones.
fn ages() -> Vec<Duration> {
    let old = (0..25).map(|i| Duration::days(70 + i));
    let recent = (0..5).map(|i| Duration::days(1 + i * 7));
    old.chain(recent).collect()
}

/// Test: "older than 2 months", page size 10, 25 matching rows
///
/// All 25 are deleted over exactly 3 pages and the final cursor is empty.
#[tokio::test]
async fn test_delete_older_than_two_months() -> Result<()> {
    init_test_logging();

    let ctx = MaintenanceTestContext::new_in_memory(TestConfigBuilder::new().build());
    let now = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
    generators::seed_readings(ctx.tables().as_ref(), TABLE, "sensor-7", now, ages()).await?;

    let filter = RowFilter::older_than_months(2, now);
    let deletion = ctx
        .pruner()
        .delete_where(TABLE, &filter, false, 10, None, &CancellationToken::new())
        .await?;

    assert_eq!(deletion.deleted, 25);
    assert_eq!(deletion.pages, 3);
    assert!(deletion.cursor.is_none());
    assert!(!deletion.cancelled);
    assert_eq!(ctx.row_count(TABLE).await?, 5);
    assert_eq!(ctx.metrics.rows_deleted(), 25);
    Ok(())
}

/// Test: a dry run pages through the same rows and deletes nothing
#[tokio::test]
async fn test_dry_run_counts_without_deleting() -> Result<()> {
    init_test_logging();

    let ctx = MaintenanceTestContext::new_in_memory(TestConfigBuilder::new().build());
    let now = Utc::now();
    generators::seed_readings(ctx.tables().as_ref(), TABLE, "sensor-7", now, ages()).await?;
    let before = ctx.snapshot_tables().await?;

    let deletion = ctx
        .pruner()
        .delete_older_than(
            TABLE,
            now - Duration::days(60),
            true,
            10,
            None,
            &CancellationToken::new(),
        )
        .await?;

    assert!(deletion.dry_run);
    assert_eq!((deletion.deleted, deletion.pages), (25, 3));
    assert_eq!(ctx.snapshot_tables().await?, before);
    Ok(())
}

/// Test: a cancelled deletion resumes from its cursor
///
/// The first call is cancelled after one page. Restarting from the returned
/// cursor deletes exactly the remaining rows.
#[tokio::test]
async fn test_cancelled_deletion_resumes_from_cursor() -> Result<()> {
    init_test_logging();

    let config = TestConfigBuilder::new().build();
    let stores = Stores::in_memory();
    let now = Utc::now();
    generators::seed_readings(stores.tables.as_ref(), TABLE, "sensor-7", now, ages()).await?;

    let cancel = CancellationToken::new();
    let flaky: Arc<dyn TableStore> = Arc::new(
        FlakyTableStore::new(stores.tables.clone()).cancel_after_queries(1, cancel.clone()),
    );
    let pruner = TableStoragePruner::new(flaky, config.pruner.clone(), config.retry.clone());

    let filter = RowFilter::older_than(now - Duration::days(60));
    let first = pruner
        .delete_where(TABLE, &filter, false, 10, None, &cancel)
        .await?;
    assert!(first.cancelled);
    assert_eq!((first.deleted, first.pages), (10, 1));
    let cursor = first.cursor.expect("cancelled run hands back a cursor");
    log::info!("Resuming from {cursor}");

    let ctx = MaintenanceTestContext::with_stores(config, stores);
    let second = ctx
        .pruner()
        .delete_where(TABLE, &filter, false, 10, Some(cursor), &CancellationToken::new())
        .await?;
    assert_eq!(second.deleted, 15);
    assert!(second.cursor.is_none());
    assert_eq!(ctx.row_count(TABLE).await?, 5);
    Ok(())
}

/// Test: rows in other partitions are untouched by a partition-scoped filter
#[tokio::test]
async fn test_partition_scoped_cutoff() -> Result<()> {
    init_test_logging();

    let ctx = MaintenanceTestContext::new_in_memory(TestConfigBuilder::new().build());
    let now = Utc::now();
    generators::seed_readings(ctx.tables().as_ref(), TABLE, "sensor-1", now, ages()).await?;
    generators::seed_readings(ctx.tables().as_ref(), TABLE, "sensor-2", now, ages()).await?;

    let filter = RowFilter::older_than(now - Duration::days(60)).with_partition("sensor-1");
    let deletion = ctx
        .pruner()
        .delete_where(TABLE, &filter, false, 7, None, &CancellationToken::new())
        .await?;

    assert_eq!(deletion.deleted, 25);
    assert_eq!(deletion.pages, 4);
    assert_eq!(ctx.row_count(TABLE).await?, 35);
    Ok(())
}
