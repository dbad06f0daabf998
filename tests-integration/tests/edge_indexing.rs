//! Edge index integration tests
//!
//! Indexes documents into the foreign-key edge table, moves references
//! around and checks that replays leave the index unchanged.

use anyhow::Result;
use common::testing::TestConfigBuilder;
use maintenance::edge::{ForeignKeyEdge, compute_diff};
use serde_json::json;
use tests_integration::fixtures::MaintenanceTestContext;
use tests_integration::{generators, init_test_logging};
use tokio_util::sync::CancellationToken;

const EDGES: &str = "ForeignKeyEdges";

async fn context(batch_size: usize) -> Result<MaintenanceTestContext> {
    let config = TestConfigBuilder::new().with_batch_size(batch_size).build();
    let ctx = MaintenanceTestContext::new_in_memory(config);
    ctx.writer().ensure_tables().await?;
    Ok(ctx)
}

/// Test: indexing new documents writes one row per reference
///
/// Every device references a typed site and an untyped owner. The owner
/// reference is indexed and also recorded as an orphan.
#[tokio::test]
async fn test_index_new_documents() -> Result<()> {
    init_test_logging();

    let ctx = context(100).await?;
    let indexer = ctx.indexer();
    let cancel = CancellationToken::new();

    for device in generators::devices(30) {
        let outcome = indexer.reconcile(None, Some(&device), &cancel).await?;
        assert_eq!(outcome.additions, 2);
        assert_eq!(outcome.orphans.len(), 1);
    }

    assert_eq!(ctx.row_count(EDGES).await?, 60);
    assert_eq!(ctx.metrics.orphans_recorded(), 30);

    let orphans = ctx.writer().list_orphans("device-0007").await?;
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].field_path, "owner");
    assert_eq!(orphans[0].target.id, "user-7");
    assert!(orphans[0].target.entity_type.is_none());
    Ok(())
}

/// Test: moving a reference replaces its row and replaying is a no-op
#[tokio::test]
async fn test_moved_reference_and_replay() -> Result<()> {
    init_test_logging();

    let ctx = context(100).await?;
    let indexer = ctx.indexer();
    let cancel = CancellationToken::new();

    let before = generators::device(1, "site-a", "user-1");
    let mut after = before.clone();
    after["site"] = json!({ "id": "site-b", "entityType": "Site" });

    indexer.reconcile(None, Some(&before), &cancel).await?;
    let moved = indexer.reconcile(Some(&before), Some(&after), &cancel).await?;
    assert_eq!((moved.additions, moved.removals), (1, 1));
    let snapshot = ctx.snapshot_tables().await?;
    assert_eq!(snapshot.get(EDGES), Some(&2));

    // Replaying the same transition must not change the index.
    indexer.reconcile(Some(&before), Some(&after), &cancel).await?;
    assert_eq!(ctx.snapshot_tables().await?, snapshot);

    let removed = indexer.reconcile(Some(&after), None, &cancel).await?;
    assert_eq!(removed.removals, 2);
    assert_eq!(ctx.row_count(EDGES).await?, 0);
    Ok(())
}

/// Test: applying the same diff twice equals applying it once
#[tokio::test]
async fn test_apply_diff_is_idempotent() -> Result<()> {
    init_test_logging();

    let ctx = context(10).await?;
    let writer = ctx.writer();
    let cancel = CancellationToken::new();

    let old: Vec<_> = (0..15)
        .map(|i| edge("order-1", &format!("lines[{i}]"), &format!("product-{i}")))
        .collect();
    let new: Vec<_> = (5..25)
        .map(|i| edge("order-1", &format!("lines[{i}]"), &format!("product-{i}")))
        .collect();
    writer.upsert_all(&old, &cancel).await?;

    let diff = compute_diff(&old, &new);
    assert_eq!((diff.additions.len(), diff.removals.len()), (10, 5));

    let first = writer.apply_diff(&diff, &cancel).await?;
    // 15 operations in one partition at 10 per batch.
    assert_eq!(first.batches, 2);
    let snapshot = ctx.snapshot_tables().await?;

    writer.apply_diff(&diff, &cancel).await?;
    assert_eq!(ctx.snapshot_tables().await?, snapshot);
    assert_eq!(ctx.row_count(EDGES).await?, 20);

    assert!(compute_diff(&new, &new).is_empty());
    Ok(())
}

fn edge(source: &str, field_path: &str, target: &str) -> ForeignKeyEdge {
    ForeignKeyEdge::new(source, "Order", field_path, target, Some("Product".to_string()))
}
