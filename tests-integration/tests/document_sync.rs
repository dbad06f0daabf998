//! Document sync integration tests
//!
//! Covers the concurrency token contract, bounded and resumable bulk jobs,
//! node locator rebuilds and copying documents between two environments.

use anyhow::Result;
use common::document::FieldFilter;
use common::testing::TestConfigBuilder;
use maintenance::pager::Cursor;
use maintenance::sync::{EnvironmentSync, PageLimits, SyncAction};
use serde_json::json;
use tests_integration::fixtures::MaintenanceTestContext;
use tests_integration::{generators, init_test_logging};
use tokio_util::sync::CancellationToken;

async fn seeded(
    devices: usize,
    page_size: usize,
    page_count: usize,
) -> Result<MaintenanceTestContext> {
    let config = TestConfigBuilder::new()
        .with_sync_paging(page_size, page_count)
        .build();
    let ctx = MaintenanceTestContext::new_in_memory(config);
    let mut bodies = generators::devices(devices);
    bodies.extend(["site-0", "site-1", "site-2"].map(generators::site));
    generators::seed_documents(ctx.documents().as_ref(), &bodies).await?;
    Ok(ctx)
}

/// Test: a stale concurrency token is reported as a conflict, nothing written
#[tokio::test]
async fn test_concurrency_token_contract() -> Result<()> {
    init_test_logging();

    let ctx = seeded(3, 10, 10).await?;
    let repo = ctx.repository();

    let original = repo.get_json_by_id("device-0001").await?;
    let token = original["_etag"].as_str().unwrap_or_default().to_string();
    assert!(!token.is_empty());

    let mut first = original.clone();
    first["name"] = json!("first writer");
    let written = repo.upsert_json(&first, Some(&token)).await?;
    assert!(written.success && !written.conflict);

    let mut second = original.clone();
    second["name"] = json!("second writer");
    let rejected = repo.upsert_json(&second, Some(&token)).await?;
    assert!(rejected.conflict);
    assert!(!rejected.success);

    let stored = repo.get_json_by_id("device-0001").await?;
    assert_eq!(stored["name"], "first writer");
    assert_eq!(stored["_etag"].as_str(), written.etag.as_deref());
    assert_eq!(ctx.metrics.conflicts_detected(), 1);

    // Without a token the write is unconditional.
    assert!(repo.upsert_json(&second, None).await?.success);
    Ok(())
}

/// Test: bulk delete spans several calls, each bounded by the page budget
///
/// 23 devices at 5 per page and 2 pages per call take three calls. Each call
/// resumes from the cursor the previous one handed back.
#[tokio::test]
async fn test_delete_by_entity_type_resumes_across_calls() -> Result<()> {
    init_test_logging();

    let ctx = seeded(23, 5, 2).await?;
    let repo = ctx.repository();
    let cancel = CancellationToken::new();

    let unbounded = PageLimits {
        page_size: 5,
        page_count: 10,
    };
    let dry = repo
        .delete_by_entity_type("Device", &[], true, unbounded, None, &cancel)
        .await?;
    assert_eq!(dry.count, 23);
    assert!(dry.cursor.is_none());
    assert_eq!(ctx.document_count("Device").await?, 23);

    let mut cursor: Option<Cursor> = None;
    let mut calls = 0;
    let mut deleted = 0;
    loop {
        let outcome = repo
            .delete_by_entity_type("Device", &[], false, ctx.page_limits(), cursor, &cancel)
            .await?;
        calls += 1;
        deleted += outcome.count;
        // The cursor line is what an external checkpoint sink would persist.
        cursor = match outcome.cursor {
            Some(next) => Some(Cursor::decode(&next.encode())?),
            None => break,
        };
    }

    assert_eq!(calls, 3);
    assert_eq!(deleted, 23);
    assert_eq!(ctx.document_count("Device").await?, 0);
    assert_eq!(ctx.document_count("Site").await?, 3);
    assert_eq!(ctx.metrics.documents_deleted(), 23);
    Ok(())
}

/// Test: field filters narrow a bulk delete
#[tokio::test]
async fn test_delete_by_entity_type_with_filter() -> Result<()> {
    init_test_logging();

    let ctx = seeded(9, 100, 10).await?;
    let filter = [FieldFilter::new("partitionKey", "region-0")];
    let outcome = ctx
        .repository()
        .delete_by_entity_type(
            "Device",
            &filter,
            false,
            ctx.page_limits(),
            None,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(outcome.count, 3);
    assert_eq!(ctx.document_count("Device").await?, 6);
    Ok(())
}

/// Test: the node locator scan writes one entry per document and resumes
#[tokio::test]
async fn test_node_locator_rebuild() -> Result<()> {
    init_test_logging();

    let ctx = seeded(12, 4, 2).await?;
    let repo = ctx.repository();
    let cancel = CancellationToken::new();

    let first = repo.add_node_locators(ctx.page_limits(), None, &cancel).await?;
    assert_eq!((first.count, first.pages), (8, 2));
    let cursor = first.cursor.clone();
    assert!(cursor.is_some());

    let second = repo.add_node_locators(ctx.page_limits(), cursor, &cancel).await?;
    assert_eq!(second.count, 7);
    assert!(second.cursor.is_none());

    let locators = ctx.locators();
    let device = locators.try_get("device-0004").await?.expect("device indexed");
    assert_eq!(device.location, "region-1");
    let site = locators.try_get("site-2").await?.expect("site indexed");
    assert_eq!(site.location, "Site");
    assert!(locators.try_get("device-9999").await?.is_none());
    Ok(())
}

/// Test: plan and apply a copy between two environments
///
/// A second plan finds nothing left to copy.
#[tokio::test]
async fn test_environment_sync_round() -> Result<()> {
    init_test_logging();

    let source = seeded(6, 10, 10).await?;
    let config = TestConfigBuilder::new().with_environment("staging").build();
    let target = MaintenanceTestContext::from_config(config)?;
    let existing = generators::devices(2);
    generators::seed_documents(target.documents().as_ref(), &existing).await?;

    let sync = EnvironmentSync::new(source.repository(), target.repository());
    let cancel = CancellationToken::new();

    let plan = sync.plan("Device", None).await?;
    assert_eq!(plan.count(SyncAction::Create), 4);
    assert_eq!(plan.count(SyncAction::Skip), 2);

    let dry = sync.apply(&plan, true, &cancel).await?;
    assert_eq!(dry.created, 4);
    assert_eq!(target.document_count("Device").await?, 2);

    let report = sync.apply(&plan, false, &cancel).await?;
    assert_eq!(report.created, 4);
    assert!(report.conflicts.is_empty());
    assert_eq!(target.document_count("Device").await?, 6);

    let replan = sync.plan("Device", None).await?;
    assert_eq!(replan.count(SyncAction::Skip), 6);
    Ok(())
}
