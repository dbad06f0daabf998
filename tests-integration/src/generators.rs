//! Test data generators
//!
//! Seeds tables and documents with deterministic content.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use common::document::DocumentStore;
use common::keys::reverse_chronological_row_key;
use common::table::{MAX_BATCH_OPERATIONS, TableOperation, TableRow, TableStore};
use serde_json::{Value, json};

/// Create `table` holding `rows` rows in a single partition
pub async fn seed_table(store: &dyn TableStore, table: &str, rows: usize) -> Result<()> {
    store
        .create_table(table)
        .await
        .with_context(|| format!("Failed to create table {table}"))?;

    let operations: Vec<TableOperation> = (0..rows)
        .map(|i| {
            TableOperation::Upsert(
                TableRow::new("p0", format!("row-{i:05}")).with_property("value", i as u64),
            )
        })
        .collect();
    for chunk in operations.chunks(MAX_BATCH_OPERATIONS) {
        store.execute_batch(table, "p0", chunk).await?;
    }
    Ok(())
}

/// Write one reading per age into `partition` of `table`, keyed newest first
pub async fn seed_readings(
    store: &dyn TableStore,
    table: &str,
    partition: &str,
    now: DateTime<Utc>,
    ages: impl IntoIterator<Item = Duration>,
) -> Result<usize> {
    store.create_table(table).await?;

    let operations: Vec<TableOperation> = ages
        .into_iter()
        .map(|age| {
            let recorded = now - age;
            TableOperation::Upsert(
                TableRow::new(partition, reverse_chronological_row_key(recorded))
                    .with_property("recordedAt", recorded.to_rfc3339()),
            )
        })
        .collect();
    for chunk in operations.chunks(MAX_BATCH_OPERATIONS) {
        store.execute_batch(table, partition, chunk).await?;
    }
    Ok(operations.len())
}

/// A device referencing its site and, untyped, its owner
pub fn device(index: usize, site: &str, owner: &str) -> Value {
    json!({
        "id": format!("device-{index:04}"),
        "entityType": "Device",
        "name": format!("Device {index}"),
        "partitionKey": format!("region-{}", index % 3),
        "site": { "id": site, "entityType": "Site", "name": site },
        "owner": { "id": owner },
        "lastUpdatedDate": "2026-01-01T00:00:00Z",
    })
}

pub fn site(id: &str) -> Value {
    json!({ "id": id, "entityType": "Site", "name": id })
}

/// Store every body under its own `id`
pub async fn seed_documents(store: &dyn DocumentStore, bodies: &[Value]) -> Result<()> {
    for body in bodies {
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .context("Document without id")?;
        store.upsert(id, body, None).await?;
    }
    Ok(())
}

/// `count` devices spread over three sites
pub fn devices(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| device(i, &format!("site-{}", i % 3), &format!("user-{i}")))
        .collect()
}
