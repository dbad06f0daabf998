//! Batched writes to the index tables.
//!
//! Work is grouped by partition key and split into batches of at most
//! `max_batch_size` operations. Partitions are written concurrently (up to
//! `write_concurrency`); batches within a partition run in order. A failed
//! batch is retried once for transient errors, resuming after whatever the
//! store reported as committed.

use chrono::Utc;
use common::config::{IndexConfig, RetryConfig};
use common::table::{RowFilter, RowSummary, TableOperation, TableStore};
use common::{StoreError, StoreResult};
use futures::StreamExt;
use futures::stream;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use super::locator::NodeLocatorEntry;
use crate::edge::{EdgeDiffResult, EntityHeader, ForeignKeyEdge, OrphanedReference};
use crate::error::{MaintenanceError, PartialBatchFailure};
use crate::metrics::MaintenanceMetrics;
use crate::retry::with_retry;

/// One edge index mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeMutation {
    Add(ForeignKeyEdge),
    Remove(ForeignKeyEdge),
}

impl EdgeMutation {
    pub fn edge(&self) -> &ForeignKeyEdge {
        match self {
            EdgeMutation::Add(edge) | EdgeMutation::Remove(edge) => edge,
        }
    }

    fn to_operation(&self) -> TableOperation {
        match self {
            EdgeMutation::Add(edge) => TableOperation::Upsert(edge.to_row()),
            EdgeMutation::Remove(edge) => TableOperation::Delete {
                row_key: edge.row_key(),
            },
        }
    }
}

/// Totals for a completed write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub partitions: usize,
    pub batches: usize,
    pub operations: usize,
    /// Removals dropped because an addition rewrites the same row.
    pub coalesced: usize,
}

/// Work item bound for one partition.
struct Pending<T> {
    item: T,
    operation: TableOperation,
}

struct PartitionResult<T> {
    committed: Vec<T>,
    remaining: Vec<T>,
    batches: usize,
    error: Option<StoreError>,
}

/// Writes edges, orphans and node locators to the table store.
#[derive(Clone)]
pub struct BatchedIndexWriter {
    store: Arc<dyn TableStore>,
    config: IndexConfig,
    retry: RetryConfig,
    metrics: MaintenanceMetrics,
}

impl fmt::Debug for BatchedIndexWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchedIndexWriter")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish()
    }
}

impl BatchedIndexWriter {
    pub fn new(store: Arc<dyn TableStore>, config: IndexConfig, retry: RetryConfig) -> Self {
        Self {
            store,
            config,
            retry,
            metrics: MaintenanceMetrics::new(),
        }
    }

    /// Report into shared metrics instead of private counters.
    pub fn with_metrics(mut self, metrics: MaintenanceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &MaintenanceMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Create the edge, orphan and node locator tables if missing.
    pub async fn ensure_tables(&self) -> StoreResult<()> {
        for table in [
            &self.config.edge_table,
            &self.config.orphan_table,
            &self.config.node_locator_table,
        ] {
            self.store.create_table(table).await?;
        }
        Ok(())
    }

    /// Write every edge. Existing rows for the same reference are replaced.
    pub async fn upsert_all(
        &self,
        edges: &[ForeignKeyEdge],
        cancel: &CancellationToken,
    ) -> Result<WriteSummary, PartialBatchFailure<EdgeMutation>> {
        let pending = edges
            .iter()
            .map(|edge| {
                let mutation = EdgeMutation::Add(edge.clone());
                let operation = mutation.to_operation();
                (edge.source_entity_id.clone(), Pending { item: mutation, operation })
            })
            .collect();

        self.write(&self.config.edge_table, pending, 0, cancel).await
    }

    /// Apply a diff. Within a partition removals precede additions, and a
    /// removal whose row an addition rewrites is dropped, so a reference that
    /// only changed type is never briefly missing.
    pub async fn apply_diff(
        &self,
        diff: &EdgeDiffResult,
        cancel: &CancellationToken,
    ) -> Result<WriteSummary, PartialBatchFailure<EdgeMutation>> {
        let rewritten: HashSet<(&str, String)> = diff
            .additions
            .iter()
            .map(|edge| (edge.partition_key(), edge.row_key()))
            .collect();

        let mut coalesced = 0;
        let mut pending = Vec::with_capacity(diff.len());
        for edge in &diff.removals {
            if rewritten.contains(&(edge.partition_key(), edge.row_key())) {
                coalesced += 1;
                continue;
            }
            let mutation = EdgeMutation::Remove(edge.clone());
            let operation = mutation.to_operation();
            pending.push((edge.source_entity_id.clone(), Pending { item: mutation, operation }));
        }
        for edge in &diff.additions {
            let mutation = EdgeMutation::Add(edge.clone());
            let operation = mutation.to_operation();
            pending.push((edge.source_entity_id.clone(), Pending { item: mutation, operation }));
        }

        self.write(&self.config.edge_table, pending, coalesced, cancel)
            .await
    }

    /// Durably record a reference whose target could not be resolved.
    pub async fn add_orphan(
        &self,
        source: &EntityHeader,
        field_path: &str,
        target: &EntityHeader,
        reason: &str,
        cancel: &CancellationToken,
    ) -> Result<OrphanedReference, MaintenanceError> {
        if cancel.is_cancelled() {
            return Err(MaintenanceError::Cancelled);
        }

        let orphan = OrphanedReference {
            source_entity_id: source.id.clone(),
            source_entity_type: source.entity_type.clone(),
            field_path: field_path.to_string(),
            target: target.clone(),
            reason: reason.to_string(),
            recorded_at: Utc::now(),
        };
        let operations = [TableOperation::Upsert(orphan.to_row())];

        with_retry(&self.retry, &self.metrics, "add_orphan", || {
            self.store
                .execute_batch(&self.config.orphan_table, &source.id, &operations)
        })
        .await?;

        self.metrics.record_batch(1);
        self.metrics.record_orphan();
        tracing::warn!(
            source = %source.id,
            field_path,
            target = %target.id,
            reason,
            "Recorded orphaned reference"
        );

        Ok(orphan)
    }

    /// Every orphan recorded for `source_id`, ordered by row key.
    pub async fn list_orphans(
        &self,
        source_id: &str,
    ) -> Result<Vec<OrphanedReference>, MaintenanceError> {
        let table = &self.config.orphan_table;
        let filter = RowFilter::partition(source_id);

        let mut orphans = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .store
                .query(table, &filter, continuation.as_deref(), self.config.max_batch_size)
                .await?;

            for summary in &page.rows {
                let row = self
                    .store
                    .get_row(table, &summary.partition_key, &summary.row_key)
                    .await?;
                match row.as_ref().and_then(OrphanedReference::from_row) {
                    Some(orphan) => orphans.push(orphan),
                    None => tracing::debug!(
                        source = source_id,
                        row_key = %summary.row_key,
                        "Skipping unreadable orphan row"
                    ),
                }
            }

            continuation = page.continuation;
            if continuation.is_none() {
                break;
            }
        }

        Ok(orphans)
    }

    /// Write node locator entries, one partition per node.
    pub async fn upsert_node_locators(
        &self,
        entries: &[NodeLocatorEntry],
        cancel: &CancellationToken,
    ) -> Result<WriteSummary, PartialBatchFailure<NodeLocatorEntry>> {
        let pending = entries
            .iter()
            .map(|entry| {
                let operation = TableOperation::Upsert(entry.to_row());
                (entry.node_id.clone(), Pending { item: entry.clone(), operation })
            })
            .collect();

        self.write(&self.config.node_locator_table, pending, 0, cancel)
            .await
    }

    /// Delete the given rows from `table`.
    pub async fn delete_rows(
        &self,
        table: &str,
        rows: &[RowSummary],
        cancel: &CancellationToken,
    ) -> Result<WriteSummary, PartialBatchFailure<RowSummary>> {
        let pending = rows
            .iter()
            .map(|row| {
                let operation = TableOperation::Delete {
                    row_key: row.row_key.clone(),
                };
                (row.partition_key.clone(), Pending { item: row.clone(), operation })
            })
            .collect();

        self.write(table, pending, 0, cancel).await
    }

    async fn write<T>(
        &self,
        table: &str,
        pending: Vec<(String, Pending<T>)>,
        coalesced: usize,
        cancel: &CancellationToken,
    ) -> Result<WriteSummary, PartialBatchFailure<T>>
    where
        T: fmt::Debug + Send,
    {
        let operations = pending.len();

        // BTreeMap keeps partition order stable across runs.
        let mut partitions: BTreeMap<String, Vec<Pending<T>>> = BTreeMap::new();
        for (partition_key, item) in pending {
            partitions.entry(partition_key).or_default().push(item);
        }
        let partition_count = partitions.len();

        let concurrency = self.config.write_concurrency.max(1);
        let results: Vec<PartitionResult<T>> = stream::iter(partitions)
            .map(|(partition_key, items)| self.write_partition(table, partition_key, items, cancel))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut committed = Vec::new();
        let mut remaining = Vec::new();
        let mut batches = 0;
        let mut first_error = None;
        for result in results {
            batches += result.batches;
            committed.extend(result.committed);
            remaining.extend(result.remaining);
            if first_error.is_none() {
                first_error = result.error;
            }
        }

        if !remaining.is_empty() {
            let source = first_error.unwrap_or(StoreError::Cancelled);
            self.metrics.record_partial_failure();
            tracing::error!(
                table,
                committed = committed.len(),
                remaining = remaining.len(),
                error = %source,
                "Index write stopped before completion"
            );
            return Err(PartialBatchFailure {
                committed,
                remaining,
                source,
            });
        }

        tracing::debug!(
            table,
            partitions = partition_count,
            batches,
            operations,
            coalesced,
            "Index write complete"
        );

        Ok(WriteSummary {
            partitions: partition_count,
            batches,
            operations,
            coalesced,
        })
    }

    async fn write_partition<T>(
        &self,
        table: &str,
        partition_key: String,
        items: Vec<Pending<T>>,
        cancel: &CancellationToken,
    ) -> PartitionResult<T> {
        let batch_size = self.config.max_batch_size.max(1);
        let (items, operations): (Vec<T>, Vec<TableOperation>) = items
            .into_iter()
            .map(|pending| (pending.item, pending.operation))
            .unzip();

        let mut written = 0;
        let mut batches = 0;
        let mut error = None;

        for chunk in operations.chunks(batch_size) {
            if cancel.is_cancelled() {
                tracing::info!(
                    table,
                    partition = %partition_key,
                    written,
                    "Cancelled before next batch"
                );
                error = Some(StoreError::Cancelled);
                break;
            }

            let applied = AtomicUsize::new(0);
            let result = with_retry(&self.retry, &self.metrics, "execute_batch", || {
                let start = applied.load(Ordering::SeqCst);
                let applied = &applied;
                let partition_key = partition_key.as_str();
                async move {
                    self.store
                        .execute_batch(table, partition_key, &chunk[start..])
                        .await
                        .inspect_err(|e| {
                            applied.fetch_add(e.committed(), Ordering::SeqCst);
                        })
                }
            })
            .await;

            match result {
                Ok(()) => {
                    written += chunk.len();
                    batches += 1;
                    self.metrics.record_batch(chunk.len());
                }
                Err(e) => {
                    written += applied.load(Ordering::SeqCst);
                    tracing::warn!(
                        table,
                        partition = %partition_key,
                        written,
                        error = %e,
                        "Batch failed"
                    );
                    error = Some(e);
                    break;
                }
            }
        }

        let mut committed = items;
        let remaining = committed.split_off(written.min(committed.len()));

        PartitionResult {
            committed,
            remaining,
            batches,
            error,
        }
    }
}
