//! Keeps the edge index in step with entity writes.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::writer::{BatchedIndexWriter, WriteSummary};
use crate::edge::{EdgeExtraction, OrphanedReference, collect_edges, compute_diff};
use crate::error::MaintenanceError;

const UNRESOLVED_TARGET_TYPE: &str = "target entity type could not be resolved";

/// What a reconcile changed.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub additions: usize,
    pub removals: usize,
    pub write: WriteSummary,
    pub orphans: Vec<OrphanedReference>,
}

/// Extracts, diffs and writes the edges of one entity.
#[derive(Debug, Clone)]
pub struct EdgeIndexer {
    writer: BatchedIndexWriter,
}

impl EdgeIndexer {
    pub fn new(writer: BatchedIndexWriter) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &BatchedIndexWriter {
        &self.writer
    }

    /// Bring the index from `old` to `new` for one entity.
    ///
    /// `old = None` indexes a newly created entity, `new = None` removes every
    /// edge of a deleted one. References without a resolvable target type are
    /// indexed and additionally recorded as orphans.
    pub async fn reconcile(
        &self,
        old: Option<&Value>,
        new: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, MaintenanceError> {
        let old = old.map(collect_edges).transpose()?;
        let new = new.map(collect_edges).transpose()?;

        let source = match (&old, &new) {
            (None, None) => {
                return Err(MaintenanceError::InvalidArgument(
                    "reconcile needs an old or a new document".to_string(),
                ));
            }
            (Some(old), Some(new)) if old.source.id != new.source.id => {
                return Err(MaintenanceError::InvalidArgument(format!(
                    "document id changed from {} to {}",
                    old.source.id, new.source.id
                )));
            }
            (_, Some(extraction)) | (Some(extraction), None) => extraction.source.clone(),
        };

        let edges_of = |extraction: &Option<EdgeExtraction>| {
            extraction
                .as_ref()
                .map(|e| e.edges.clone())
                .unwrap_or_default()
        };
        let diff = compute_diff(&edges_of(&old), &edges_of(&new));

        let write = self.writer.apply_diff(&diff, cancel).await?;

        let mut orphans = Vec::new();
        if let Some(new) = &new {
            for reference in &new.unresolved {
                let orphan = self
                    .writer
                    .add_orphan(
                        &source,
                        &reference.field_path,
                        &reference.target,
                        UNRESOLVED_TARGET_TYPE,
                        cancel,
                    )
                    .await?;
                orphans.push(orphan);
            }
        }

        tracing::info!(
            entity = %source.id,
            entity_type = source.entity_type.as_deref().unwrap_or_default(),
            additions = diff.additions.len(),
            removals = diff.removals.len(),
            orphans = orphans.len(),
            "Reconciled edge index"
        );

        Ok(ReconcileOutcome {
            additions: diff.additions.len(),
            removals: diff.removals.len(),
            write,
            orphans,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::{IndexConfig, RetryConfig};
    use common::table::{RowFilter, TableStore};
    use common::testing::memory_table_store;
    use serde_json::json;
    use std::sync::Arc;

    fn indexer(store: Arc<dyn TableStore>) -> EdgeIndexer {
        EdgeIndexer::new(BatchedIndexWriter::new(
            store,
            IndexConfig::default(),
            RetryConfig::disabled(),
        ))
    }

    async fn row_keys(store: &Arc<dyn TableStore>) -> Vec<String> {
        store
            .query("ForeignKeyEdges", &RowFilter::partition("dev-1"), None, 1000)
            .await
            .unwrap()
            .rows
            .into_iter()
            .map(|r| r.row_key)
            .collect()
    }

    #[tokio::test]
    async fn test_reconcile_lifecycle() {
        let store = memory_table_store();
        let indexer = indexer(store.clone());
        let cancel = CancellationToken::new();

        let v1 = json!({
            "id": "dev-1",
            "entityType": "Device",
            "owner": { "id": "org-1", "entityType": "Organization" },
            "site": { "id": "site-1", "entityType": "Site" },
        });
        let v2 = json!({
            "id": "dev-1",
            "entityType": "Device",
            "owner": { "id": "org-1", "entityType": "Organization" },
            "site": { "id": "site-2", "entityType": "Site" },
        });

        let created = indexer.reconcile(None, Some(&v1), &cancel).await.unwrap();
        assert_eq!((created.additions, created.removals), (2, 0));

        let moved = indexer.reconcile(Some(&v1), Some(&v2), &cancel).await.unwrap();
        assert_eq!((moved.additions, moved.removals), (1, 1));
        assert_eq!(row_keys(&store).await, vec!["owner|org-1", "site|site-2"]);

        let unchanged = indexer.reconcile(Some(&v2), Some(&v2), &cancel).await.unwrap();
        assert_eq!(unchanged.write.operations, 0);

        let deleted = indexer.reconcile(Some(&v2), None, &cancel).await.unwrap();
        assert_eq!(deleted.removals, 2);
        assert!(row_keys(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_reference_is_indexed_and_recorded() {
        let store = memory_table_store();
        let indexer = indexer(store.clone());
        let cancel = CancellationToken::new();

        let doc = json!({ "id": "dev-1", "entityType": "Device", "site": { "id": "site-9" } });
        let outcome = indexer.reconcile(None, Some(&doc), &cancel).await.unwrap();

        assert_eq!(outcome.additions, 1);
        assert_eq!(outcome.orphans.len(), 1);
        assert_eq!(row_keys(&store).await, vec!["site|site-9"]);

        let recorded = indexer.writer().list_orphans("dev-1").await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].target.id, "site-9");
        assert_eq!(recorded[0].source_entity_type.as_deref(), Some("Device"));
    }

    #[tokio::test]
    async fn test_rejects_id_change_and_empty_input() {
        let indexer = indexer(memory_table_store());
        let cancel = CancellationToken::new();
        let a = json!({ "id": "a1", "entityType": "Device" });
        let b = json!({ "id": "b1", "entityType": "Device" });

        assert!(indexer.reconcile(Some(&a), Some(&b), &cancel).await.is_err());
        assert!(indexer.reconcile(None, None, &cancel).await.is_err());
    }
}
