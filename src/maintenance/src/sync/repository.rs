//! Raw document access for sync jobs.

use chrono::{DateTime, Utc};
use common::config::{RetryConfig, SyncConfig};
use common::document::{DocumentQuery, DocumentStore, FieldFilter, ID_FIELD, StoredDocument};
use common::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{MaintenanceError, PageFailure, ResumableError};
use crate::index::{BatchedIndexWriter, NodeLocatorEntry};
use crate::metrics::MaintenanceMetrics;
use crate::pager::{Cursor, DocumentPager, PageOutcome, PageRun, drive_pages};
use crate::retry::with_retry;

/// Listing entry for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntitySummary {
    pub id: String,
    pub entity_type: String,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
}

impl SyncEntitySummary {
    fn from_document(document: &StoredDocument) -> Self {
        Self {
            id: document.id.clone(),
            entity_type: document.entity_type().unwrap_or_default().to_string(),
            last_modified: document.last_updated(),
            etag: document.etag.clone(),
        }
    }
}

/// Result of a (possibly conditional) write.
///
/// `conflict` is set only when an expected token was supplied and did not
/// match; the write was not applied in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUpsertResult {
    pub success: bool,
    pub etag: Option<String>,
    pub conflict: bool,
}

/// Paging limits for one call of a bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub page_size: usize,
    pub page_count: usize,
}

impl From<&SyncConfig> for PageLimits {
    fn from(config: &SyncConfig) -> Self {
        Self {
            page_size: config.page_size,
            page_count: config.page_count,
        }
    }
}

/// Where a bulk job stopped. Pass `cursor` back in to continue; `None` means
/// the scan is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOutcome {
    pub count: usize,
    pub pages: usize,
    pub cursor: Option<Cursor>,
    pub dry_run: bool,
    pub cancelled: bool,
}

impl BulkOutcome {
    fn from_pages(outcome: PageOutcome, dry_run: bool) -> Self {
        Self {
            count: outcome.processed,
            pages: outcome.pages,
            cursor: outcome.cursor,
            dry_run,
            cancelled: outcome.cancelled,
        }
    }
}

/// Reads and writes raw documents with optimistic concurrency.
#[derive(Clone)]
pub struct SyncRepository {
    documents: Arc<dyn DocumentStore>,
    locators: BatchedIndexWriter,
    config: SyncConfig,
    retry: RetryConfig,
    metrics: MaintenanceMetrics,
}

impl fmt::Debug for SyncRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRepository")
            .field("documents", &self.documents)
            .field("config", &self.config)
            .finish()
    }
}

impl SyncRepository {
    /// `locators` receives node locator rows built by [`Self::add_node_locators`].
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        locators: BatchedIndexWriter,
        config: SyncConfig,
        retry: RetryConfig,
    ) -> Self {
        let metrics = locators.metrics().clone();
        Self {
            documents,
            locators,
            config,
            retry,
            metrics,
        }
    }

    pub fn metrics(&self) -> &MaintenanceMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Up to `take` summaries of one entity type, optionally narrowed by a
    /// free-text search. A bounded listing: no cursor is returned.
    pub async fn get_summaries(
        &self,
        entity_type: &str,
        search: Option<&str>,
        take: Option<usize>,
    ) -> Result<Vec<SyncEntitySummary>, MaintenanceError> {
        let take = take.unwrap_or(self.config.summary_take);
        let mut query = DocumentQuery::of_type(entity_type);
        if let Some(search) = search {
            query = query.with_search(search);
        }

        let mut summaries = Vec::new();
        let mut continuation: Option<String> = None;
        while summaries.len() < take {
            let page = with_retry(&self.retry, &self.metrics, "get_summaries", || {
                self.documents
                    .query(&query, continuation.as_deref(), take - summaries.len())
            })
            .await?;

            summaries.extend(page.documents.iter().map(SyncEntitySummary::from_document));
            continuation = page.continuation;
            if continuation.is_none() {
                break;
            }
        }

        tracing::debug!(entity_type, query = %query, count = summaries.len(), "Listed summaries");
        Ok(summaries)
    }

    /// Summary of one document, `None` when it does not exist.
    pub async fn get_summary(
        &self,
        id: &str,
    ) -> Result<Option<SyncEntitySummary>, MaintenanceError> {
        let result =
            with_retry(&self.retry, &self.metrics, "get_summary", || self.documents.get(id)).await;
        match result {
            Ok(document) => Ok(Some(SyncEntitySummary::from_document(&document))),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Raw document body with its concurrency token embedded.
    pub async fn get_json_by_id(&self, id: &str) -> Result<Value, MaintenanceError> {
        let document =
            with_retry(&self.retry, &self.metrics, "get_json_by_id", || self.documents.get(id))
                .await?;
        Ok(document.into_json())
    }

    /// Write a raw document. With `expected_etag` the write only applies when
    /// the stored token still matches; a mismatch is reported, never resolved.
    pub async fn upsert_json(
        &self,
        json: &Value,
        expected_etag: Option<&str>,
    ) -> Result<SyncUpsertResult, MaintenanceError> {
        let id = json.get(ID_FIELD).and_then(Value::as_str).ok_or_else(|| {
            MaintenanceError::InvalidArgument(format!("document has no string '{ID_FIELD}'"))
        })?;

        let result = with_retry(&self.retry, &self.metrics, "upsert_json", || {
            self.documents.upsert(id, json, expected_etag)
        })
        .await;

        match result {
            Ok(etag) => Ok(SyncUpsertResult {
                success: true,
                etag,
                conflict: false,
            }),
            Err(StoreError::Conflict { .. }) if expected_etag.is_some() => {
                self.metrics.record_conflict();
                tracing::warn!(
                    id,
                    expected_etag,
                    "Concurrency token mismatch, document not written"
                );
                Ok(SyncUpsertResult {
                    success: false,
                    etag: None,
                    conflict: true,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write a raw document only when its id is still free in this store. An
    /// existing document is reported as a conflict and left untouched.
    pub async fn create_json(&self, json: &Value) -> Result<SyncUpsertResult, MaintenanceError> {
        let id = json.get(ID_FIELD).and_then(Value::as_str).ok_or_else(|| {
            MaintenanceError::InvalidArgument(format!("document has no string '{ID_FIELD}'"))
        })?;

        let result = with_retry(&self.retry, &self.metrics, "create_json", || {
            self.documents.create(id, json)
        })
        .await;

        match result {
            Ok(etag) => Ok(SyncUpsertResult {
                success: true,
                etag,
                conflict: false,
            }),
            Err(StoreError::Conflict { .. }) => {
                self.metrics.record_conflict();
                tracing::warn!(id, "Document already exists, not overwritten");
                Ok(SyncUpsertResult {
                    success: false,
                    etag: None,
                    conflict: true,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete documents of one type page by page, resuming from `start`.
    ///
    /// Each call processes at most `limits.page_count` pages. A dry run pages
    /// through the same documents and counts them without deleting.
    pub async fn delete_by_entity_type(
        &self,
        entity_type: &str,
        filter: &[FieldFilter],
        dry_run: bool,
        limits: PageLimits,
        start: Option<Cursor>,
        cancel: &CancellationToken,
    ) -> Result<BulkOutcome, ResumableError> {
        let mut query = DocumentQuery::of_type(entity_type);
        for field in filter {
            query = query.with_field(field.clone());
        }

        tracing::info!(
            entity_type,
            query = %query,
            dry_run,
            page_size = limits.page_size,
            page_count = limits.page_count,
            resume_from = ?start.as_ref().map(Cursor::encode),
            "Starting delete by entity type"
        );

        let pager = DocumentPager::new(self.documents.clone(), query);
        let run = PageRun {
            operation: "delete_by_entity_type",
            page_size: limits.page_size,
            max_pages: Some(limits.page_count),
            retry: &self.retry,
            metrics: &self.metrics,
            cancel,
        };

        let outcome = drive_pages(&pager, start, run, |documents| async move {
            if dry_run {
                for document in &documents {
                    tracing::info!(
                        id = %document.id,
                        entity_type,
                        "[DRY-RUN] Would delete document"
                    );
                }
                return Ok(documents.len());
            }

            let mut deleted = 0;
            for document in &documents {
                let result = with_retry(&self.retry, &self.metrics, "delete_document", || {
                    self.documents.delete(&document.id)
                })
                .await;
                if let Err(source) = result {
                    self.metrics.record_documents_deleted(deleted);
                    return Err(PageFailure::new(deleted, source));
                }
                deleted += 1;
            }
            self.metrics.record_documents_deleted(deleted);
            Ok(deleted)
        })
        .await?;

        let outcome = BulkOutcome::from_pages(outcome, dry_run);
        tracing::info!(
            entity_type,
            deleted = outcome.count,
            pages = outcome.pages,
            dry_run,
            cancelled = outcome.cancelled,
            continuation = ?outcome.cursor.as_ref().map(Cursor::encode),
            "Delete by entity type finished"
        );
        Ok(outcome)
    }

    /// Scan every document and write a node locator row for each locatable
    /// one, resuming from `start`. `count` is the number of entries written.
    pub async fn add_node_locators(
        &self,
        limits: PageLimits,
        start: Option<Cursor>,
        cancel: &CancellationToken,
    ) -> Result<BulkOutcome, ResumableError> {
        let pager = DocumentPager::new(self.documents.clone(), DocumentQuery::all());
        let run = PageRun {
            operation: "add_node_locators",
            page_size: limits.page_size,
            max_pages: Some(limits.page_count),
            retry: &self.retry,
            metrics: &self.metrics,
            cancel,
        };

        let outcome = drive_pages(&pager, start, run, |documents| async move {
            let entries: Vec<NodeLocatorEntry> = documents
                .iter()
                .filter_map(NodeLocatorEntry::for_document)
                .collect();
            // A page is committed as a whole, so cancellation is not observed
            // inside it.
            self.locators
                .upsert_node_locators(&entries, &CancellationToken::new())
                .await
                .map_err(|failure| PageFailure::new(failure.committed.len(), failure.source))?;
            Ok(entries.len())
        })
        .await?;

        let outcome = BulkOutcome::from_pages(outcome, false);
        tracing::info!(
            entries = outcome.count,
            pages = outcome.pages,
            cancelled = outcome.cancelled,
            continuation = ?outcome.cursor.as_ref().map(Cursor::encode),
            "Node locator scan finished"
        );
        Ok(outcome)
    }
}
