//! Table storage pruning.
//!
//! Pruning is two-phase. [`TableStoragePruner::run`] samples every table and
//! decides which ones are deletion candidates; it never deletes.
//! [`TableStoragePruner::apply`] then deletes candidates one by one, each
//! only after the [`ConfirmationProvider`] approved it and only outside dry
//! run. Row-range deletion ([`TableStoragePruner::delete_where`]) pages
//! through matching rows and is resumable.
//!
//! ```text
//! Unvisited -> Sampled -> CandidateForDeletion | Keep
//! CandidateForDeletion -> Deleted   (confirmed, dry_run = false)
//! ```

use chrono::{DateTime, Utc};
use common::config::{IndexConfig, PrunerConfig, RetryConfig};
use common::table::{RowFilter, TableStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{MaintenanceError, PageFailure, ResumableError};
use crate::index::BatchedIndexWriter;
use crate::metrics::MaintenanceMetrics;
use crate::pager::{Cursor, PageRun, TableRowPager, drive_pages};
use crate::retry::with_retry;
use crate::sizer::{TableSampleStats, TableSizer};

pub mod confirm;

pub use confirm::{AutoApprove, AutoDeny, ConfirmationProvider};

/// Pruning policy for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneOptions {
    pub prune_empty_tables: bool,
    /// Perform every read and decision but skip the delete calls.
    pub dry_run: bool,
}

impl From<&PrunerConfig> for PruneOptions {
    fn from(config: &PrunerConfig) -> Self {
        Self {
            prune_empty_tables: config.prune_empty_tables,
            dry_run: config.dry_run,
        }
    }
}

/// Why a table is a deletion candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteReason {
    EmptyTable,
}

impl fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteReason::EmptyTable => f.write_str("table has no rows"),
        }
    }
}

/// Why a table is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeepReason {
    NotEmpty,
    Protected,
    /// The policy that would make it a candidate is off.
    PolicyDisabled,
}

impl fmt::Display for KeepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepReason::NotEmpty => f.write_str("table has rows"),
            KeepReason::Protected => f.write_str("table is protected"),
            KeepReason::PolicyDisabled => f.write_str("pruning empty tables is disabled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableState {
    Unvisited,
    Sampled,
    CandidateForDeletion(DeleteReason),
    Keep(KeepReason),
    Deleted,
}

/// Decision for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneDecision {
    pub table_name: String,
    pub stats: TableSampleStats,
    pub state: TableState,
}

impl PruneDecision {
    pub fn is_candidate(&self) -> bool {
        matches!(self.state, TableState::CandidateForDeletion(_))
    }
}

/// What happened to one candidate table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    Deleted,
    /// Dry run: confirmed, but the delete call was skipped.
    WouldDelete,
    Declined,
    Skipped(KeepReason),
    Failed(String),
    /// Not attempted because the run was cancelled first.
    Cancelled,
}

/// Record of one whole-table pruning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePruningOperation {
    pub table_name: String,
    pub reason: DeleteReason,
    pub dry_run: bool,
    pub outcome: PruneOutcome,
}

/// Result of a row-range deletion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDeletion {
    pub table_name: String,
    /// Rows deleted, or matched in dry run.
    pub deleted: usize,
    pub pages: usize,
    /// Resume point; `None` once every matching row was handled.
    pub cursor: Option<Cursor>,
    pub dry_run: bool,
    pub cancelled: bool,
}

/// Decides on and deletes unused tables and row ranges.
#[derive(Clone)]
pub struct TableStoragePruner {
    store: Arc<dyn TableStore>,
    sizer: TableSizer,
    writer: BatchedIndexWriter,
    config: PrunerConfig,
    retry: RetryConfig,
    metrics: MaintenanceMetrics,
}

impl fmt::Debug for TableStoragePruner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableStoragePruner")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}

impl TableStoragePruner {
    pub fn new(store: Arc<dyn TableStore>, config: PrunerConfig, retry: RetryConfig) -> Self {
        let metrics = MaintenanceMetrics::new();
        Self {
            sizer: TableSizer::new(store.clone(), retry.clone()).with_metrics(metrics.clone()),
            writer: BatchedIndexWriter::new(store.clone(), IndexConfig::default(), retry.clone())
                .with_metrics(metrics.clone()),
            store,
            config,
            retry,
            metrics,
        }
    }

    pub fn with_metrics(mut self, metrics: MaintenanceMetrics) -> Self {
        self.sizer = self.sizer.with_metrics(metrics.clone());
        self.writer = self.writer.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &MaintenanceMetrics {
        &self.metrics
    }

    fn is_protected(&self, table: &str) -> bool {
        self.config.protected_tables.iter().any(|t| t == table)
    }

    /// Classify one sampled table.
    pub fn decide(&self, stats: TableSampleStats, options: &PruneOptions) -> PruneDecision {
        let state = if self.is_protected(&stats.table_name) {
            TableState::Keep(KeepReason::Protected)
        } else if !stats.is_empty() {
            TableState::Keep(KeepReason::NotEmpty)
        } else if !options.prune_empty_tables {
            TableState::Keep(KeepReason::PolicyDisabled)
        } else {
            TableState::CandidateForDeletion(DeleteReason::EmptyTable)
        };

        PruneDecision {
            table_name: stats.table_name.clone(),
            stats,
            state,
        }
    }

    /// Sample every table and decide. Nothing is deleted.
    pub async fn run(
        &self,
        options: &PruneOptions,
        sample_size_per_table: usize,
        max_concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<PruneDecision>, MaintenanceError> {
        let stats = self
            .sizer
            .run(sample_size_per_table, max_concurrency, cancel)
            .await?;

        let decisions: Vec<PruneDecision> = stats
            .into_iter()
            .map(|stats| self.decide(stats, options))
            .collect();

        for decision in &decisions {
            if let TableState::CandidateForDeletion(reason) = &decision.state {
                if options.dry_run {
                    tracing::info!(
                        table = %decision.table_name,
                        reason = %reason,
                        "[DRY-RUN] Table is a deletion candidate"
                    );
                } else {
                    tracing::info!(
                        table = %decision.table_name,
                        reason = %reason,
                        "Table is a deletion candidate"
                    );
                }
            }
        }

        let candidates = decisions.iter().filter(|d| d.is_candidate()).count();
        tracing::info!(
            tables = decisions.len(),
            candidates,
            prune_empty_tables = options.prune_empty_tables,
            dry_run = options.dry_run,
            "Pruning decisions ready"
        );

        Ok(decisions)
    }

    /// Delete the candidate tables among `decisions` that `confirmer`
    /// approves. In dry run approved tables are only reported.
    pub async fn apply(
        &self,
        decisions: &[PruneDecision],
        confirmer: &dyn ConfirmationProvider,
        options: &PruneOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<TablePruningOperation>, MaintenanceError> {
        let mut operations = Vec::new();

        for decision in decisions {
            let TableState::CandidateForDeletion(reason) = &decision.state else {
                continue;
            };

            let outcome = if cancel.is_cancelled() {
                PruneOutcome::Cancelled
            } else {
                self.execute(&decision.table_name, reason, confirmer, options)
                    .await
            };

            operations.push(TablePruningOperation {
                table_name: decision.table_name.clone(),
                reason: reason.clone(),
                dry_run: options.dry_run,
                outcome,
            });
        }

        let count = |outcome: PruneOutcome| {
            operations
                .iter()
                .filter(|op| op.outcome == outcome)
                .count()
        };
        tracing::info!(
            candidates = operations.len(),
            deleted = count(PruneOutcome::Deleted),
            would_delete = count(PruneOutcome::WouldDelete),
            declined = count(PruneOutcome::Declined),
            cancelled = count(PruneOutcome::Cancelled),
            dry_run = options.dry_run,
            "Pruning applied"
        );

        Ok(operations)
    }

    /// Re-sample one table and prune it if it is (still) a candidate.
    pub async fn prune_table(
        &self,
        table: &str,
        confirmer: &dyn ConfirmationProvider,
        options: &PruneOptions,
    ) -> Result<TablePruningOperation, MaintenanceError> {
        // One row is enough to tell empty from non-empty.
        let stats = self.sizer.sample_table(table, 1).await?;
        let decision = self.decide(stats, options);

        let (reason, outcome) = match decision.state {
            TableState::CandidateForDeletion(reason) => {
                let outcome = self.execute(table, &reason, confirmer, options).await;
                (reason, outcome)
            }
            TableState::Keep(keep) => (DeleteReason::EmptyTable, PruneOutcome::Skipped(keep)),
            other => {
                return Err(MaintenanceError::InvalidArgument(format!(
                    "unexpected state {other:?} for table {table}"
                )));
            }
        };

        Ok(TablePruningOperation {
            table_name: table.to_string(),
            reason,
            dry_run: options.dry_run,
            outcome,
        })
    }

    async fn execute(
        &self,
        table: &str,
        reason: &DeleteReason,
        confirmer: &dyn ConfirmationProvider,
        options: &PruneOptions,
    ) -> PruneOutcome {
        if self.is_protected(table) {
            return PruneOutcome::Skipped(KeepReason::Protected);
        }
        if !options.prune_empty_tables {
            return PruneOutcome::Skipped(KeepReason::PolicyDisabled);
        }
        if !confirmer.confirm(table, reason) {
            tracing::info!(table, reason = %reason, "Table deletion declined");
            return PruneOutcome::Declined;
        }
        if options.dry_run {
            tracing::info!(table, reason = %reason, "[DRY-RUN] Would delete table");
            return PruneOutcome::WouldDelete;
        }

        match self.delete_table(table).await {
            Ok(()) => PruneOutcome::Deleted,
            Err(e) => {
                tracing::error!(table, error = %e, "Failed to delete table");
                PruneOutcome::Failed(e.to_string())
            }
        }
    }

    /// Delete a whole table. This is the destructive call; nothing in this
    /// module invokes it without a confirmation first.
    pub async fn delete_table(&self, table: &str) -> Result<(), MaintenanceError> {
        if self.is_protected(table) {
            return Err(MaintenanceError::InvalidArgument(format!(
                "table {table} is protected"
            )));
        }

        with_retry(&self.retry, &self.metrics, "delete_table", || {
            self.store.delete_table(table)
        })
        .await?;

        self.metrics.record_table_deleted();
        tracing::info!(table, "Deleted table");
        Ok(())
    }

    /// Delete rows matching `filter`, page by page, resuming from `start`.
    /// A dry run enumerates and counts the same rows without deleting.
    pub async fn delete_where(
        &self,
        table: &str,
        filter: &RowFilter,
        dry_run: bool,
        page_size: usize,
        start: Option<Cursor>,
        cancel: &CancellationToken,
    ) -> Result<RowDeletion, ResumableError> {
        tracing::info!(
            table,
            filter = %filter,
            dry_run,
            page_size,
            resume_from = ?start.as_ref().map(Cursor::encode),
            "Starting row deletion"
        );

        let pager = TableRowPager::new(self.store.clone(), table, filter.clone());
        let run = PageRun {
            operation: "delete_where",
            page_size,
            max_pages: None,
            retry: &self.retry,
            metrics: &self.metrics,
            cancel,
        };

        let outcome = drive_pages(&pager, start, run, |rows| async move {
            if dry_run {
                tracing::info!(table, rows = rows.len(), "[DRY-RUN] Would delete rows");
                return Ok(rows.len());
            }

            // The page is finished as a unit; cancellation applies between pages.
            match self
                .writer
                .delete_rows(table, &rows, &CancellationToken::new())
                .await
            {
                Ok(_) => {
                    self.metrics.record_rows_deleted(rows.len());
                    Ok(rows.len())
                }
                Err(failure) => {
                    let deleted = failure.committed.len();
                    self.metrics.record_rows_deleted(deleted);
                    Err(PageFailure::new(deleted, failure.source))
                }
            }
        })
        .await?;

        let deletion = RowDeletion {
            table_name: table.to_string(),
            deleted: outcome.processed,
            pages: outcome.pages,
            cursor: outcome.cursor,
            dry_run,
            cancelled: outcome.cancelled,
        };

        tracing::info!(
            table,
            deleted = deletion.deleted,
            pages = deletion.pages,
            dry_run,
            cancelled = deletion.cancelled,
            continuation = ?deletion.cursor.as_ref().map(Cursor::encode),
            "Row deletion finished"
        );
        Ok(deletion)
    }

    /// Delete rows older than `cutoff`. Row keys sort newest first, so the
    /// age cutoff is a row key range.
    pub async fn delete_older_than(
        &self,
        table: &str,
        cutoff: DateTime<Utc>,
        dry_run: bool,
        page_size: usize,
        start: Option<Cursor>,
        cancel: &CancellationToken,
    ) -> Result<RowDeletion, ResumableError> {
        self.delete_where(
            table,
            &RowFilter::older_than(cutoff),
            dry_run,
            page_size,
            start,
            cancel,
        )
        .await
    }
}
