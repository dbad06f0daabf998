//! Sampling-based table statistics.
//!
//! Each table is enumerated up to a sample bound. When the whole table fits in
//! the sample the row count is exact; otherwise it is the sample size and the
//! stats are flagged as an estimate.

use common::config::{RetryConfig, SizerConfig};
use common::table::{RowFilter, TableStore};
use common::{StoreError, StoreResult};
use futures::stream;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::MaintenanceError;
use crate::metrics::MaintenanceMetrics;
use crate::retry::with_retry;

/// Largest page requested while sampling one table.
const SAMPLE_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSampleStats {
    pub table_name: String,
    /// Exact when `is_estimate` is false, a lower bound otherwise.
    pub row_count: u64,
    pub avg_entity_bytes: f64,
    pub sampled_rows: u64,
    pub is_estimate: bool,
}

impl TableSampleStats {
    pub fn is_empty(&self) -> bool {
        self.row_count == 0 && !self.is_estimate
    }
}

impl fmt::Display for TableSampleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}{} rows, {:.0} bytes avg",
            self.table_name,
            if self.is_estimate { ">=" } else { "" },
            self.row_count,
            self.avg_entity_bytes
        )
    }
}

/// Samples every table of a store under bounded concurrency.
#[derive(Clone)]
pub struct TableSizer {
    store: Arc<dyn TableStore>,
    retry: RetryConfig,
    metrics: MaintenanceMetrics,
}

impl fmt::Debug for TableSizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSizer")
            .field("store", &self.store)
            .finish()
    }
}

impl TableSizer {
    pub fn new(store: Arc<dyn TableStore>, retry: RetryConfig) -> Self {
        Self {
            store,
            retry,
            metrics: MaintenanceMetrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: MaintenanceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// [`Self::run`] with limits taken from configuration.
    pub async fn run_with_config(
        &self,
        config: &SizerConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableSampleStats>, MaintenanceError> {
        self.run(config.sample_size_per_table, config.max_concurrency, cancel)
            .await
    }

    /// Sample every table, at most `max_concurrency` at a time.
    ///
    /// Results are sorted by table name. A cancelled run returns
    /// [`MaintenanceError::Cancelled`], never partial stats.
    pub async fn run(
        &self,
        sample_size_per_table: usize,
        max_concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableSampleStats>, MaintenanceError> {
        if sample_size_per_table == 0 {
            return Err(MaintenanceError::InvalidArgument(
                "sample size per table must be positive".to_string(),
            ));
        }
        if max_concurrency == 0 {
            return Err(MaintenanceError::InvalidArgument(
                "max concurrency must be positive".to_string(),
            ));
        }

        let tables = with_retry(&self.retry, &self.metrics, "list_tables", || {
            self.store.list_tables()
        })
        .await?;

        tracing::info!(
            tables = tables.len(),
            sample_size_per_table,
            max_concurrency,
            "Sampling tables"
        );

        let sampling = stream::iter(tables)
            .map(|table| async move {
                if cancel.is_cancelled() {
                    return Err(StoreError::Cancelled);
                }
                self.sample_table(&table, sample_size_per_table).await
            })
            .buffer_unordered(max_concurrency)
            .try_collect::<Vec<_>>();

        let mut stats = tokio::select! {
            result = sampling => result.map_err(|e| match e {
                StoreError::Cancelled => MaintenanceError::Cancelled,
                other => MaintenanceError::Store(other),
            })?,
            _ = cancel.cancelled() => {
                tracing::info!("Table sampling cancelled");
                return Err(MaintenanceError::Cancelled);
            }
        };

        stats.sort_by(|a, b| a.table_name.cmp(&b.table_name));
        Ok(stats)
    }

    /// Enumerate up to `sample_size` rows of one table.
    pub async fn sample_table(
        &self,
        table: &str,
        sample_size: usize,
    ) -> StoreResult<TableSampleStats> {
        let filter = RowFilter::all();
        let mut sampled: u64 = 0;
        let mut total_bytes: u64 = 0;
        let mut continuation: Option<String> = None;
        let mut exhausted = false;

        while (sampled as usize) < sample_size {
            let page_size = (sample_size - sampled as usize).min(SAMPLE_PAGE_SIZE);
            let page = with_retry(&self.retry, &self.metrics, "sample_table", || {
                self.store
                    .query(table, &filter, continuation.as_deref(), page_size)
            })
            .await?;

            sampled += page.rows.len() as u64;
            total_bytes += page.rows.iter().map(|row| row.size_bytes).sum::<u64>();
            continuation = page.continuation;
            if continuation.is_none() {
                exhausted = true;
                break;
            }
        }

        let stats = TableSampleStats {
            table_name: table.to_string(),
            row_count: sampled,
            avg_entity_bytes: if sampled > 0 {
                total_bytes as f64 / sampled as f64
            } else {
                0.0
            },
            sampled_rows: sampled,
            is_estimate: !exhausted,
        };

        self.metrics.record_table_sampled();
        tracing::debug!(
            table,
            rows = stats.row_count,
            avg_bytes = stats.avg_entity_bytes,
            estimate = stats.is_estimate,
            "Sampled table"
        );
        Ok(stats)
    }
}
