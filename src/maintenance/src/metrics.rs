//! Maintenance metrics tracking
//!
//! Provides thread-safe metrics collection for maintenance jobs using atomic counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Thread-safe metrics shared by the writer, pager and pruning jobs
#[derive(Debug, Clone)]
pub struct MaintenanceMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    batches_written: AtomicUsize,
    operations_written: AtomicUsize,
    retries_attempted: AtomicUsize,
    partial_failures: AtomicUsize,
    orphans_recorded: AtomicUsize,
    pages_processed: AtomicUsize,
    documents_deleted: AtomicUsize,
    conflicts_detected: AtomicUsize,
    tables_sampled: AtomicUsize,
    tables_deleted: AtomicUsize,
    rows_deleted: AtomicUsize,
}

impl Default for MaintenanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MaintenanceMetrics {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                batches_written: AtomicUsize::new(0),
                operations_written: AtomicUsize::new(0),
                retries_attempted: AtomicUsize::new(0),
                partial_failures: AtomicUsize::new(0),
                orphans_recorded: AtomicUsize::new(0),
                pages_processed: AtomicUsize::new(0),
                documents_deleted: AtomicUsize::new(0),
                conflicts_detected: AtomicUsize::new(0),
                tables_sampled: AtomicUsize::new(0),
                tables_deleted: AtomicUsize::new(0),
                rows_deleted: AtomicUsize::new(0),
            }),
        }
    }

    /// Record a batch committed to the table store
    pub fn record_batch(&self, operations: usize) {
        self.inner.batches_written.fetch_add(1, Ordering::Relaxed);
        self.inner
            .operations_written
            .fetch_add(operations, Ordering::Relaxed);
    }

    /// Record a retry attempt
    pub fn record_retry(&self) {
        self.inner.retries_attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a write that gave up part-way
    pub fn record_partial_failure(&self) {
        self.inner.partial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphan(&self) {
        self.inner.orphans_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page(&self) {
        self.inner.pages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_documents_deleted(&self, count: usize) {
        self.inner
            .documents_deleted
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Record a rejected conditional write
    pub fn record_conflict(&self) {
        self.inner
            .conflicts_detected
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_table_sampled(&self) {
        self.inner.tables_sampled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_table_deleted(&self) {
        self.inner.tables_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows_deleted(&self, count: usize) {
        self.inner.rows_deleted.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the number of batches written
    pub fn batches_written(&self) -> usize {
        self.inner.batches_written.load(Ordering::Relaxed)
    }

    /// Get the number of individual operations written
    pub fn operations_written(&self) -> usize {
        self.inner.operations_written.load(Ordering::Relaxed)
    }

    /// Get the number of retries attempted
    pub fn retries_attempted(&self) -> usize {
        self.inner.retries_attempted.load(Ordering::Relaxed)
    }

    pub fn partial_failures(&self) -> usize {
        self.inner.partial_failures.load(Ordering::Relaxed)
    }

    pub fn orphans_recorded(&self) -> usize {
        self.inner.orphans_recorded.load(Ordering::Relaxed)
    }

    pub fn pages_processed(&self) -> usize {
        self.inner.pages_processed.load(Ordering::Relaxed)
    }

    pub fn documents_deleted(&self) -> usize {
        self.inner.documents_deleted.load(Ordering::Relaxed)
    }

    /// Get the number of conflicts detected
    pub fn conflicts_detected(&self) -> usize {
        self.inner.conflicts_detected.load(Ordering::Relaxed)
    }

    pub fn tables_sampled(&self) -> usize {
        self.inner.tables_sampled.load(Ordering::Relaxed)
    }

    pub fn tables_deleted(&self) -> usize {
        self.inner.tables_deleted.load(Ordering::Relaxed)
    }

    pub fn rows_deleted(&self) -> usize {
        self.inner.rows_deleted.load(Ordering::Relaxed)
    }

    /// Get a summary of all metrics
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            batches_written: self.batches_written(),
            operations_written: self.operations_written(),
            retries_attempted: self.retries_attempted(),
            partial_failures: self.partial_failures(),
            orphans_recorded: self.orphans_recorded(),
            pages_processed: self.pages_processed(),
            documents_deleted: self.documents_deleted(),
            conflicts_detected: self.conflicts_detected(),
            tables_sampled: self.tables_sampled(),
            tables_deleted: self.tables_deleted(),
            rows_deleted: self.rows_deleted(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub batches_written: usize,
    pub operations_written: usize,
    pub retries_attempted: usize,
    pub partial_failures: usize,
    pub orphans_recorded: usize,
    pub pages_processed: usize,
    pub documents_deleted: usize,
    pub conflicts_detected: usize,
    pub tables_sampled: usize,
    pub tables_deleted: usize,
    pub rows_deleted: usize,
}

impl MetricsSummary {
    /// Log the metrics summary
    pub fn log(&self) {
        tracing::info!(
            batches = self.batches_written,
            operations = self.operations_written,
            retries = self.retries_attempted,
            partial_failures = self.partial_failures,
            orphans = self.orphans_recorded,
            "Index write metrics"
        );
        tracing::info!(
            pages = self.pages_processed,
            documents_deleted = self.documents_deleted,
            conflicts = self.conflicts_detected,
            "Sync metrics"
        );
        tracing::info!(
            tables_sampled = self.tables_sampled,
            tables_deleted = self.tables_deleted,
            rows_deleted = self.rows_deleted,
            "Storage pruning metrics"
        );
    }
}
