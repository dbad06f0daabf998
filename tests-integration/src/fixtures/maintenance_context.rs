//! Maintenance test context for integration testing
//!
//! Builds every maintenance job against one set of stores with shared metrics,
//! and snapshots table state so tests can assert that a run changed nothing.

use anyhow::Result;
use common::config::Configuration;
use common::document::{DocumentQuery, DocumentStore};
use common::storage::Stores;
use common::table::{RowFilter, TableStore};
use maintenance::index::{BatchedIndexWriter, EdgeIndexer, NodeLocatorIndex};
use maintenance::pruner::{PruneOptions, TableStoragePruner};
use maintenance::sizer::TableSizer;
use maintenance::sync::{PageLimits, SyncRepository};
use maintenance::MaintenanceMetrics;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Row count per table, empty tables included.
pub type TableSnapshot = BTreeMap<String, usize>;

const SNAPSHOT_PAGE_SIZE: usize = 500;

/// Test context for maintenance jobs
pub struct MaintenanceTestContext {
    pub config: Configuration,
    pub stores: Stores,
    pub metrics: MaintenanceMetrics,
}

impl MaintenanceTestContext {
    /// Fresh in-memory stores with the given configuration
    pub fn new_in_memory(config: Configuration) -> Self {
        Self::with_stores(config, Stores::in_memory())
    }

    /// Stores opened from the configuration's local DSNs
    pub fn from_config(config: Configuration) -> Result<Self> {
        config.validate()?;
        let stores = Stores::open(&config.local_environment())?;
        Ok(Self::with_stores(config, stores))
    }

    pub fn with_stores(config: Configuration, stores: Stores) -> Self {
        Self {
            config,
            stores,
            metrics: MaintenanceMetrics::new(),
        }
    }

    pub fn tables(&self) -> &Arc<dyn TableStore> {
        &self.stores.tables
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.stores.documents
    }

    pub fn writer(&self) -> BatchedIndexWriter {
        BatchedIndexWriter::new(
            self.stores.tables.clone(),
            self.config.index.clone(),
            self.config.retry.clone(),
        )
        .with_metrics(self.metrics.clone())
    }

    pub fn indexer(&self) -> EdgeIndexer {
        EdgeIndexer::new(self.writer())
    }

    pub fn locators(&self) -> NodeLocatorIndex {
        NodeLocatorIndex::new(
            self.stores.tables.clone(),
            self.config.index.node_locator_table.clone(),
        )
    }

    pub fn repository(&self) -> SyncRepository {
        SyncRepository::new(
            self.stores.documents.clone(),
            self.writer(),
            self.config.sync.clone(),
            self.config.retry.clone(),
        )
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits::from(&self.config.sync)
    }

    pub fn sizer(&self) -> TableSizer {
        TableSizer::new(self.stores.tables.clone(), self.config.retry.clone())
            .with_metrics(self.metrics.clone())
    }

    pub fn pruner(&self) -> TableStoragePruner {
        TableStoragePruner::new(
            self.stores.tables.clone(),
            self.config.pruner.clone(),
            self.config.retry.clone(),
        )
        .with_metrics(self.metrics.clone())
    }

    pub fn prune_options(&self) -> PruneOptions {
        PruneOptions::from(&self.config.pruner)
    }

    /// Count the rows of one table
    pub async fn row_count(&self, table: &str) -> Result<usize> {
        count_rows(self.stores.tables.as_ref(), table, &RowFilter::all()).await
    }

    /// Row counts of every table
    pub async fn snapshot_tables(&self) -> Result<TableSnapshot> {
        let mut snapshot = TableSnapshot::new();
        for table in self.stores.tables.list_tables().await? {
            let rows = self.row_count(&table).await?;
            snapshot.insert(table, rows);
        }
        Ok(snapshot)
    }

    /// Count the documents of one entity type
    pub async fn document_count(&self, entity_type: &str) -> Result<usize> {
        let query = DocumentQuery::of_type(entity_type);
        let mut count = 0;
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .stores
                .documents
                .query(&query, continuation.as_deref(), SNAPSHOT_PAGE_SIZE)
                .await?;
            count += page.documents.len();
            continuation = page.continuation;
            if continuation.is_none() {
                return Ok(count);
            }
        }
    }
}

async fn count_rows(store: &dyn TableStore, table: &str, filter: &RowFilter) -> Result<usize> {
    let mut count = 0;
    let mut continuation: Option<String> = None;
    loop {
        let page = store
            .query(table, filter, continuation.as_deref(), SNAPSHOT_PAGE_SIZE)
            .await?;
        count += page.rows.len();
        continuation = page.continuation;
        if continuation.is_none() {
            return Ok(count);
        }
    }
}
