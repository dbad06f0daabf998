//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::{Configuration, EnvironmentConfig, RetryConfig, StoreConfig};

/// Builder for creating test configurations.
///
/// Defaults differ from production in two places: retries back off for a few
/// milliseconds instead of hundreds, and every store is `memory://`.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .with_batch_size(10)
///     .with_environment("staging")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.documents = StoreConfig::default();
        config.tables = StoreConfig::default();
        config.retry = RetryConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            ..RetryConfig::default()
        };
        Self { config }
    }

    /// Turn off retries entirely.
    pub fn without_retries(mut self) -> Self {
        self.config.retry = RetryConfig::disabled();
        self
    }

    /// Maximum number of operations per index batch.
    pub fn with_batch_size(mut self, max_batch_size: usize) -> Self {
        self.config.index.max_batch_size = max_batch_size;
        self
    }

    /// Page size and page budget for paged sync jobs.
    pub fn with_sync_paging(mut self, page_size: usize, page_count: usize) -> Self {
        self.config.sync.page_size = page_size;
        self.config.sync.page_count = page_count;
        self
    }

    /// Pruning policy.
    pub fn with_pruning(mut self, prune_empty_tables: bool, dry_run: bool) -> Self {
        self.config.pruner.prune_empty_tables = prune_empty_tables;
        self.config.pruner.dry_run = dry_run;
        self
    }

    /// Sampling limits for the sizer and pruner.
    pub fn with_sampling(mut self, sample_size_per_table: usize, max_concurrency: usize) -> Self {
        self.config.sizer.sample_size_per_table = sample_size_per_table;
        self.config.sizer.max_concurrency = max_concurrency;
        self
    }

    /// Register an in-memory named environment.
    pub fn with_environment(mut self, name: &str) -> Self {
        self.config
            .environments
            .insert(name.to_string(), EnvironmentConfig::default());
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}
