use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::keys::validate_table_name;
use crate::table::MAX_BATCH_OPERATIONS;

/// Configuration errors. These are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid storage DSN '{dsn}': {reason}")]
    InvalidDsn { dsn: String, reason: String },

    #[error("Unsupported storage scheme: {0}. Supported: file, memory, s3")]
    UnsupportedScheme(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("failed to build object store: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Location of one store: an object store DSN plus a key prefix inside it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Object store DSN (`memory://`, `file:///path`, `s3://host/bucket`)
    pub dsn: String,
    /// Prefix under which all objects of this store live
    pub prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("memory://"),
            prefix: String::from("rowkeeper"),
        }
    }
}

/// A named deployment (e.g. `dev`, `prod`) used as a sync source or target.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub documents: StoreConfig,
    pub tables: StoreConfig,
}

/// Upper bound accepted for `retry.max_retries`.
pub const MAX_RETRIES: u32 = 10;

/// Bounded retry policy for transient store errors.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt. Never unbounded.
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), never above `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        // Overflow to infinity or NaN saturates at the cap.
        Duration::try_from_secs_f64(delay)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexConfig {
    /// Table holding foreign-key edges
    pub edge_table: String,
    /// Table holding references whose target could not be resolved
    pub orphan_table: String,
    /// Table holding node-location lookup rows
    pub node_locator_table: String,
    /// Operations per batch, at most the store limit of 100
    pub max_batch_size: usize,
    /// Partitions written concurrently
    pub write_concurrency: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            edge_table: "ForeignKeyEdges".to_string(),
            orphan_table: "OrphanedReferences".to_string(),
            node_locator_table: "NodeLocators".to_string(),
            max_batch_size: MAX_BATCH_OPERATIONS,
            write_concurrency: 4,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound for summary listings
    pub summary_take: usize,
    /// Items per page for bulk scans
    pub page_size: usize,
    /// Pages processed per invocation of a bulk scan
    pub page_count: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            summary_take: 200,
            page_size: 100,
            page_count: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SizerConfig {
    pub sample_size_per_table: usize,
    pub max_concurrency: usize,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            sample_size_per_table: 500,
            max_concurrency: 8,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrunerConfig {
    /// Flag empty tables as deletion candidates.
    ///
    /// Env: ROWKEEPER__PRUNER__PRUNE_EMPTY_TABLES
    pub prune_empty_tables: bool,

    /// Decide without deleting.
    ///
    /// Default: true (safe default)
    ///
    /// Env: ROWKEEPER__PRUNER__DRY_RUN
    pub dry_run: bool,

    /// Tables that are never deletion candidates.
    #[serde(default)]
    pub protected_tables: Vec<String>,

    /// Rows per page for filtered row deletes
    pub page_size: usize,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        let index = IndexConfig::default();
        Self {
            prune_empty_tables: false,
            dry_run: true,
            protected_tables: vec![
                index.edge_table,
                index.orphan_table,
                index.node_locator_table,
            ],
            page_size: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Configuration {
    /// Primary document store
    pub documents: StoreConfig,
    /// Table store holding the derived indexes
    pub tables: StoreConfig,
    /// Retry policy for transient store errors
    pub retry: RetryConfig,
    pub index: IndexConfig,
    pub sync: SyncConfig,
    pub sizer: SizerConfig,
    pub pruner: PrunerConfig,
    /// Named environments for cross-environment sync
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentConfig>,
}

impl Configuration {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file("rowkeeper.toml"))
            .merge(Env::prefixed("ROWKEEPER__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ROWKEEPER__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// The local stores as an environment.
    pub fn local_environment(&self) -> EnvironmentConfig {
        EnvironmentConfig {
            documents: self.documents.clone(),
            tables: self.tables.clone(),
        }
    }

    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig, ConfigError> {
        self.environments
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be positive".to_string(),
                });
            }
            Ok(())
        }

        crate::storage::validate_dsn(&self.documents.dsn)?;
        crate::storage::validate_dsn(&self.tables.dsn)?;
        for environment in self.environments.values() {
            crate::storage::validate_dsn(&environment.documents.dsn)?;
            crate::storage::validate_dsn(&environment.tables.dsn)?;
        }

        for (field, table) in [
            ("index.edge_table", &self.index.edge_table),
            ("index.orphan_table", &self.index.orphan_table),
            ("index.node_locator_table", &self.index.node_locator_table),
        ] {
            validate_table_name(table).map_err(|e| ConfigError::InvalidValue {
                field,
                reason: e.to_string(),
            })?;
        }

        positive("index.max_batch_size", self.index.max_batch_size)?;
        if self.index.max_batch_size > MAX_BATCH_OPERATIONS {
            return Err(ConfigError::InvalidValue {
                field: "index.max_batch_size",
                reason: format!(
                    "{} exceeds the store limit of {MAX_BATCH_OPERATIONS}",
                    self.index.max_batch_size
                ),
            });
        }
        positive("index.write_concurrency", self.index.write_concurrency)?;
        positive("sync.summary_take", self.sync.summary_take)?;
        positive("sync.page_size", self.sync.page_size)?;
        positive("sync.page_count", self.sync.page_count)?;
        positive("sizer.sample_size_per_table", self.sizer.sample_size_per_table)?;
        positive("sizer.max_concurrency", self.sizer.max_concurrency)?;
        positive("pruner.page_size", self.pruner.page_size)?;

        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.backoff_multiplier",
                reason: format!("must be a finite number of at least 1.0, got {multiplier}"),
            });
        }
        if self.retry.max_retries > MAX_RETRIES {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_retries",
                reason: format!(
                    "{} exceeds the limit of {MAX_RETRIES}",
                    self.retry.max_retries
                ),
            });
        }

        Ok(())
    }
}
