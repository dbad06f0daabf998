pub mod config;
pub mod document;
pub mod error;
pub mod keys;
pub mod storage;
pub mod table;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ConfigError, Configuration};
pub use document::{DocumentStore, StoredDocument};
pub use error::{StoreError, StoreResult};
pub use storage::Stores;
pub use table::{RowFilter, TableOperation, TableRow, TableStore};
