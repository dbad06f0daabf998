//! Maintenance and sync jobs over the rowkeeper document and table stores.
//!
//! - [`edge`]: foreign-key edge model, extraction and diffing
//! - [`index`]: batched writes of edges, orphans and node locators
//! - [`pager`]: resumable cursors over store continuation tokens
//! - [`sync`]: raw document access and cross-environment copy
//! - [`sizer`] and [`pruner`]: sampling-based table statistics and pruning

pub mod edge;
pub mod error;
pub mod index;
pub mod metrics;
pub mod pager;
pub mod pruner;
mod retry;
pub mod sizer;
pub mod sync;

pub use edge::{EdgeDiffResult, ForeignKeyEdge, OrphanedReference, compute_diff};
pub use error::{MaintenanceError, PageFailure, PartialBatchFailure, ResumableError};
pub use index::{BatchedIndexWriter, EdgeIndexer, NodeLocatorEntry, NodeLocatorIndex};
pub use metrics::MaintenanceMetrics;
pub use pager::{Cursor, PageOutcome, ResumablePager};
pub use pruner::{PruneDecision, PruneOptions, TableStoragePruner};
pub use sizer::{TableSampleStats, TableSizer};
pub use sync::{EnvironmentSync, SyncRepository};
