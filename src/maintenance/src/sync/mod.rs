//! Document sync: raw repository access and cross-environment copy.

pub mod environment;
pub mod repository;

pub use environment::{EnvironmentSync, SyncAction, SyncPlan, SyncPlanItem, SyncReport};
pub use repository::{
    BulkOutcome, PageLimits, SyncEntitySummary, SyncRepository, SyncUpsertResult,
};
