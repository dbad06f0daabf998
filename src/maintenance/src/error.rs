//! Error types for maintenance jobs.

use common::{ConfigError, StoreError};
use std::fmt;
use thiserror::Error;

use crate::pager::Cursor;

/// A batched write stopped part-way.
///
/// `committed` items are durable; `remaining` items were not applied and can
/// be handed back to the writer as-is.
#[derive(Debug, Error)]
#[error(
    "batched write failed with {} committed and {} remaining: {source}",
    .committed.len(),
    .remaining.len()
)]
pub struct PartialBatchFailure<T: fmt::Debug> {
    pub committed: Vec<T>,
    pub remaining: Vec<T>,
    #[source]
    pub source: StoreError,
}

impl<T: fmt::Debug> PartialBatchFailure<T> {
    /// Whether re-submitting `remaining` is expected to succeed.
    pub fn is_retryable(&self) -> bool {
        self.source.is_transient()
    }
}

/// A page handler failed after finishing `processed` items of its page.
#[derive(Debug, Error)]
#[error("page failed after {processed} items: {source}")]
pub struct PageFailure {
    pub processed: usize,
    #[source]
    pub source: StoreError,
}

impl PageFailure {
    pub fn new(processed: usize, source: StoreError) -> Self {
        Self { processed, source }
    }
}

impl From<StoreError> for PageFailure {
    fn from(source: StoreError) -> Self {
        Self::new(0, source)
    }
}

/// A paged job failed. Re-invoking it with `resume_from` continues after the
/// last page that was fully processed.
#[derive(Debug, Error)]
#[error("{operation} failed after {processed} items: {source}")]
pub struct ResumableError {
    pub operation: &'static str,
    /// Cursor to pass back in; `None` means start over.
    pub resume_from: Option<Cursor>,
    pub processed: usize,
    #[source]
    pub source: StoreError,
}

impl ResumableError {
    pub fn is_retryable(&self) -> bool {
        self.source.is_transient()
    }
}

/// Umbrella error for maintenance job entry points.
#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("partial batch failure: {committed} committed, {remaining} remaining: {source}")]
    PartialBatch {
        committed: usize,
        remaining: usize,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Resumable(#[from] ResumableError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl<T: fmt::Debug> From<PartialBatchFailure<T>> for MaintenanceError {
    fn from(failure: PartialBatchFailure<T>) -> Self {
        MaintenanceError::PartialBatch {
            committed: failure.committed.len(),
            remaining: failure.remaining.len(),
            source: failure.source,
        }
    }
}

pub type Result<T, E = MaintenanceError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_batch_failure_display() {
        let failure = PartialBatchFailure {
            committed: vec![1, 2],
            remaining: vec![3],
            source: StoreError::Transient("503".to_string()),
        };
        assert!(failure.is_retryable());
        assert_eq!(
            failure.to_string(),
            "batched write failed with 2 committed and 1 remaining: transient store error: 503"
        );

        let err: MaintenanceError = failure.into();
        assert!(matches!(
            err,
            MaintenanceError::PartialBatch {
                committed: 2,
                remaining: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_page_failure_from_store_error() {
        let failure: PageFailure = StoreError::Backend("boom".to_string()).into();
        assert_eq!(failure.processed, 0);

        let failure = PageFailure::new(4, StoreError::Transient("503".to_string()));
        assert_eq!(
            failure.to_string(),
            "page failed after 4 items: transient store error: 503"
        );
    }

    #[test]
    fn test_resumable_error_carries_cursor() {
        let err = ResumableError {
            operation: "delete_by_entity_type",
            resume_from: Some(Cursor::new(2, "rowkeeper/documents/6431")),
            processed: 20,
            source: StoreError::Backend("boom".to_string()),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("after 20 items"));

        let err: MaintenanceError = err.into();
        match err {
            MaintenanceError::Resumable(inner) => {
                assert_eq!(inner.resume_from.map(|c| c.page), Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
