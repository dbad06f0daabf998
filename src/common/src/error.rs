//! Store-level error taxonomy shared by every backend.

use thiserror::Error;

/// Errors surfaced by [`TableStore`](crate::table::TableStore) and
/// [`DocumentStore`](crate::document::DocumentStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Throttling, timeouts and other conditions worth one bounded retry.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Optimistic concurrency check failed for `key`.
    #[error("concurrency conflict on {key}")]
    Conflict { key: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// A batch failed after its first `committed` operations were applied.
    #[error("batch failed after {committed} committed operations: {source}")]
    PartialBatch {
        committed: usize,
        #[source]
        source: Box<StoreError>,
    },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether a caller may retry the failed unit of work as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transient(_) => true,
            StoreError::PartialBatch { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Number of operations applied before the failure, for batch errors.
    pub fn committed(&self) -> usize {
        match self {
            StoreError::PartialBatch { committed, .. } => *committed,
            _ => 0,
        }
    }

    /// Strip a `PartialBatch` wrapper and return the underlying cause.
    pub fn root_cause(&self) -> &StoreError {
        match self {
            StoreError::PartialBatch { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Helper to detect throttling or timeout responses from a backend message.
pub fn is_transient_message(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("429")
        || msg.contains("503")
        || msg.contains("too many requests")
        || msg.contains("slow down")
        || msg.contains("slowdown")
        || msg.contains("throttl")
        || msg.contains("timeout")
        || msg.contains("timed out")
}

impl From<object_store::Error> for StoreError {
    fn from(error: object_store::Error) -> Self {
        match error {
            object_store::Error::NotFound { path, .. } => StoreError::NotFound(path),
            object_store::Error::Precondition { path, .. }
            | object_store::Error::AlreadyExists { path, .. } => {
                StoreError::Conflict { key: path }
            }
            object_store::Error::InvalidPath { source } => {
                StoreError::InvalidKey(source.to_string())
            }
            other => {
                let message = other.to_string();
                if is_transient_message(&message) {
                    StoreError::Transient(message)
                } else {
                    StoreError::Backend(message)
                }
            }
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_message() {
        let transient = vec![
            "HTTP status client error (429 Too Many Requests)",
            "Server returned 503 Service Unavailable",
            "Please reduce your request rate: SlowDown",
            "request timed out after 30s",
            "operation throttled by server",
        ];
        for msg in transient {
            assert!(is_transient_message(msg), "Should be transient: {msg}");
        }

        let permanent = vec!["access denied", "invalid schema", "bucket does not exist"];
        for msg in permanent {
            assert!(!is_transient_message(msg), "Should not be transient: {msg}");
        }
    }

    #[test]
    fn test_partial_batch_classification() {
        let err = StoreError::PartialBatch {
            committed: 3,
            source: Box::new(StoreError::Transient("429".to_string())),
        };
        assert!(err.is_transient());
        assert_eq!(err.committed(), 3);
        assert!(matches!(err.root_cause(), StoreError::Transient(_)));

        let err = StoreError::PartialBatch {
            committed: 1,
            source: Box::new(StoreError::Backend("boom".to_string())),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_object_store_error_mapping() {
        let err: StoreError = object_store::Error::NotFound {
            path: "tables/a".to_string(),
            source: "missing".into(),
        }
        .into();
        assert!(matches!(err, StoreError::NotFound(p) if p == "tables/a"));

        let err: StoreError = object_store::Error::Precondition {
            path: "documents/x".to_string(),
            source: "etag mismatch".into(),
        }
        .into();
        assert!(matches!(err, StoreError::Conflict { key } if key == "documents/x"));

        let err: StoreError = object_store::Error::Generic {
            store: "S3",
            source: "HTTP status client error (429 Too Many Requests)".into(),
        }
        .into();
        assert!(err.is_transient());
    }
}
