//! Wide-column table store boundary.
//!
//! A table holds rows addressed by `(partition_key, row_key)`. Writes are
//! grouped into batches scoped to a single partition; reads are range queries
//! that hand back a continuation token when more rows remain.

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Bound;

use crate::error::StoreResult;
use crate::keys::reverse_chronological_row_key;

pub mod object;

pub use object::ObjectTableStore;

/// Largest number of operations a single batch may carry.
pub const MAX_BATCH_OPERATIONS: usize = 100;

/// A full row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub partition_key: String,
    pub row_key: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl TableRow {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }
}

/// Row metadata returned by range queries.
///
/// Queries do not fetch row bodies; `size_bytes` is the serialized size of the
/// stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSummary {
    pub partition_key: String,
    pub row_key: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// One write in a partition batch.
#[derive(Debug, Clone, PartialEq)]
pub enum TableOperation {
    /// Insert or replace the row.
    Upsert(TableRow),
    /// Remove the row; deleting a missing row succeeds.
    Delete { row_key: String },
}

impl TableOperation {
    pub fn row_key(&self) -> &str {
        match self {
            TableOperation::Upsert(row) => &row.row_key,
            TableOperation::Delete { row_key } => row_key,
        }
    }
}

/// Row predicate for range queries: an optional partition plus a row-key range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub partition_key: Option<String>,
    pub row_key_start: Bound<String>,
    pub row_key_end: Bound<String>,
}

impl Default for RowFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl RowFilter {
    /// Matches every row.
    pub fn all() -> Self {
        Self {
            partition_key: None,
            row_key_start: Bound::Unbounded,
            row_key_end: Bound::Unbounded,
        }
    }

    /// Matches every row of one partition.
    pub fn partition(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: Some(partition_key.into()),
            ..Self::all()
        }
    }

    /// Matches rows whose reverse-chronological row key encodes a timestamp
    /// strictly older than `cutoff`.
    pub fn older_than(cutoff: DateTime<Utc>) -> Self {
        // Suffixed keys of the cutoff millisecond sort after the bare key.
        let cutoff_key = format!("{}{}", reverse_chronological_row_key(cutoff), char::MAX);
        Self {
            row_key_start: Bound::Excluded(cutoff_key),
            ..Self::all()
        }
    }

    /// Rows older than `months` calendar months before `now`.
    pub fn older_than_months(months: u32, now: DateTime<Utc>) -> Self {
        let cutoff = now
            .checked_sub_months(Months::new(months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::older_than(cutoff)
    }

    pub fn with_partition(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    pub fn matches(&self, partition_key: &str, row_key: &str) -> bool {
        if let Some(pk) = &self.partition_key {
            if pk != partition_key {
                return false;
            }
        }

        let after_start = match &self.row_key_start {
            Bound::Included(start) => row_key >= start.as_str(),
            Bound::Excluded(start) => row_key > start.as_str(),
            Bound::Unbounded => true,
        };
        let before_end = match &self.row_key_end {
            Bound::Included(end) => row_key <= end.as_str(),
            Bound::Excluded(end) => row_key < end.as_str(),
            Bound::Unbounded => true,
        };

        after_start && before_end
    }

    /// Whether `row_key` is past the end of the range.
    ///
    /// Within one partition rows are listed in row-key order, so a scan pinned
    /// to a partition may stop at the first row past the end bound.
    pub fn is_past_end(&self, row_key: &str) -> bool {
        match &self.row_key_end {
            Bound::Included(end) => row_key > end.as_str(),
            Bound::Excluded(end) => row_key >= end.as_str(),
            Bound::Unbounded => false,
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pk = self.partition_key.as_deref().unwrap_or("*");
        let start = match &self.row_key_start {
            Bound::Included(s) => format!("[{s}"),
            Bound::Excluded(s) => format!("({s}"),
            Bound::Unbounded => "(-inf".to_string(),
        };
        let end = match &self.row_key_end {
            Bound::Included(e) => format!("{e}]"),
            Bound::Excluded(e) => format!("{e})"),
            Bound::Unbounded => "+inf)".to_string(),
        };
        write!(f, "pk={pk} rk={start}, {end}")
    }
}

/// One page of a range query.
#[derive(Debug, Clone, Default)]
pub struct RowPage {
    pub rows: Vec<RowSummary>,
    /// Store-native token to fetch the next page; `None` once exhausted.
    pub continuation: Option<String>,
}

/// Wide-column table store.
///
/// Implementations must be safe to share across tasks; no operation takes an
/// exclusive lock on the store.
#[async_trait]
pub trait TableStore: Send + Sync + fmt::Debug {
    /// Enumerate every table, sorted by name.
    async fn list_tables(&self) -> StoreResult<Vec<String>>;

    /// Create a table. Creating an existing table succeeds.
    async fn create_table(&self, table: &str) -> StoreResult<()>;

    /// Delete a table and all of its rows.
    async fn delete_table(&self, table: &str) -> StoreResult<()>;

    /// Point lookup.
    async fn get_row(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> StoreResult<Option<TableRow>>;

    /// Apply up to [`MAX_BATCH_OPERATIONS`] operations against one partition,
    /// in order. A failure after some operations were applied is reported as
    /// [`StoreError::PartialBatch`](crate::error::StoreError::PartialBatch).
    async fn execute_batch(
        &self,
        table: &str,
        partition_key: &str,
        operations: &[TableOperation],
    ) -> StoreResult<()>;

    /// Return up to `max_rows` rows matching `filter`, resuming after
    /// `continuation` when given.
    async fn query(
        &self,
        table: &str,
        filter: &RowFilter,
        continuation: Option<&str>,
        max_rows: usize,
    ) -> StoreResult<RowPage>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_row_filter_bounds() {
        let filter = RowFilter {
            partition_key: Some("p1".to_string()),
            row_key_start: Bound::Included("b".to_string()),
            row_key_end: Bound::Excluded("d".to_string()),
        };

        assert!(filter.matches("p1", "b"));
        assert!(filter.matches("p1", "c"));
        assert!(!filter.matches("p1", "d"));
        assert!(!filter.matches("p1", "a"));
        assert!(!filter.matches("p2", "c"));
        assert!(filter.is_past_end("d"));
        assert!(!filter.is_past_end("c"));
    }

    #[test]
    fn test_older_than_months_selects_old_rows() {
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();
        let filter = RowFilter::older_than_months(2, now);

        let old = reverse_chronological_row_key(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        let recent =
            reverse_chronological_row_key(Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap());
        let boundary =
            reverse_chronological_row_key(Utc.with_ymd_and_hms(2026, 4, 15, 12, 0, 0).unwrap());

        assert!(filter.matches("any", &old));
        assert!(!filter.matches("any", &recent));
        assert!(!filter.matches("any", &boundary), "cutoff itself is not older");
    }

    #[test]
    fn test_older_than_excludes_suffixed_keys_at_cutoff() {
        let cutoff = Utc.with_ymd_and_hms(2026, 4, 15, 12, 0, 0).unwrap();
        let filter = RowFilter::older_than(cutoff);
        let at_cutoff = reverse_chronological_row_key(cutoff);
        let older = reverse_chronological_row_key(cutoff - chrono::Duration::milliseconds(1));

        assert!(!filter.matches("any", &at_cutoff));
        assert!(!filter.matches("any", &format!("{at_cutoff}-event-7")));
        assert!(!filter.matches("any", &format!("{at_cutoff}_zzz")));
        assert!(filter.matches("any", &older));
        assert!(filter.matches("any", &format!("{older}-event-1")));
    }

    #[test]
    fn test_row_filter_display() {
        let filter = RowFilter::partition("device-1");
        assert_eq!(filter.to_string(), "pk=device-1 rk=(-inf, +inf)");
    }
}
