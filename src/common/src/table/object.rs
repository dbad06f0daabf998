//! Table store backed by an [`ObjectStore`].
//!
//! Layout under the configured prefix:
//!
//! ```text
//! {prefix}/tables/{table}/__table__             marker, makes empty tables visible
//! {prefix}/tables/{table}/{hex(pk)}/{hex(rk)}   one JSON object per row
//! ```
//!
//! Continuation tokens are the path of the last row handed out and are resumed
//! with `list_with_offset`, which relies on the backend listing keys in lexical
//! order (memory, S3, GCS and Azure do; the local filesystem does not).

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use std::sync::Arc;

use super::{
    MAX_BATCH_OPERATIONS, RowFilter, RowPage, RowSummary, TableOperation, TableRow, TableStore,
};
use crate::error::{StoreError, StoreResult};
use crate::keys::{decode_key, encode_key, validate_table_name};

const TABLES_DIR: &str = "tables";
const TABLE_MARKER: &str = "__table__";

#[derive(Debug, Clone)]
pub struct ObjectTableStore {
    object_store: Arc<dyn ObjectStore>,
    root: ObjectPath,
}

impl ObjectTableStore {
    /// Create a table store rooted at `{prefix}/tables`.
    pub fn new(object_store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        let root = ObjectPath::from(prefix).child(TABLES_DIR);
        Self { object_store, root }
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.object_store
    }

    fn table_path(&self, table: &str) -> StoreResult<ObjectPath> {
        validate_table_name(table)?;
        Ok(self.root.child(table))
    }

    fn row_path(
        &self,
        table_path: &ObjectPath,
        partition_key: &str,
        row_key: &str,
    ) -> StoreResult<ObjectPath> {
        Ok(table_path
            .child(encode_key(partition_key)?)
            .child(encode_key(row_key)?))
    }

    /// Decode `(partition_key, row_key)` from a row path; `None` for the marker.
    fn decode_row_path(
        table_path: &ObjectPath,
        location: &ObjectPath,
    ) -> StoreResult<Option<(String, String)>> {
        let parts: Vec<String> = match location.prefix_match(table_path) {
            Some(parts) => parts.map(|part| part.as_ref().to_string()).collect(),
            None => return Ok(None),
        };

        match parts.as_slice() {
            [marker] if marker == TABLE_MARKER => Ok(None),
            [pk, rk] => Ok(Some((decode_key(pk)?, decode_key(rk)?))),
            _ => Err(StoreError::InvalidKey(format!(
                "unexpected object in table layout: {location}"
            ))),
        }
    }

    fn parse_continuation(table_path: &ObjectPath, token: &str) -> StoreResult<ObjectPath> {
        let offset = ObjectPath::parse(token)
            .map_err(|e| StoreError::InvalidKey(format!("malformed continuation token: {e}")))?;
        if offset.prefix_match(table_path).is_none() {
            return Err(StoreError::InvalidKey(format!(
                "continuation token '{token}' does not belong to {table_path}"
            )));
        }
        Ok(offset)
    }

    async fn apply_operation(
        &self,
        table_path: &ObjectPath,
        partition_key: &str,
        operation: &TableOperation,
    ) -> StoreResult<()> {
        let location = self.row_path(table_path, partition_key, operation.row_key())?;
        match operation {
            TableOperation::Upsert(row) => {
                let body = serde_json::to_vec(row)?;
                self.object_store
                    .put(&location, Bytes::from(body).into())
                    .await?;
            }
            TableOperation::Delete { .. } => match self.object_store.delete(&location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for ObjectTableStore {
    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        let listing = self.object_store.list_with_delimiter(Some(&self.root)).await?;

        let mut tables: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|prefix| prefix.filename().map(str::to_string))
            .collect();
        tables.sort();

        Ok(tables)
    }

    async fn create_table(&self, table: &str) -> StoreResult<()> {
        let marker = self.table_path(table)?.child(TABLE_MARKER);
        self.object_store.put(&marker, Bytes::new().into()).await?;

        tracing::debug!(table = %table, "Created table");
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> StoreResult<()> {
        let table_path = self.table_path(table)?;

        let mut locations = Vec::new();
        let mut stream = self.object_store.list(Some(&table_path));
        while let Some(meta) = stream.next().await {
            locations.push(meta?.location);
        }

        if locations.is_empty() {
            return Err(StoreError::NotFound(format!("table {table}")));
        }

        // Rows first, marker last, so an interrupted delete leaves the table visible.
        locations.sort_by_key(|location| location.filename() == Some(TABLE_MARKER));
        for location in &locations {
            match self.object_store.delete(location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(table = %table, objects = locations.len(), "Deleted table");
        Ok(())
    }

    async fn get_row(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> StoreResult<Option<TableRow>> {
        let table_path = self.table_path(table)?;
        let location = self.row_path(&table_path, partition_key, row_key)?;

        match self.object_store.get(&location).await {
            Ok(result) => {
                let body = result.bytes().await?;
                Ok(Some(serde_json::from_slice(&body)?))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn execute_batch(
        &self,
        table: &str,
        partition_key: &str,
        operations: &[TableOperation],
    ) -> StoreResult<()> {
        let table_path = self.table_path(table)?;

        if operations.len() > MAX_BATCH_OPERATIONS {
            return Err(StoreError::InvalidRequest(format!(
                "batch of {} operations exceeds the limit of {MAX_BATCH_OPERATIONS}",
                operations.len()
            )));
        }

        // Validate the whole batch before applying anything.
        for operation in operations {
            if let TableOperation::Upsert(row) = operation {
                if row.partition_key != partition_key {
                    return Err(StoreError::InvalidRequest(format!(
                        "row partition '{}' does not match batch partition '{partition_key}'",
                        row.partition_key
                    )));
                }
            }
            self.row_path(&table_path, partition_key, operation.row_key())?;
        }

        for (applied, operation) in operations.iter().enumerate() {
            if let Err(e) = self.apply_operation(&table_path, partition_key, operation).await {
                if applied == 0 {
                    return Err(e);
                }
                return Err(StoreError::PartialBatch {
                    committed: applied,
                    source: Box::new(e),
                });
            }
        }

        Ok(())
    }

    async fn query(
        &self,
        table: &str,
        filter: &RowFilter,
        continuation: Option<&str>,
        max_rows: usize,
    ) -> StoreResult<RowPage> {
        if max_rows == 0 {
            return Err(StoreError::InvalidRequest(
                "max_rows must be positive".to_string(),
            ));
        }

        let table_path = self.table_path(table)?;
        let prefix = match &filter.partition_key {
            Some(pk) => table_path.child(encode_key(pk)?),
            None => table_path.clone(),
        };

        let mut stream = match continuation {
            Some(token) => {
                let offset = Self::parse_continuation(&table_path, token)?;
                self.object_store.list_with_offset(Some(&prefix), &offset)
            }
            None => self.object_store.list(Some(&prefix)),
        };

        let mut page = RowPage::default();
        let mut last_location: Option<ObjectPath> = None;

        while let Some(meta) = stream.next().await {
            let meta = meta?;
            let Some((partition_key, row_key)) =
                Self::decode_row_path(&table_path, &meta.location)?
            else {
                continue;
            };

            if filter.partition_key.is_some() && filter.is_past_end(&row_key) {
                break;
            }
            if !filter.matches(&partition_key, &row_key) {
                continue;
            }

            if page.rows.len() == max_rows {
                // A further match exists: resume after the last row handed out.
                page.continuation = last_location.map(|location| location.to_string());
                break;
            }

            page.rows.push(RowSummary {
                partition_key,
                row_key,
                size_bytes: meta.size as u64,
                last_modified: meta.last_modified,
            });
            last_location = Some(meta.location);
        }

        Ok(page)
    }
}
