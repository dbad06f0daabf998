//! Node locator index: logical node id to physical location.
//!
//! Each node has its own partition holding a single row, so a lookup is one
//! point read.

use common::document::StoredDocument;
use common::table::{TableRow, TableStore};
use common::StoreResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Row key of the single row in a node's partition.
pub const LOCATOR_ROW_KEY: &str = "location";

const LOCATION_PROPERTY: &str = "location";

/// Document field that names a node's partition explicitly.
pub const PARTITION_KEY_FIELD: &str = "partitionKey";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLocatorEntry {
    pub node_id: String,
    pub location: String,
}

impl NodeLocatorEntry {
    pub fn new(node_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            location: location.into(),
        }
    }

    /// Locator for a stored document: its explicit `partitionKey` when set,
    /// otherwise its entity type. Documents with neither are not locatable.
    pub fn for_document(document: &StoredDocument) -> Option<Self> {
        let location = document
            .body
            .get(PARTITION_KEY_FIELD)
            .and_then(|value| value.as_str())
            .filter(|value| !value.is_empty())
            .or_else(|| document.entity_type())?;

        Some(Self::new(&document.id, location))
    }

    pub fn to_row(&self) -> TableRow {
        TableRow::new(&self.node_id, LOCATOR_ROW_KEY)
            .with_property(LOCATION_PROPERTY, self.location.as_str())
    }

    pub fn from_row(row: &TableRow) -> Option<Self> {
        Some(Self::new(
            &row.partition_key,
            row.property_str(LOCATION_PROPERTY)?,
        ))
    }
}

/// Read side of the node locator table.
#[derive(Debug, Clone)]
pub struct NodeLocatorIndex {
    store: Arc<dyn TableStore>,
    table: String,
}

impl NodeLocatorIndex {
    pub fn new(store: Arc<dyn TableStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Point lookup; `None` when the node has not been indexed.
    pub async fn try_get(&self, node_id: &str) -> StoreResult<Option<NodeLocatorEntry>> {
        let row = self
            .store
            .get_row(&self.table, node_id, LOCATOR_ROW_KEY)
            .await?;
        Ok(row.as_ref().and_then(NodeLocatorEntry::from_row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::table::TableOperation;
    use common::testing::memory_table_store;
    use serde_json::json;

    fn document(body: serde_json::Value) -> StoredDocument {
        StoredDocument {
            id: body["id"].as_str().unwrap().to_string(),
            body,
            etag: "1".to_string(),
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn test_location_prefers_partition_key() {
        let explicit =
            document(json!({ "id": "n1", "entityType": "Device", "partitionKey": "eu-1" }));
        assert_eq!(
            NodeLocatorEntry::for_document(&explicit),
            Some(NodeLocatorEntry::new("n1", "eu-1"))
        );

        let typed = document(json!({ "id": "n2", "entityType": "Device" }));
        assert_eq!(
            NodeLocatorEntry::for_document(&typed).map(|e| e.location),
            Some("Device".to_string())
        );

        assert_eq!(NodeLocatorEntry::for_document(&document(json!({ "id": "n3" }))), None);
    }

    #[tokio::test]
    async fn test_try_get() {
        let store = memory_table_store();
        let entry = NodeLocatorEntry::new("n1", "eu-1");
        store
            .execute_batch("NodeLocators", "n1", &[TableOperation::Upsert(entry.to_row())])
            .await
            .unwrap();

        let index = NodeLocatorIndex::new(store, "NodeLocators");
        assert_eq!(index.try_get("n1").await.unwrap(), Some(entry));
        assert_eq!(index.try_get("n2").await.unwrap(), None);
    }
}
