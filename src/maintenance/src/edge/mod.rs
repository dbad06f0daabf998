//! Foreign-key edges between entities.
//!
//! An edge `(source, field path, target)` is stored in the edge table under
//! partition key = source entity id and row key = `{field_path}|{target_id}`.

use chrono::{DateTime, Utc};
use common::TableRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod diff;
pub mod extract;

pub use diff::compute_diff;
pub use extract::{EdgeExtraction, UnresolvedReference, collect_edges};

const KEY_SEPARATOR: char = '|';

const SOURCE_TYPE_PROPERTY: &str = "sourceEntityType";
const FIELD_PATH_PROPERTY: &str = "fieldPath";
const TARGET_ID_PROPERTY: &str = "targetEntityId";
const TARGET_TYPE_PROPERTY: &str = "targetEntityType";
const RECORDED_AT_PROPERTY: &str = "recordedAt";
const REASON_PROPERTY: &str = "reason";

/// Row key for a reference held at `field_path` pointing at `target_id`.
pub fn encode_edge_key(field_path: &str, target_id: &str) -> String {
    format!("{field_path}{KEY_SEPARATOR}{target_id}")
}

/// Split a row key produced by [`encode_edge_key`].
pub fn decode_edge_key(row_key: &str) -> Option<(&str, &str)> {
    row_key.split_once(KEY_SEPARATOR)
}

/// Identity and type of an entity, as embedded in referencing documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHeader {
    pub id: String,
    pub entity_type: Option<String>,
}

impl EntityHeader {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: Some(entity_type.into()),
        }
    }

    /// A header whose type is unknown.
    pub fn untyped(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: None,
        }
    }
}

/// One foreign-key reference. Identity is the full tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKeyEdge {
    pub source_entity_id: String,
    pub source_entity_type: String,
    pub field_path: String,
    pub target_entity_id: String,
    /// `None` when the target type could not be resolved.
    pub target_entity_type: Option<String>,
}

impl ForeignKeyEdge {
    pub fn new(
        source_entity_id: impl Into<String>,
        source_entity_type: impl Into<String>,
        field_path: impl Into<String>,
        target_entity_id: impl Into<String>,
        target_entity_type: Option<String>,
    ) -> Self {
        Self {
            source_entity_id: source_entity_id.into(),
            source_entity_type: source_entity_type.into(),
            field_path: field_path.into(),
            target_entity_id: target_entity_id.into(),
            target_entity_type,
        }
    }

    pub fn partition_key(&self) -> &str {
        &self.source_entity_id
    }

    pub fn row_key(&self) -> String {
        encode_edge_key(&self.field_path, &self.target_entity_id)
    }

    pub fn to_row(&self) -> TableRow {
        TableRow::new(&self.source_entity_id, self.row_key())
            .with_property(SOURCE_TYPE_PROPERTY, self.source_entity_type.as_str())
            .with_property(FIELD_PATH_PROPERTY, self.field_path.as_str())
            .with_property(TARGET_ID_PROPERTY, self.target_entity_id.as_str())
            .with_property(TARGET_TYPE_PROPERTY, optional_string(&self.target_entity_type))
    }

    /// Rebuild an edge from its table row. Field path and target id come from
    /// the row key, so rows written by older layouts still decode.
    pub fn from_row(row: &TableRow) -> Option<Self> {
        let (field_path, target_id) = decode_edge_key(&row.row_key)?;
        Some(Self {
            source_entity_id: row.partition_key.clone(),
            source_entity_type: row.property_str(SOURCE_TYPE_PROPERTY)?.to_string(),
            field_path: field_path.to_string(),
            target_entity_id: target_id.to_string(),
            target_entity_type: row.property_str(TARGET_TYPE_PROPERTY).map(str::to_string),
        })
    }
}

/// A reference whose target could not be resolved when it was indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedReference {
    pub source_entity_id: String,
    pub source_entity_type: Option<String>,
    pub field_path: String,
    pub target: EntityHeader,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl OrphanedReference {
    pub fn row_key(&self) -> String {
        encode_edge_key(&self.field_path, &self.target.id)
    }

    pub fn to_row(&self) -> TableRow {
        TableRow::new(&self.source_entity_id, self.row_key())
            .with_property(SOURCE_TYPE_PROPERTY, optional_string(&self.source_entity_type))
            .with_property(FIELD_PATH_PROPERTY, self.field_path.as_str())
            .with_property(TARGET_ID_PROPERTY, self.target.id.as_str())
            .with_property(TARGET_TYPE_PROPERTY, optional_string(&self.target.entity_type))
            .with_property(REASON_PROPERTY, self.reason.as_str())
            .with_property(RECORDED_AT_PROPERTY, self.recorded_at.to_rfc3339())
    }

    pub fn from_row(row: &TableRow) -> Option<Self> {
        let (field_path, target_id) = decode_edge_key(&row.row_key)?;
        let recorded_at = row
            .property_str(RECORDED_AT_PROPERTY)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())?
            .with_timezone(&Utc);

        Some(Self {
            source_entity_id: row.partition_key.clone(),
            source_entity_type: row.property_str(SOURCE_TYPE_PROPERTY).map(str::to_string),
            field_path: field_path.to_string(),
            target: EntityHeader {
                id: target_id.to_string(),
                entity_type: row.property_str(TARGET_TYPE_PROPERTY).map(str::to_string),
            },
            reason: row.property_str(REASON_PROPERTY).unwrap_or_default().to_string(),
            recorded_at,
        })
    }
}

/// Index mutations needed to move from one edge set to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeDiffResult {
    pub additions: Vec<ForeignKeyEdge>,
    pub removals: Vec<ForeignKeyEdge>,
}

impl EdgeDiffResult {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.additions.len() + self.removals.len()
    }
}

fn optional_string(value: &Option<String>) -> Value {
    match value {
        Some(value) => Value::String(value.clone()),
        None => Value::Null,
    }
}
