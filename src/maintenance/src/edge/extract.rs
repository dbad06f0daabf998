//! Pull foreign-key references out of a document body.
//!
//! Any nested object carrying a string `id` is an entity header, i.e. a
//! reference to another entity. The root object's own `id` and `entityType`
//! identify the source. References are keyed by their dotted field path;
//! elements of an array share the array's path.

use common::document::{ENTITY_TYPE_FIELD, ETAG_FIELD, ID_FIELD};
use serde_json::{Map, Value};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use super::{EntityHeader, ForeignKeyEdge};
use crate::error::MaintenanceError;

/// A reference without a resolvable target type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub field_path: String,
    pub target: EntityHeader,
}

/// Edges found in one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeExtraction {
    pub source: EntityHeader,
    /// Every reference, unresolved ones included, sorted.
    pub edges: Vec<ForeignKeyEdge>,
    pub unresolved: Vec<UnresolvedReference>,
}

/// Extract the source header and its outgoing edges from a document.
pub fn collect_edges(document: &Value) -> Result<EdgeExtraction, MaintenanceError> {
    let Value::Object(root) = document else {
        return Err(MaintenanceError::InvalidArgument(
            "document must be a JSON object".to_string(),
        ));
    };

    let source_id = root
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            MaintenanceError::InvalidArgument(format!("document has no string '{ID_FIELD}'"))
        })?;
    let source_type = root
        .get(ENTITY_TYPE_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            MaintenanceError::InvalidArgument(format!(
                "document {source_id} has no string '{ENTITY_TYPE_FIELD}'"
            ))
        })?;

    let mut found = BTreeSet::new();
    walk_object(root, "", &mut found);

    // One edge per field path and target id, which is what the row key holds.
    // A typed header wins over an untyped one for the same target.
    let mut references: BTreeMap<(String, String), EntityHeader> = BTreeMap::new();
    for (field_path, target) in found {
        match references.entry((field_path, target.id.clone())) {
            Entry::Vacant(slot) => {
                slot.insert(target);
            }
            Entry::Occupied(mut slot) => {
                if slot.get().entity_type.is_none() {
                    slot.insert(target);
                }
            }
        }
    }

    let mut edges = Vec::with_capacity(references.len());
    let mut unresolved = Vec::new();
    for ((field_path, _), target) in references {
        if target.entity_type.is_none() {
            unresolved.push(UnresolvedReference {
                field_path: field_path.clone(),
                target: target.clone(),
            });
        }
        edges.push(ForeignKeyEdge {
            source_entity_id: source_id.to_string(),
            source_entity_type: source_type.to_string(),
            field_path,
            target_entity_id: target.id,
            target_entity_type: target.entity_type,
        });
    }

    Ok(EdgeExtraction {
        source: EntityHeader::new(source_id, source_type),
        edges,
        unresolved,
    })
}

type Reference = (String, EntityHeader);

fn walk_object(object: &Map<String, Value>, path: &str, found: &mut BTreeSet<Reference>) {
    let is_root = path.is_empty();
    for (field, value) in object {
        if is_root && (field == ID_FIELD || field == ENTITY_TYPE_FIELD || field == ETAG_FIELD) {
            continue;
        }
        let child_path = if is_root {
            field.clone()
        } else {
            format!("{path}.{field}")
        };
        walk_value(value, &child_path, found);
    }
}

fn walk_value(value: &Value, path: &str, found: &mut BTreeSet<Reference>) {
    match value {
        Value::Object(object) => match header(object) {
            Some(target) => {
                found.insert((path.to_string(), target));
            }
            None => walk_object(object, path, found),
        },
        Value::Array(items) => {
            for item in items {
                walk_value(item, path, found);
            }
        }
        _ => {}
    }
}

fn header(object: &Map<String, Value>) -> Option<EntityHeader> {
    let id = object.get(ID_FIELD)?.as_str()?;
    if id.is_empty() {
        return None;
    }
    let entity_type = object
        .get(ENTITY_TYPE_FIELD)
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    Some(EntityHeader {
        id: id.to_string(),
        entity_type,
    })
}
