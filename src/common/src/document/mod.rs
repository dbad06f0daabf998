//! Document store boundary.
//!
//! Documents are JSON objects carrying an `id` and an `entityType`. The store
//! versions every document with an opaque concurrency token (etag) which is
//! embedded in the body under [`ETAG_FIELD`] when a document is handed out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

use crate::error::StoreResult;

pub mod object;

pub use object::ObjectDocumentStore;

pub const ID_FIELD: &str = "id";
pub const ENTITY_TYPE_FIELD: &str = "entityType";
pub const ETAG_FIELD: &str = "_etag";
pub const LAST_UPDATED_FIELD: &str = "lastUpdatedDate";

/// Fields consulted by free-text search.
const SEARCH_FIELDS: [&str; 3] = [ID_FIELD, "name", "key"];

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    /// Body as stored, without the concurrency token.
    pub body: Value,
    pub etag: String,
    /// Time the store last wrote the document.
    pub last_modified: DateTime<Utc>,
}

impl StoredDocument {
    pub fn entity_type(&self) -> Option<&str> {
        self.body.get(ENTITY_TYPE_FIELD).and_then(Value::as_str)
    }

    /// The document's own last-updated timestamp, falling back to the store's.
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.body
            .get(LAST_UPDATED_FIELD)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or(self.last_modified)
    }

    /// Body with the concurrency token embedded.
    pub fn into_json(self) -> Value {
        let mut body = self.body;
        if let Value::Object(map) = &mut body {
            map.insert(ETAG_FIELD.to_string(), Value::String(self.etag));
        }
        body
    }
}

/// Equality predicate on a dotted field path, e.g. `owner.id == "org-1"`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub path: String,
    pub equals: Value,
}

impl FieldFilter {
    pub fn new(path: impl Into<String>, equals: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            equals: equals.into(),
        }
    }

    pub fn matches(&self, body: &Value) -> bool {
        let mut current = body;
        for segment in self.path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => return false,
            }
        }
        *current == self.equals
    }
}

/// Query over documents: optional entity type, free-text search and field
/// predicates, all of which must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentQuery {
    pub entity_type: Option<String>,
    pub search: Option<String>,
    pub fields: Vec<FieldFilter>,
}

impl DocumentQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_field(mut self, filter: FieldFilter) -> Self {
        self.fields.push(filter);
        self
    }

    pub fn matches(&self, body: &Value) -> bool {
        if let Some(entity_type) = &self.entity_type {
            if body.get(ENTITY_TYPE_FIELD).and_then(Value::as_str) != Some(entity_type.as_str()) {
                return false;
            }
        }

        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let found = SEARCH_FIELDS.iter().any(|field| {
                body.get(*field)
                    .and_then(Value::as_str)
                    .is_some_and(|value| value.to_lowercase().contains(&needle))
            });
            if !found {
                return false;
            }
        }

        self.fields.iter().all(|filter| filter.matches(body))
    }
}

impl fmt::Display for DocumentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type={} search={} fields={}",
            self.entity_type.as_deref().unwrap_or("*"),
            self.search.as_deref().unwrap_or("-"),
            self.fields.len()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentPage {
    pub documents: Vec<StoredDocument>,
    pub continuation: Option<String>,
}

/// Document store with optimistic concurrency.
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Fetch a document; [`StoreError::NotFound`](crate::error::StoreError::NotFound)
    /// when absent.
    async fn get(&self, id: &str) -> StoreResult<StoredDocument>;

    /// Write `body` under `id`. With `expected_etag` the write only applies
    /// when the stored token matches, otherwise
    /// [`StoreError::Conflict`](crate::error::StoreError::Conflict). Returns
    /// the new token when the backend reports one.
    async fn upsert(
        &self,
        id: &str,
        body: &Value,
        expected_etag: Option<&str>,
    ) -> StoreResult<Option<String>>;

    /// Write `body` under `id` only when no document exists there yet,
    /// otherwise [`StoreError::Conflict`](crate::error::StoreError::Conflict).
    async fn create(&self, id: &str, body: &Value) -> StoreResult<Option<String>>;

    /// Remove a document. Removing a missing document succeeds.
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Return up to `max_items` matching documents, resuming after
    /// `continuation` when given.
    async fn query(
        &self,
        query: &DocumentQuery,
        continuation: Option<&str>,
        max_items: usize,
    ) -> StoreResult<DocumentPage>;
}
