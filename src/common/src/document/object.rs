//! Document store backed by an [`ObjectStore`].
//!
//! Each document is one object at `{prefix}/documents/{hex(id)}`. The object
//! e-tag is the concurrency token; conditional writes use
//! [`PutMode::Update`], so the backend must support conditional puts.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions, UpdateVersion};
use serde_json::Value;
use std::sync::Arc;

use super::{DocumentPage, DocumentQuery, DocumentStore, ETAG_FIELD, ID_FIELD, StoredDocument};
use crate::error::{StoreError, StoreResult};
use crate::keys::{decode_key, encode_key};

const DOCUMENTS_DIR: &str = "documents";

#[derive(Debug, Clone)]
pub struct ObjectDocumentStore {
    object_store: Arc<dyn ObjectStore>,
    root: ObjectPath,
}

impl ObjectDocumentStore {
    /// Create a document store rooted at `{prefix}/documents`.
    pub fn new(object_store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        let root = ObjectPath::from(prefix).child(DOCUMENTS_DIR);
        Self { object_store, root }
    }

    fn document_path(&self, id: &str) -> StoreResult<ObjectPath> {
        Ok(self.root.child(encode_key(id)?))
    }

    async fn read(&self, location: &ObjectPath, id: String) -> StoreResult<StoredDocument> {
        let result = self.object_store.get(location).await?;
        let etag = result.meta.e_tag.clone().ok_or_else(|| {
            StoreError::Backend(format!("store returned no etag for document {id}"))
        })?;
        let last_modified = result.meta.last_modified;
        let bytes = result.bytes().await?;
        let body: Value = serde_json::from_slice(&bytes)?;

        Ok(StoredDocument {
            id,
            body,
            etag,
            last_modified,
        })
    }
}

/// Validate an incoming body and strip the embedded concurrency token.
fn prepare_body(id: &str, body: &Value) -> StoreResult<Value> {
    let Value::Object(map) = body else {
        return Err(StoreError::InvalidDocument(format!(
            "document {id} must be a JSON object"
        )));
    };

    match map.get(ID_FIELD).and_then(Value::as_str) {
        Some(body_id) if body_id == id => {}
        Some(body_id) => {
            return Err(StoreError::InvalidDocument(format!(
                "document id '{body_id}' does not match key '{id}'"
            )));
        }
        None => {
            return Err(StoreError::InvalidDocument(format!(
                "document {id} has no string '{ID_FIELD}' field"
            )));
        }
    }

    let mut stored = map.clone();
    stored.remove(ETAG_FIELD);
    Ok(Value::Object(stored))
}

#[async_trait]
impl DocumentStore for ObjectDocumentStore {
    async fn get(&self, id: &str) -> StoreResult<StoredDocument> {
        let location = self.document_path(id)?;
        match self.read(&location, id.to_string()).await {
            Err(StoreError::NotFound(_)) => Err(StoreError::NotFound(format!("document {id}"))),
            other => other,
        }
    }

    async fn upsert(
        &self,
        id: &str,
        body: &Value,
        expected_etag: Option<&str>,
    ) -> StoreResult<Option<String>> {
        let location = self.document_path(id)?;
        let payload = Bytes::from(serde_json::to_vec(&prepare_body(id, body)?)?);

        let result = match expected_etag {
            Some(etag) => {
                let mode = PutMode::Update(UpdateVersion {
                    e_tag: Some(etag.to_string()),
                    version: None,
                });
                self.object_store
                    .put_opts(&location, payload.into(), PutOptions::from(mode))
                    .await
                    .map_err(|e| match e {
                        // A vanished document cannot match the expected token either.
                        object_store::Error::Precondition { .. }
                        | object_store::Error::NotFound { .. } => StoreError::Conflict {
                            key: format!("document {id}"),
                        },
                        other => other.into(),
                    })?
            }
            None => self.object_store.put(&location, payload.into()).await?,
        };

        Ok(result.e_tag)
    }

    async fn create(&self, id: &str, body: &Value) -> StoreResult<Option<String>> {
        let location = self.document_path(id)?;
        let payload = Bytes::from(serde_json::to_vec(&prepare_body(id, body)?)?);

        let result = self
            .object_store
            .put_opts(&location, payload.into(), PutOptions::from(PutMode::Create))
            .await
            .map_err(|e| match e {
                object_store::Error::AlreadyExists { .. } => StoreError::Conflict {
                    key: format!("document {id}"),
                },
                other => other.into(),
            })?;

        Ok(result.e_tag)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let location = self.document_path(id)?;
        match self.object_store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn query(
        &self,
        query: &DocumentQuery,
        continuation: Option<&str>,
        max_items: usize,
    ) -> StoreResult<DocumentPage> {
        if max_items == 0 {
            return Err(StoreError::InvalidRequest(
                "max_items must be positive".to_string(),
            ));
        }

        let mut stream = match continuation {
            Some(token) => {
                let offset = ObjectPath::parse(token).map_err(|e| {
                    StoreError::InvalidKey(format!("malformed continuation token: {e}"))
                })?;
                if offset.prefix_match(&self.root).is_none() {
                    return Err(StoreError::InvalidKey(format!(
                        "continuation token '{token}' does not belong to {}",
                        self.root
                    )));
                }
                self.object_store.list_with_offset(Some(&self.root), &offset)
            }
            None => self.object_store.list(Some(&self.root)),
        };

        let mut page = DocumentPage::default();
        let mut last_location: Option<ObjectPath> = None;

        while let Some(meta) = stream.next().await {
            let meta = meta?;
            let Some(segment) = meta.location.filename() else {
                continue;
            };
            let id = decode_key(segment)?;

            let document = match self.read(&meta.location, id).await {
                Ok(document) => document,
                // Deleted between listing and read.
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !query.matches(&document.body) {
                continue;
            }

            if page.documents.len() == max_items {
                page.continuation = last_location.map(|location| location.to_string());
                break;
            }

            page.documents.push(document);
            last_location = Some(meta.location);
        }

        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use serde_json::json;

    fn store() -> ObjectDocumentStore {
        ObjectDocumentStore::new(Arc::new(InMemory::new()), "rowkeeper")
    }

    fn doc(id: &str, entity_type: &str) -> Value {
        json!({ "id": id, "entityType": entity_type, "name": format!("{entity_type} {id}") })
    }

    #[tokio::test]
    async fn test_get_embeds_etag_and_strips_it_on_write() {
        let store = store();
        let etag = store.upsert("d1", &doc("d1", "Device"), None).await.unwrap();
        assert!(etag.is_some());

        let stored = store.get("d1").await.unwrap();
        assert_eq!(Some(stored.etag.clone()), etag);
        assert!(stored.body.get(ETAG_FIELD).is_none());

        // Writing back a body that still carries the token must not persist it.
        let json = stored.into_json();
        store.upsert("d1", &json, None).await.unwrap();
        assert!(store.get("d1").await.unwrap().body.get(ETAG_FIELD).is_none());
    }

    #[tokio::test]
    async fn test_conditional_upsert() {
        let store = store();
        let first = store.upsert("d1", &doc("d1", "Device"), None).await.unwrap().unwrap();

        let second = store
            .upsert("d1", &doc("d1", "Device"), Some(&first))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(first, second);

        let err = store
            .upsert("d1", &doc("d1", "Device"), Some(&first))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let err = store
            .upsert("missing", &doc("missing", "Device"), Some("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_create_refuses_existing_document() {
        let store = store();
        let etag = store.create("d1", &doc("d1", "Device")).await.unwrap();
        assert!(etag.is_some());

        let mut other = doc("d1", "Device");
        other["name"] = json!("second writer");
        let err = store.create("d1", &other).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let stored = store.get("d1").await.unwrap();
        assert_eq!(stored.body["name"], "Device d1");
        assert_eq!(Some(stored.etag), etag);
    }

    #[tokio::test]
    async fn test_upsert_validates_body() {
        let store = store();
        let err = store.upsert("d1", &json!([1, 2]), None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));

        let err = store.upsert("d1", &doc("d2", "Device"), None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_get_and_delete_missing() {
        let store = store();
        assert!(matches!(
            store.get("nope").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_query_filters_and_pages() {
        let store = store();
        for i in 0..7 {
            let id = format!("dev-{i}");
            store.upsert(&id, &doc(&id, "Device"), None).await.unwrap();
        }
        for i in 0..3 {
            let id = format!("cust-{i}");
            store.upsert(&id, &doc(&id, "Customer"), None).await.unwrap();
        }

        let query = DocumentQuery::of_type("Device");
        let first = store.query(&query, None, 5).await.unwrap();
        assert_eq!(first.documents.len(), 5);
        assert!(first.continuation.is_some());

        let second = store
            .query(&query, first.continuation.as_deref(), 5)
            .await
            .unwrap();
        assert_eq!(second.documents.len(), 2);
        assert!(second.continuation.is_none());

        let mut ids: Vec<_> = first
            .documents
            .iter()
            .chain(second.documents.iter())
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 7);
    }
}
