//! In-memory document store for testing.

use crate::document::{validate_collection_name, Document, DocumentId};
use crate::error::StorageResult;
use crate::store::DocumentStore;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// An in-memory document store.
///
/// This store keeps all collections in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral data that doesn't need persistence
///
/// # Thread Safety
///
/// All primitives run under a single write lock, which makes each of them
/// trivially atomic. The store can be shared across threads.
///
/// # Example
///
/// ```rust
/// use shadowtx_storage::{Document, DocumentStore, InMemoryStore};
/// use serde_json::json;
///
/// let store = InMemoryStore::new();
/// store.put("users", &Document::new("u1", json!({"name": "Ada"}))).unwrap();
/// assert_eq!(store.scan("users").unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<DocumentId, Value>>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents in a collection.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if the store holds no documents at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.read().values().all(BTreeMap::is_empty)
    }

    /// Removes every collection.
    pub fn clear(&self) {
        self.collections.write().clear();
    }
}

impl DocumentStore for InMemoryStore {
    fn insert(&self, collection: &str, doc: &Document) -> StorageResult<bool> {
        validate_collection_name(collection)?;
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&doc.id) {
            return Ok(false);
        }
        docs.insert(doc.id.clone(), doc.body.clone());
        Ok(true)
    }

    fn get(&self, collection: &str, id: &DocumentId) -> StorageResult<Option<Document>> {
        validate_collection_name(collection)?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|body| Document::new(id.clone(), body.clone())))
    }

    fn put(&self, collection: &str, doc: &Document) -> StorageResult<()> {
        validate_collection_name(collection)?;
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id.clone(), doc.body.clone());
        Ok(())
    }

    fn replace_if(
        &self,
        collection: &str,
        expected: &Document,
        new: &Document,
    ) -> StorageResult<bool> {
        validate_collection_name(collection)?;
        if expected.id != new.id {
            return Ok(false);
        }
        let mut collections = self.collections.write();
        match collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(&expected.id))
        {
            Some(body) if *body == expected.body => {
                *body = new.body.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove(&self, collection: &str, id: &DocumentId) -> StorageResult<bool> {
        validate_collection_name(collection)?;
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some()))
    }

    fn remove_if(&self, collection: &str, expected: &Document) -> StorageResult<bool> {
        validate_collection_name(collection)?;
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        if docs.get(&expected.id) == Some(&expected.body) {
            docs.remove(&expected.id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn scan(&self, collection: &str) -> StorageResult<Vec<Document>> {
        validate_collection_name(collection)?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, body)| Document::new(id.clone(), body.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
