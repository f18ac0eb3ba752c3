//! Document store trait definition.

use crate::document::{Document, DocumentId};
use crate::error::StorageResult;

/// A backing document store for shadowtx.
///
/// Stores hold documents in named collections. Each method is atomic with
/// respect to the single document it touches; nothing is atomic across
/// documents. The transaction layer builds multi-document atomicity from
/// these primitives alone.
///
/// # Invariants
///
/// - `insert` succeeds for exactly one of any number of concurrent callers
///   racing on the same `(collection, id)`
/// - `replace_if` and `remove_if` compare the whole stored document
/// - `put`, `remove` and `insert` are idempotent in their end state
/// - Collections spring into existence on first write
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent, multi-process use
pub trait DocumentStore: Send + Sync {
    /// Inserts `doc` only if no document with its id exists.
    ///
    /// Returns `true` if the document was written, `false` if the id was
    /// already taken.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot complete the write.
    fn insert(&self, collection: &str, doc: &Document) -> StorageResult<bool>;

    /// Looks up a document by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, collection: &str, id: &DocumentId) -> StorageResult<Option<Document>>;

    /// Writes `doc`, replacing any document with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot complete the write.
    fn put(&self, collection: &str, doc: &Document) -> StorageResult<()>;

    /// Replaces `expected` with `new` only if the stored document equals
    /// `expected`.
    ///
    /// `new.id` must equal `expected.id`. Returns `true` if the swap
    /// happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot complete the write.
    fn replace_if(&self, collection: &str, expected: &Document, new: &Document)
        -> StorageResult<bool>;

    /// Removes a document by id.
    ///
    /// Returns `true` if a document was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot complete the removal.
    fn remove(&self, collection: &str, id: &DocumentId) -> StorageResult<bool>;

    /// Removes a document only if the stored document equals `expected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot complete the removal.
    fn remove_if(&self, collection: &str, expected: &Document) -> StorageResult<bool>;

    /// Returns every document of a collection, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn scan(&self, collection: &str) -> StorageResult<Vec<Document>>;

    /// Returns the names of all collections holding at least one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn collections(&self) -> StorageResult<Vec<String>>;
}

impl<S: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<S> {
    fn insert(&self, collection: &str, doc: &Document) -> StorageResult<bool> {
        (**self).insert(collection, doc)
    }

    fn get(&self, collection: &str, id: &DocumentId) -> StorageResult<Option<Document>> {
        (**self).get(collection, id)
    }

    fn put(&self, collection: &str, doc: &Document) -> StorageResult<()> {
        (**self).put(collection, doc)
    }

    fn replace_if(
        &self,
        collection: &str,
        expected: &Document,
        new: &Document,
    ) -> StorageResult<bool> {
        (**self).replace_if(collection, expected, new)
    }

    fn remove(&self, collection: &str, id: &DocumentId) -> StorageResult<bool> {
        (**self).remove(collection, id)
    }

    fn remove_if(&self, collection: &str, expected: &Document) -> StorageResult<bool> {
        (**self).remove_if(collection, expected)
    }

    fn scan(&self, collection: &str) -> StorageResult<Vec<Document>> {
        (**self).scan(collection)
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        (**self).collections()
    }
}
