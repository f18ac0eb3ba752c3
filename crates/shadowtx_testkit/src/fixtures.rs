//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up coordinators over
//! in-memory and file-backed stores and for checking what a store holds.

use serde_json::json;
use shadowtx_core::{Config, TransactionCoordinator};
use shadowtx_storage::{Document, DocumentStore, FileStore, InMemoryStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// An in-memory store with a coordinator over it.
pub struct TestStore {
    /// The backing store, for inspecting raw state.
    pub store: Arc<InMemoryStore>,
    /// The coordinator.
    pub coordinator: TransactionCoordinator,
}

impl TestStore {
    /// Creates an empty store with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an empty store with the given configuration.
    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let coordinator =
            TransactionCoordinator::new(store.clone(), config).expect("Failed to open coordinator");
        Self { store, coordinator }
    }

    /// Writes `docs` straight into a base collection.
    pub fn seed(&self, collection: &str, docs: &[Document]) {
        seed(&*self.store, collection, docs);
    }

    /// Committed contents of a collection, ordered by id.
    pub fn snapshot(&self, collection: &str) -> Vec<Document> {
        snapshot(&*self.store, collection)
    }

    /// Panics if any transaction bookkeeping is left in the store.
    pub fn assert_clean(&self) {
        assert_clean(&*self.store, self.coordinator.config());
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = TransactionCoordinator;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

/// A file store in a temporary directory, deleted on drop.
///
/// Each call to [`open`](Self::open) behaves like a separate process
/// attaching to the same directory.
pub struct TempFileStore {
    dir: TempDir,
}

impl TempFileStore {
    /// Creates an empty temporary store directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Path of the store directory.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    /// Opens a fresh `FileStore` on the directory.
    pub fn store(&self) -> Arc<FileStore> {
        Arc::new(open_file_store(&self.path()))
    }

    /// Opens a fresh coordinator on the directory.
    pub fn open(&self, config: Config) -> TransactionCoordinator {
        TransactionCoordinator::new(self.store(), config).expect("Failed to open coordinator")
    }
}

impl Default for TempFileStore {
    fn default() -> Self {
        Self::new()
    }
}

fn open_file_store(path: &Path) -> FileStore {
    // Tests don't need fsync.
    FileStore::open_with_sync(path, false).expect("Failed to open file store")
}

/// A document `{"v": v}`.
pub fn doc(id: &str, v: i64) -> Document {
    Document::new(id, json!({ "v": v }))
}

/// Writes `docs` straight into a base collection.
pub fn seed(store: &dyn DocumentStore, collection: &str, docs: &[Document]) {
    for d in docs {
        store.put(collection, d).expect("Failed to seed document");
    }
}

/// Contents of a collection, ordered by id.
pub fn snapshot(store: &dyn DocumentStore, collection: &str) -> Vec<Document> {
    store.scan(collection).expect("Failed to scan collection")
}

/// Panics if any transaction record, lock or staged document remains.
pub fn assert_clean(store: &dyn DocumentStore, config: &Config) {
    let records = snapshot(store, &config.transaction_collection);
    assert!(records.is_empty(), "transaction records left: {records:?}");
    let locks = snapshot(store, &config.lock_collection);
    assert!(locks.is_empty(), "locks left: {locks:?}");
    for name in store.collections().expect("Failed to list collections") {
        if name.ends_with(&config.staging_suffix) {
            let staged = snapshot(store, &name);
            assert!(staged.is_empty(), "staged documents left in {name}: {staged:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_starts_clean() {
        let t = TestStore::new();
        t.assert_clean();
        t.seed("orders", &[doc("a", 1)]);
        assert_eq!(t.snapshot("orders"), vec![doc("a", 1)]);
        assert_eq!(t.read("orders", &"a".into()).unwrap(), Some(doc("a", 1)));
    }

    #[test]
    fn temp_file_store_is_shared_between_opens() {
        let files = TempFileStore::new();
        seed(&*files.store(), "orders", &[doc("a", 1)]);
        let c = files.open(Config::default());
        assert_eq!(c.read("orders", &"a".into()).unwrap(), Some(doc("a", 1)));
    }
}
