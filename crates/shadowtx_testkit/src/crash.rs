//! Crash testing for shadowtx.
//!
//! A crash is simulated by a store that starts failing every write after a
//! given number of successful ones. Because the fault hits before the write
//! is delegated, each primitive either happened completely or not at all,
//! exactly as with a process that dies between two store calls.
//!
//! ## Test Strategy
//!
//! 1. Run a workload once without faults and count its writes
//! 2. For every write index, rerun it on a fresh store crashing there
//! 3. Recover with a fresh coordinator over the surviving state
//! 4. Check the base collections hold either the old or the new state and
//!    no bookkeeping is left behind
//!
//! ## Usage
//!
//! ```rust
//! use shadowtx_core::{CoreResult, TransactionCoordinator};
//! use shadowtx_storage::{Document, InMemoryStore};
//! use shadowtx_testkit::crash::{crash_at, writes_needed};
//! use serde_json::json;
//!
//! let workload = |c: &TransactionCoordinator| -> CoreResult<()> {
//!     let tx = c.begin()?;
//!     tx.insert("orders", &[Document::new("a", json!({"v": 1}))])?;
//!     tx.commit()
//! };
//! let seed = |_: &InMemoryStore| {};
//!
//! let total = writes_needed(&seed, &workload);
//! let run = crash_at(total / 2, &seed, &workload);
//! assert!(run.crashed);
//! ```

use shadowtx_core::{Config, CoreResult, TransactionCoordinator};
use shadowtx_storage::{
    Document, DocumentId, DocumentStore, InMemoryStore, StorageError, StorageResult,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A store wrapper that fails every write after a set number of writes.
///
/// Reads always go through.
pub struct FaultyStore {
    inner: Arc<dyn DocumentStore>,
    fail_after: AtomicUsize,
    writes: AtomicUsize,
    crashed: AtomicBool,
}

impl FaultyStore {
    /// Wraps `inner`; no faults until [`crash_after`](Self::crash_after).
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            fail_after: AtomicUsize::new(usize::MAX),
            writes: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
        }
    }

    /// Lets `writes` more writes through, then fails all later ones.
    pub fn crash_after(&self, writes: usize) {
        let done = self.writes.load(Ordering::SeqCst);
        self.fail_after
            .store(done.saturating_add(writes), Ordering::SeqCst);
    }

    /// Clears the fault and the write counter.
    pub fn reset(&self) {
        self.fail_after.store(usize::MAX, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Whether a write has been refused.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Number of writes attempted so far, refused ones included.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn gate(&self) -> StorageResult<()> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        if n >= self.fail_after.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(StorageError::unavailable("simulated crash"));
        }
        Ok(())
    }
}

impl DocumentStore for FaultyStore {
    fn insert(&self, collection: &str, doc: &Document) -> StorageResult<bool> {
        self.gate()?;
        self.inner.insert(collection, doc)
    }

    fn get(&self, collection: &str, id: &DocumentId) -> StorageResult<Option<Document>> {
        self.inner.get(collection, id)
    }

    fn put(&self, collection: &str, doc: &Document) -> StorageResult<()> {
        self.gate()?;
        self.inner.put(collection, doc)
    }

    fn replace_if(
        &self,
        collection: &str,
        expected: &Document,
        new: &Document,
    ) -> StorageResult<bool> {
        self.gate()?;
        self.inner.replace_if(collection, expected, new)
    }

    fn remove(&self, collection: &str, id: &DocumentId) -> StorageResult<bool> {
        self.gate()?;
        self.inner.remove(collection, id)
    }

    fn remove_if(&self, collection: &str, expected: &Document) -> StorageResult<bool> {
        self.gate()?;
        self.inner.remove_if(collection, expected)
    }

    fn scan(&self, collection: &str) -> StorageResult<Vec<Document>> {
        self.inner.scan(collection)
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        self.inner.collections()
    }
}

/// Outcome of one crashed run.
pub struct CrashRun {
    /// Writes allowed before the crash.
    pub crash_after: usize,
    /// Whether the crash actually happened.
    pub crashed: bool,
    /// What the workload returned.
    pub outcome: CoreResult<()>,
    /// The state the crash left behind.
    pub store: Arc<InMemoryStore>,
}

impl CrashRun {
    /// A coordinator over the surviving state, as a restarted process
    /// would create it. Active transactions count as stale immediately.
    pub fn restart(&self) -> TransactionCoordinator {
        restart(self.store.clone())
    }
}

/// Opens a coordinator that treats every active transaction as stale.
pub fn restart(store: Arc<InMemoryStore>) -> TransactionCoordinator {
    let config = Config::default().stale_after(std::time::Duration::ZERO);
    TransactionCoordinator::new(store, config).expect("Failed to open coordinator")
}

/// Counts the writes `workload` performs after `seed` on a clean store.
pub fn writes_needed<S, W>(seed: &S, workload: &W) -> usize
where
    S: Fn(&InMemoryStore),
    W: Fn(&TransactionCoordinator) -> CoreResult<()>,
{
    let inner = Arc::new(InMemoryStore::new());
    seed(inner.as_ref());
    let faulty = Arc::new(FaultyStore::new(inner));
    let coordinator = TransactionCoordinator::new(faulty.clone(), Config::default())
        .expect("Failed to open coordinator");
    if let Err(e) = workload(&coordinator) {
        panic!("workload failed without faults: {e}");
    }
    faulty.writes()
}

/// Runs `workload` on a fresh seeded store that crashes after `n` writes.
pub fn crash_at<S, W>(n: usize, seed: &S, workload: &W) -> CrashRun
where
    S: Fn(&InMemoryStore),
    W: Fn(&TransactionCoordinator) -> CoreResult<()>,
{
    let inner = Arc::new(InMemoryStore::new());
    seed(inner.as_ref());
    let faulty = Arc::new(FaultyStore::new(inner.clone()));
    faulty.crash_after(n);
    let coordinator = TransactionCoordinator::new(faulty.clone(), Config::default())
        .expect("Failed to open coordinator");
    let outcome = workload(&coordinator);
    CrashRun {
        crash_after: n,
        crashed: faulty.has_crashed(),
        outcome,
        store: inner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn faults_start_after_budget() {
        let store = FaultyStore::new(Arc::new(InMemoryStore::new()));
        store.crash_after(1);

        store.put("c", &Document::new("a", json!(1))).unwrap();
        assert!(!store.has_crashed());
        assert!(store.put("c", &Document::new("b", json!(2))).is_err());
        assert!(store.has_crashed());

        // Reads keep working and the refused write had no effect.
        assert!(store.get("c", &"a".into()).unwrap().is_some());
        assert!(store.get("c", &"b".into()).unwrap().is_none());
        assert_eq!(store.writes(), 2);

        store.reset();
        store.put("c", &Document::new("b", json!(2))).unwrap();
    }

    #[test]
    fn zero_budget_fails_first_write() {
        let store = FaultyStore::new(Arc::new(InMemoryStore::new()));
        store.crash_after(0);
        let err = store.insert("c", &Document::new("a", json!(1))).unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }
}
