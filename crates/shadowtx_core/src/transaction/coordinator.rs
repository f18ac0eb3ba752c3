//! Transaction coordinator.

use super::operations::Transaction;
use super::record::TransactionRecord;
use super::registry::TransactionRegistry;
use crate::config::Config;
use crate::error::{CoreError, CoreResult, ErrorContext};
use crate::filter::Filter;
use crate::ledger::{LockLedger, LockRecord};
use crate::staging::ShadowArea;
use crate::types::{LockOp, TransactionId, TxState};
use shadowtx_storage::{validate_collection_name, Document, DocumentId, DocumentStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Drives transactions through their lifecycle.
///
/// ```text
/// Active ──commit──▶ Committing ──▶ (record removed)
///    │
///    └──rollback──▶ RollingBack ──▶ (record removed)
/// ```
///
/// The coordinator keeps no in-process state: records, locks and staged
/// documents all live in the backing store. Any number of coordinators, in
/// any number of processes, can share one store.
///
/// ## Example
///
/// ```rust
/// use serde_json::json;
/// use shadowtx_core::{Config, Filter, TransactionCoordinator};
/// use shadowtx_storage::{Document, InMemoryStore};
/// use std::sync::Arc;
///
/// let coordinator =
///     TransactionCoordinator::new(Arc::new(InMemoryStore::new()), Config::default()).unwrap();
///
/// let tx = coordinator.begin().unwrap();
/// tx.insert("orders", &[Document::new("a", json!({"v": 1}))]).unwrap();
/// assert!(coordinator.read("orders", &"a".into()).unwrap().is_none());
///
/// tx.commit().unwrap();
/// assert_eq!(coordinator.find_committed("orders", &Filter::All).unwrap().len(), 1);
/// ```
pub struct TransactionCoordinator {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) config: Config,
    pub(crate) ledger: LockLedger,
    pub(crate) shadow: ShadowArea,
    pub(crate) registry: TransactionRegistry,
}

/// Counts of what a commit applied.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Applied {
    pub(crate) inserted: usize,
    pub(crate) updated: usize,
    pub(crate) deleted: usize,
}

impl TransactionCoordinator {
    /// Creates a coordinator over `store`.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidOperation`] if the configured collection names
    /// are unusable or collide.
    pub fn new(store: Arc<dyn DocumentStore>, config: Config) -> CoreResult<Self> {
        validate_config(&config)?;
        let max_retries = config.max_cas_retries;
        Ok(Self {
            ledger: LockLedger::new(store.clone(), config.lock_collection.clone(), max_retries),
            shadow: ShadowArea::new(store.clone(), &config),
            registry: TransactionRegistry::new(
                store.clone(),
                config.transaction_collection.clone(),
                max_retries,
            ),
            store,
            config,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts a transaction and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn start(&self) -> CoreResult<TransactionId> {
        let record = self.registry.create()?;
        info!(tx_id = %record.id, "transaction started");
        Ok(record.id)
    }

    /// Starts a transaction and returns a handle to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn begin(&self) -> CoreResult<Transaction<'_>> {
        Ok(Transaction::new(self, self.start()?))
    }

    /// Returns a handle to an existing transaction.
    ///
    /// The id is not checked here; operations on the handle fail with
    /// [`CoreError::InvalidTransaction`] if it is unknown.
    #[must_use]
    pub fn transaction(&self, tx_id: TransactionId) -> Transaction<'_> {
        Transaction::new(self, tx_id)
    }

    /// Inserts documents within `tx_id`. See [`Transaction::insert`].
    ///
    /// # Errors
    ///
    /// See [`Transaction::insert`].
    pub fn insert(&self, tx_id: TransactionId, collection: &str, docs: &[Document]) -> CoreResult<()> {
        self.transaction(tx_id).insert(collection, docs)
    }

    /// Updates documents within `tx_id`. See [`Transaction::update`].
    ///
    /// # Errors
    ///
    /// See [`Transaction::update`].
    pub fn update(&self, tx_id: TransactionId, collection: &str, docs: &[Document]) -> CoreResult<()> {
        self.transaction(tx_id).update(collection, docs)
    }

    /// Deletes documents within `tx_id`. See [`Transaction::delete`].
    ///
    /// # Errors
    ///
    /// See [`Transaction::delete`].
    pub fn delete(
        &self,
        tx_id: TransactionId,
        collection: &str,
        ids: &[DocumentId],
    ) -> CoreResult<()> {
        self.transaction(tx_id).delete(collection, ids)
    }

    /// Queries within `tx_id`. See [`Transaction::find`].
    ///
    /// # Errors
    ///
    /// See [`Transaction::find`].
    pub fn find(
        &self,
        tx_id: TransactionId,
        collection: &str,
        filter: &Filter,
    ) -> CoreResult<Vec<Document>> {
        self.transaction(tx_id).find(collection, filter)
    }

    /// Commits a transaction.
    ///
    /// Moves the record to `Committing`, applies every lock's staged effect
    /// to its base collection, clears staging and locks, then removes the
    /// record. If anything fails after the state change, the record stays
    /// `Committing` and [`recover`](Self::recover) finishes the job.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidTransaction`] if the transaction is missing or
    ///   not active
    /// - [`CoreError::CommitFault`] if a staged insert collides with a
    ///   different base document
    /// - [`CoreError::StoreUnavailable`] if the store fails
    pub fn commit(&self, tx_id: TransactionId) -> CoreResult<()> {
        let record = self
            .registry
            .transition(tx_id, TxState::Active, TxState::Committing)?;
        let applied = self
            .redo(&record)
            .with_context(|| format!("committing transaction {tx_id}"))?;
        info!(
            %tx_id,
            inserted = applied.inserted,
            updated = applied.updated,
            deleted = applied.deleted,
            "transaction committed"
        );
        Ok(())
    }

    /// Rolls a transaction back.
    ///
    /// Base collections are never touched; staged documents and locks are
    /// discarded and the record removed.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidTransaction`] if the transaction is missing or
    ///   not active
    /// - [`CoreError::StoreUnavailable`] if the store fails
    pub fn rollback(&self, tx_id: TransactionId) -> CoreResult<()> {
        let record = self
            .registry
            .transition(tx_id, TxState::Active, TxState::RollingBack)?;
        let discarded = self
            .discard(&record)
            .with_context(|| format!("rolling back transaction {tx_id}"))?;
        info!(%tx_id, discarded, "transaction rolled back");
        Ok(())
    }

    /// Applies and cleans up a `Committing` transaction. Safe to repeat.
    pub(crate) fn redo(&self, record: &TransactionRecord) -> CoreResult<Applied> {
        let locks = self.ledger.find_by_tx(record.id)?;
        let mut applied = Applied::default();
        for lock in &locks {
            if self.apply(lock)? {
                match lock.op {
                    LockOp::New => applied.inserted += 1,
                    LockOp::Updated => applied.updated += 1,
                    LockOp::Deleted => applied.deleted += 1,
                }
            }
        }
        self.cleanup(record.id, &locks)?;
        self.registry.remove(record.id)?;
        Ok(applied)
    }

    /// Cleans up a `RollingBack` transaction. Safe to repeat.
    pub(crate) fn discard(&self, record: &TransactionRecord) -> CoreResult<usize> {
        let locks = self.ledger.find_by_tx(record.id)?;
        self.cleanup(record.id, &locks)?;
        self.registry.remove(record.id)?;
        Ok(locks.len())
    }

    /// Applies one lock's effect to its base collection.
    ///
    /// Returns `false` if there was nothing left to apply.
    pub(crate) fn apply(&self, lock: &LockRecord) -> CoreResult<bool> {
        let collection = lock.collection.as_str();
        let id = &lock.document_id;

        if lock.op == LockOp::Deleted {
            self.store.remove(collection, id)?;
            return Ok(true);
        }

        // Cleanup unstages before it releases, so a live lock without a
        // staged copy has already been applied.
        let Some(staged) = self.shadow.read_staged(collection, id)? else {
            debug!(tx_id = %lock.tx_id, collection, %id, "nothing staged, skipping");
            return Ok(false);
        };

        match lock.op {
            LockOp::New => {
                if !self.store.insert(collection, &staged)? {
                    match self.store.get(collection, id)? {
                        Some(existing) if existing == staged => {}
                        _ => {
                            return Err(CoreError::commit_fault(
                                collection,
                                id.clone(),
                                "base collection already holds a different document",
                            ))
                        }
                    }
                }
            }
            LockOp::Updated => self.store.put(collection, &staged)?,
            LockOp::Deleted => {}
        }
        Ok(true)
    }

    /// Clears staged copies, then releases locks, collection by collection.
    fn cleanup(&self, tx_id: TransactionId, locks: &[LockRecord]) -> CoreResult<()> {
        let mut by_collection: BTreeMap<&str, Vec<DocumentId>> = BTreeMap::new();
        for lock in locks {
            by_collection
                .entry(lock.collection.as_str())
                .or_default()
                .push(lock.document_id.clone());
        }
        for (collection, ids) in &by_collection {
            self.shadow.clear(collection, ids)?;
            self.ledger.release(tx_id, collection, ids)?;
        }
        Ok(())
    }

    /// Reads a committed document, ignoring all transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn read(&self, collection: &str, id: &DocumentId) -> CoreResult<Option<Document>> {
        check_name(collection)?;
        Ok(self.store.get(collection, id)?)
    }

    /// Queries committed documents, ignoring all transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn find_committed(&self, collection: &str, filter: &Filter) -> CoreResult<Vec<Document>> {
        check_name(collection)?;
        let docs = match filter.id_bound() {
            Some(ids) => {
                let mut docs = Vec::with_capacity(ids.len());
                for id in &ids {
                    if let Some(doc) = self.store.get(collection, id)? {
                        docs.push(doc);
                    }
                }
                docs
            }
            None => self.store.scan(collection)?,
        };
        Ok(docs.into_iter().filter(|doc| filter.matches(doc)).collect())
    }

    /// Returns every transaction record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn transactions(&self) -> CoreResult<Vec<TransactionRecord>> {
        self.registry.list()
    }

    /// Returns one transaction record, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn transaction_record(&self, tx_id: TransactionId) -> CoreResult<Option<TransactionRecord>> {
        self.registry.get(tx_id)
    }

    /// Returns the locks held by a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn locks_of(&self, tx_id: TransactionId) -> CoreResult<Vec<LockRecord>> {
        self.ledger.find_by_tx(tx_id)
    }

    /// Returns every lock in the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn locks(&self) -> CoreResult<Vec<LockRecord>> {
        self.ledger.all()
    }

    /// Direct access to the lock ledger.
    #[must_use]
    pub fn ledger(&self) -> &LockLedger {
        &self.ledger
    }
}

/// Rejects collection names the store cannot hold.
pub(crate) fn check_name(collection: &str) -> CoreResult<()> {
    validate_collection_name(collection).map_err(|e| CoreError::invalid_operation(e.to_string()))
}

fn validate_config(config: &Config) -> CoreResult<()> {
    let invalid = |e: shadowtx_storage::StorageError| {
        CoreError::invalid_operation(format!("bad configuration: {e}"))
    };
    validate_collection_name(&config.transaction_collection).map_err(invalid)?;
    validate_collection_name(&config.lock_collection).map_err(invalid)?;
    if config.staging_suffix.is_empty() {
        return Err(CoreError::invalid_operation(
            "bad configuration: staging suffix is empty",
        ));
    }
    validate_collection_name(&config.shadow_name("x")).map_err(invalid)?;
    if config.transaction_collection == config.lock_collection {
        return Err(CoreError::invalid_operation(
            "bad configuration: transaction and lock collections are the same",
        ));
    }
    Ok(())
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
