//! Lock ledger: persistent per-document locks.
//!
//! A lock is a document in the shared lock collection whose id is
//! `<collection>:<document id>`. Creating it with the store's conditional
//! insert is the compare-and-set that grants one transaction the exclusive
//! right to stage writes for that document. This is the only mutual
//! exclusion mechanism in the system.

use crate::error::{CoreError, CoreResult};
use crate::types::{LockOp, TransactionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shadowtx_storage::{Document, DocumentId, DocumentStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// A lock held by a transaction on one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Owning transaction.
    pub tx_id: TransactionId,
    /// Base collection of the locked document.
    pub collection: String,
    /// The locked document.
    pub document_id: DocumentId,
    /// What the owner is doing to the document.
    pub op: LockOp,
    /// Base value when first locked for update or delete. Diagnostic only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<Value>,
}

impl LockRecord {
    /// Creates a lock record without an original snapshot.
    pub fn new(
        tx_id: TransactionId,
        collection: impl Into<String>,
        document_id: DocumentId,
        op: LockOp,
    ) -> Self {
        Self {
            tx_id,
            collection: collection.into(),
            document_id,
            op,
            original: None,
        }
    }

    /// The lock's id in the lock collection.
    #[must_use]
    pub fn lock_id(&self) -> DocumentId {
        lock_id(&self.collection, &self.document_id)
    }

    fn to_document(&self) -> CoreResult<Document> {
        Ok(Document::new(self.lock_id(), serde_json::to_value(self)?))
    }

    fn from_document(doc: &Document) -> CoreResult<Self> {
        Ok(serde_json::from_value(doc.body.clone())?)
    }
}

/// Lock id for `document_id` in `collection`.
///
/// Collection names cannot contain `:`, so the first `:` always separates
/// the two parts.
#[must_use]
pub fn lock_id(collection: &str, document_id: &DocumentId) -> DocumentId {
    DocumentId::new(format!("{collection}:{document_id}"))
}

/// Persistent lock records shared by all transactions and collections.
pub struct LockLedger {
    store: Arc<dyn DocumentStore>,
    lock_collection: String,
    max_retries: u32,
}

impl LockLedger {
    /// Creates a ledger over `lock_collection` in `store`.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        lock_collection: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            lock_collection: lock_collection.into(),
            max_retries,
        }
    }

    /// Locks every id in `document_ids` for `tx_id`, or none of them.
    ///
    /// Ids already locked by `tx_id` are left untouched. Returns the ids
    /// for which a lock was newly created.
    ///
    /// The store has no multi-document insert, so each lock is inserted on
    /// its own and every lock created by this call is removed again if any
    /// id turns out to be held by another transaction. In that narrow
    /// window a competing acquirer can observe a lock that is about to
    /// vanish; [`CoreError::LockConflict`] must therefore be retried, never
    /// taken as proof that the other side won.
    ///
    /// # Errors
    ///
    /// - [`CoreError::LockConflict`] naming every contested id
    /// - [`CoreError::StoreUnavailable`] if the store fails
    pub fn acquire(
        &self,
        tx_id: TransactionId,
        collection: &str,
        document_ids: &[DocumentId],
        op: LockOp,
    ) -> CoreResult<Vec<DocumentId>> {
        let mut created = Vec::with_capacity(document_ids.len());
        let mut conflicts = Vec::new();

        for id in document_ids {
            match self.try_insert(tx_id, collection, id, op) {
                Ok(Some(true)) => created.push(id.clone()),
                Ok(Some(false)) => {}
                Ok(None) => conflicts.push(id.clone()),
                Err(e) => {
                    self.compensate(tx_id, collection, &created);
                    return Err(e);
                }
            }
        }

        if !conflicts.is_empty() {
            self.compensate(tx_id, collection, &created);
            debug!(%tx_id, collection, ?conflicts, "lock conflict");
            return Err(CoreError::lock_conflict(collection, conflicts));
        }

        debug!(%tx_id, collection, %op, count = created.len(), "locks acquired");
        Ok(created)
    }

    /// `Some(true)` if created, `Some(false)` if already ours, `None` if
    /// held by someone else.
    fn try_insert(
        &self,
        tx_id: TransactionId,
        collection: &str,
        id: &DocumentId,
        op: LockOp,
    ) -> CoreResult<Option<bool>> {
        let record = LockRecord::new(tx_id, collection, id.clone(), op);
        if self.store.insert(&self.lock_collection, &record.to_document()?)? {
            return Ok(Some(true));
        }
        match self.get(collection, id)? {
            Some(existing) if existing.tx_id == tx_id => Ok(Some(false)),
            // Held by another transaction, or released between our insert
            // and this read. Either way the caller has to retry.
            _ => Ok(None),
        }
    }

    fn compensate(&self, tx_id: TransactionId, collection: &str, created: &[DocumentId]) {
        if created.is_empty() {
            return;
        }
        if let Err(e) = self.release(tx_id, collection, created) {
            warn!(%tx_id, collection, error = %e, "failed to undo partial lock acquisition");
        }
    }

    /// Removes the locks `tx_id` holds on `document_ids`.
    ///
    /// Ids that are not locked, or locked by another transaction, are
    /// skipped. Safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn release(
        &self,
        tx_id: TransactionId,
        collection: &str,
        document_ids: &[DocumentId],
    ) -> CoreResult<()> {
        for id in document_ids {
            if let Some((doc, record)) = self.get_raw(collection, id)? {
                if record.tx_id == tx_id {
                    self.store.remove_if(&self.lock_collection, &doc)?;
                }
            }
        }
        Ok(())
    }

    /// Removes exactly `record` if it is still in the ledger unchanged.
    ///
    /// Returns `true` if it was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn release_record(&self, record: &LockRecord) -> CoreResult<bool> {
        Ok(self
            .store
            .remove_if(&self.lock_collection, &record.to_document()?)?)
    }

    /// Returns true if `record` is still in the ledger unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn is_current(&self, record: &LockRecord) -> CoreResult<bool> {
        Ok(self.get(&record.collection, &record.document_id)?.as_ref() == Some(record))
    }

    /// Changes the operation of a lock owned by `tx_id`.
    ///
    /// `original` is stored only if the lock has no snapshot yet; once
    /// captured a snapshot never changes.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidTransaction`] if `tx_id` does not hold the lock
    /// - [`CoreError::StoreUnavailable`] if the store fails
    pub fn amend(
        &self,
        tx_id: TransactionId,
        collection: &str,
        document_id: &DocumentId,
        op: LockOp,
        original: Option<Value>,
    ) -> CoreResult<LockRecord> {
        for _ in 0..=self.max_retries {
            let (doc, record) = match self.get_raw(collection, document_id)? {
                Some((doc, record)) if record.tx_id == tx_id => (doc, record),
                _ => {
                    return Err(CoreError::invalid_transaction(
                        tx_id,
                        format!("no lock held on {collection}/{document_id}"),
                    ))
                }
            };

            let mut amended = record.clone();
            amended.op = op;
            if amended.original.is_none() {
                amended.original = original.clone();
            }
            if amended == record {
                return Ok(record);
            }
            if self
                .store
                .replace_if(&self.lock_collection, &doc, &amended.to_document()?)?
            {
                return Ok(amended);
            }
        }
        Err(CoreError::invalid_operation(format!(
            "lock on {collection}/{document_id} kept changing"
        )))
    }

    /// Returns the lock on a document, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record is malformed.
    pub fn get(&self, collection: &str, document_id: &DocumentId) -> CoreResult<Option<LockRecord>> {
        Ok(self.get_raw(collection, document_id)?.map(|(_, record)| record))
    }

    fn get_raw(
        &self,
        collection: &str,
        document_id: &DocumentId,
    ) -> CoreResult<Option<(Document, LockRecord)>> {
        match self
            .store
            .get(&self.lock_collection, &lock_id(collection, document_id))?
        {
            Some(doc) => {
                let record = LockRecord::from_document(&doc)?;
                Ok(Some((doc, record)))
            }
            None => Ok(None),
        }
    }

    /// Returns every lock in the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a record is malformed.
    pub fn all(&self) -> CoreResult<Vec<LockRecord>> {
        self.store
            .scan(&self.lock_collection)?
            .iter()
            .map(LockRecord::from_document)
            .collect()
    }

    /// Returns every lock owned by `tx_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a record is malformed.
    pub fn find_by_tx(&self, tx_id: TransactionId) -> CoreResult<Vec<LockRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|lock| lock.tx_id == tx_id)
            .collect())
    }

    /// Returns every lock on `collection` with operation `op`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a record is malformed.
    pub fn find_by_op(&self, collection: &str, op: LockOp) -> CoreResult<Vec<LockRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|lock| lock.collection == collection && lock.op == op)
            .collect())
    }
}

impl std::fmt::Debug for LockLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockLedger")
            .field("lock_collection", &self.lock_collection)
            .finish_non_exhaustive()
    }
}
