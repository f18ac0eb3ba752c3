//! Transactional operations.
//!
//! A [`Transaction`] is a handle scoped to one transaction id. Each
//! operation follows the same shape: touch the record, lock the affected
//! ids, stage the new versions, then check the transaction is still
//! `Active`. The final check closes the window in which a concurrent commit
//! or rollback could have scanned the ledger before our lock existed; if it
//! fails, whatever this call created is undone.

use super::coordinator::{check_name, TransactionCoordinator};
use crate::error::{CoreError, CoreResult, ErrorContext};
use crate::filter::Filter;
use crate::ledger::LockRecord;
use crate::types::{LockOp, TransactionId};
use shadowtx_storage::{Document, DocumentId};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Operations performed on behalf of one transaction.
///
/// Obtained from [`TransactionCoordinator::begin`] or
/// [`TransactionCoordinator::transaction`]. Dropping the handle does not end
/// the transaction.
#[derive(Debug, Clone, Copy)]
pub struct Transaction<'c> {
    coordinator: &'c TransactionCoordinator,
    id: TransactionId,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(coordinator: &'c TransactionCoordinator, id: TransactionId) -> Self {
        Self { coordinator, id }
    }

    /// The transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Stages new documents.
    ///
    /// All ids are locked before anything is staged. If any of them is
    /// held by another transaction, or any document fails, every lock and
    /// staged copy this call created is removed again.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DuplicateDocument`] if an id is already live in the
    ///   base collection or in this transaction
    /// - [`CoreError::LockConflict`] if another transaction holds an id
    /// - [`CoreError::InvalidTransaction`] if the transaction is not active
    pub fn insert(&self, collection: &str, docs: &[Document]) -> CoreResult<()> {
        self.prepare(collection)?;
        let ids: Vec<DocumentId> = docs.iter().map(|d| d.id.clone()).collect();
        let mut batch = self.lock_batch(collection, &ids, LockOp::New)?;
        for doc in docs {
            let result = self
                .insert_one(collection, doc, &mut batch)
                .with_context(|| format!("inserting {collection}/{}", doc.id));
            if let Err(e) = result {
                self.abort(collection, &batch);
                return Err(e);
            }
        }
        self.confirm_active(collection, &batch)
    }

    /// Stages replacement versions of documents.
    ///
    /// Updating an id that has no base document stages it as new.
    ///
    /// # Errors
    ///
    /// - [`CoreError::LockConflict`] if another transaction holds an id
    /// - [`CoreError::InvalidTransaction`] if the transaction is not active
    pub fn update(&self, collection: &str, docs: &[Document]) -> CoreResult<()> {
        self.prepare(collection)?;
        let ids: Vec<DocumentId> = docs.iter().map(|d| d.id.clone()).collect();
        let mut batch = self.lock_batch(collection, &ids, LockOp::Updated)?;
        for doc in docs {
            let result = self
                .update_one(collection, doc, &mut batch)
                .with_context(|| format!("updating {collection}/{}", doc.id));
            if let Err(e) = result {
                self.abort(collection, &batch);
                return Err(e);
            }
        }
        self.confirm_active(collection, &batch)
    }

    /// Marks documents for deletion.
    ///
    /// Deleting a document this transaction inserted simply forgets the
    /// insert.
    ///
    /// # Errors
    ///
    /// - [`CoreError::LockConflict`] if another transaction holds an id
    /// - [`CoreError::InvalidTransaction`] if the transaction is not active
    pub fn delete(&self, collection: &str, ids: &[DocumentId]) -> CoreResult<()> {
        self.prepare(collection)?;
        let mut batch = self.lock_batch(collection, ids, LockOp::Deleted)?;
        for id in ids {
            let result = self
                .delete_one(collection, id, &mut batch)
                .with_context(|| format!("deleting {collection}/{id}"));
            if let Err(e) = result {
                self.abort(collection, &batch);
                return Err(e);
            }
        }
        self.confirm_active(collection, &batch)
    }

    /// Returns the documents of `collection` matching `filter` as this
    /// transaction sees them, ordered by id.
    ///
    /// That is the committed state, minus documents this transaction has
    /// locked, plus this transaction's own staged versions.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransaction`] if the transaction is not active.
    pub fn find(&self, collection: &str, filter: &Filter) -> CoreResult<Vec<Document>> {
        self.prepare(collection)?;
        let c = self.coordinator;

        let own: BTreeMap<DocumentId, LockOp> = c
            .ledger
            .find_by_tx(self.id)?
            .into_iter()
            .filter(|lock| lock.collection == collection)
            .map(|lock| (lock.document_id, lock.op))
            .collect();

        let mut visible: BTreeMap<DocumentId, Document> = c
            .find_committed(collection, filter)?
            .into_iter()
            .filter(|doc| !own.contains_key(&doc.id))
            .map(|doc| (doc.id.clone(), doc))
            .collect();

        for doc in c.shadow.query_staged(collection, filter)? {
            if matches!(own.get(&doc.id), Some(LockOp::New | LockOp::Updated)) {
                visible.insert(doc.id.clone(), doc);
            }
        }

        Ok(visible.into_values().collect())
    }

    /// Returns one document as this transaction sees it.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransaction`] if the transaction is not active.
    pub fn get(&self, collection: &str, id: &DocumentId) -> CoreResult<Option<Document>> {
        Ok(self
            .find(collection, &Filter::Ids(vec![id.clone()]))?
            .into_iter()
            .next())
    }

    /// Commits this transaction.
    ///
    /// # Errors
    ///
    /// See [`TransactionCoordinator::commit`].
    pub fn commit(self) -> CoreResult<()> {
        self.coordinator.commit(self.id)
    }

    /// Rolls this transaction back.
    ///
    /// # Errors
    ///
    /// See [`TransactionCoordinator::rollback`].
    pub fn rollback(self) -> CoreResult<()> {
        self.coordinator.rollback(self.id)
    }

    fn prepare(&self, collection: &str) -> CoreResult<()> {
        check_name(collection)?;
        if self.coordinator.config.is_reserved(collection) {
            return Err(CoreError::invalid_operation(format!(
                "collection {collection:?} is reserved for transaction bookkeeping"
            )));
        }
        self.coordinator.registry.touch(self.id, collection)?;
        Ok(())
    }

    /// Locks every id this transaction does not hold yet, all or nothing.
    fn lock_batch(&self, collection: &str, ids: &[DocumentId], op: LockOp) -> CoreResult<Batch> {
        let fresh = self
            .coordinator
            .ledger
            .acquire(self.id, collection, ids, op)
            .with_context(|| format!("locking {} document(s) in {collection}", ids.len()))?;
        Ok(Batch::new(fresh))
    }

    fn insert_one(&self, collection: &str, doc: &Document, batch: &mut Batch) -> CoreResult<()> {
        let c = self.coordinator;
        if batch.take_fresh(&doc.id) {
            if c.store.get(collection, &doc.id)?.is_some() {
                return Err(CoreError::duplicate(collection, doc.id.clone()));
            }
            return c.shadow.stage(collection, doc);
        }

        let lock = self.own_lock(collection, &doc.id)?;
        if lock.op != LockOp::Deleted {
            return Err(CoreError::duplicate(collection, doc.id.clone()));
        }
        // Re-inserting a document this transaction deleted.
        let op = self.base_op(collection, &doc.id)?;
        c.ledger.amend(self.id, collection, &doc.id, op, None)?;
        c.shadow.stage(collection, doc)?;
        batch.restaged.push(doc.clone());
        Ok(())
    }

    fn update_one(&self, collection: &str, doc: &Document, batch: &mut Batch) -> CoreResult<()> {
        let c = self.coordinator;
        if batch.take_fresh(&doc.id) {
            return self.capture_and_stage(collection, doc);
        }

        let lock = self.own_lock(collection, &doc.id)?;
        if lock.op == LockOp::Deleted {
            let op = self.base_op(collection, &doc.id)?;
            c.ledger.amend(self.id, collection, &doc.id, op, None)?;
        }
        c.shadow.stage(collection, doc)?;
        batch.restaged.push(doc.clone());
        Ok(())
    }

    fn capture_and_stage(&self, collection: &str, doc: &Document) -> CoreResult<()> {
        let c = self.coordinator;
        let original = c.store.get(collection, &doc.id)?;
        let op = if original.is_some() {
            LockOp::Updated
        } else {
            LockOp::New
        };
        c.ledger
            .amend(self.id, collection, &doc.id, op, original.map(|d| d.body))?;
        c.shadow.stage(collection, doc)
    }

    fn delete_one(&self, collection: &str, id: &DocumentId, batch: &mut Batch) -> CoreResult<()> {
        let c = self.coordinator;
        if batch.take_fresh(id) {
            if let Some(original) = c.store.get(collection, id)? {
                c.ledger
                    .amend(self.id, collection, id, LockOp::Deleted, Some(original.body))?;
            }
            return Ok(());
        }

        let Some(lock) = self.held(collection, id)? else {
            // An earlier entry of this batch dropped our staged insert.
            let created = c.ledger.acquire(self.id, collection, std::slice::from_ref(id), LockOp::Deleted)?;
            batch.fresh.extend(created);
            return Ok(());
        };
        match lock.op {
            LockOp::New => {
                c.shadow.unstage(collection, id)?;
                c.ledger.release(self.id, collection, std::slice::from_ref(id))?;
                debug!(tx_id = %self.id, collection, %id, "staged insert dropped");
            }
            LockOp::Updated => {
                c.ledger.amend(self.id, collection, id, LockOp::Deleted, None)?;
                c.shadow.unstage(collection, id)?;
            }
            LockOp::Deleted => {}
        }
        Ok(())
    }

    /// The lock this transaction holds on `id`, if any.
    fn held(&self, collection: &str, id: &DocumentId) -> CoreResult<Option<LockRecord>> {
        Ok(self
            .coordinator
            .ledger
            .get(collection, id)?
            .filter(|lock| lock.tx_id == self.id))
    }

    /// Like [`held`](Self::held), for ids `lock_batch` already secured.
    fn own_lock(&self, collection: &str, id: &DocumentId) -> CoreResult<LockRecord> {
        self.held(collection, id)?.ok_or_else(|| {
            CoreError::invalid_transaction(
                self.id,
                format!("lock on {collection}/{id} is no longer held"),
            )
        })
    }

    /// `Updated` if the base collection has `id`, otherwise `New`.
    fn base_op(&self, collection: &str, id: &DocumentId) -> CoreResult<LockOp> {
        Ok(if self.coordinator.store.get(collection, id)?.is_some() {
            LockOp::Updated
        } else {
            LockOp::New
        })
    }

    fn confirm_active(&self, collection: &str, batch: &Batch) -> CoreResult<()> {
        match self.coordinator.registry.ensure_active(self.id) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.abort(collection, batch);
                Err(e)
            }
        }
    }

    /// Undoes what a failed call created.
    ///
    /// Fresh locks are dropped with their staged copies. Copies restaged
    /// under locks held from before are dropped only once those locks are
    /// gone, which happens when the transaction ended concurrently.
    fn abort(&self, collection: &str, batch: &Batch) {
        let c = self.coordinator;
        for id in &batch.fresh {
            let result = c
                .shadow
                .unstage(collection, id)
                .and_then(|()| c.ledger.release(self.id, collection, std::slice::from_ref(id)));
            if let Err(e) = result {
                warn!(tx_id = %self.id, collection, %id, error = %e, "failed to undo staged operation");
            }
        }
        for doc in &batch.restaged {
            let result = match self.held(collection, &doc.id) {
                Ok(Some(_)) => continue,
                Ok(None) => c.shadow.unstage_if(collection, doc).map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(tx_id = %self.id, collection, id = %doc.id, error = %e, "failed to drop stray staged copy");
            }
        }
    }
}

/// What one write call has created so far.
struct Batch {
    /// Locks this call created.
    fresh: Vec<DocumentId>,
    /// Fresh ids not yet handled by the per-document step.
    pending: HashSet<DocumentId>,
    /// Documents staged under locks held before this call.
    restaged: Vec<Document>,
}

impl Batch {
    fn new(fresh: Vec<DocumentId>) -> Self {
        let pending = fresh.iter().cloned().collect();
        Self {
            fresh,
            pending,
            restaged: Vec::new(),
        }
    }

    /// True the first time a freshly locked id comes up.
    fn take_fresh(&mut self, id: &DocumentId) -> bool {
        self.pending.remove(id)
    }
}
