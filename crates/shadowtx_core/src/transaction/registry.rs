//! Transaction registry.
//!
//! Records live in the transaction collection, one document per
//! transaction. Every change is a read-modify-`replace_if` loop so that
//! concurrent touches and state transitions never lose each other's
//! updates.

use super::record::TransactionRecord;
use crate::error::{CoreError, CoreResult};
use crate::types::{now_millis, TransactionId, TxState};
use shadowtx_storage::{Document, DocumentStore};
use std::sync::Arc;
use tracing::debug;

/// Creates, updates and removes transaction records.
pub struct TransactionRegistry {
    store: Arc<dyn DocumentStore>,
    collection: String,
    max_retries: u32,
}

impl TransactionRegistry {
    /// Creates a registry over `collection` in `store`.
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>, max_retries: u32) -> Self {
        Self {
            store,
            collection: collection.into(),
            max_retries,
        }
    }

    /// Creates a new `Active` record under a fresh id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn create(&self) -> CoreResult<TransactionRecord> {
        loop {
            let record = TransactionRecord::new(TransactionId::new(), now_millis());
            if self.store.insert(&self.collection, &record.to_document()?)? {
                debug!(tx_id = %record.id, "transaction record created");
                return Ok(record);
            }
        }
    }

    /// Returns a transaction's record, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record is malformed.
    pub fn get(&self, tx_id: TransactionId) -> CoreResult<Option<TransactionRecord>> {
        Ok(self.get_raw(tx_id)?.map(|(_, record)| record))
    }

    fn get_raw(&self, tx_id: TransactionId) -> CoreResult<Option<(Document, TransactionRecord)>> {
        match self
            .store
            .get(&self.collection, &TransactionRecord::document_id(tx_id))?
        {
            Some(doc) => {
                let record = TransactionRecord::from_document(&doc)?;
                Ok(Some((doc, record)))
            }
            None => Ok(None),
        }
    }

    /// Returns the record if the transaction exists and is `Active`.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransaction`] if it is missing or not active.
    pub fn ensure_active(&self, tx_id: TransactionId) -> CoreResult<TransactionRecord> {
        match self.get(tx_id)? {
            Some(record) if record.state == TxState::Active => Ok(record),
            Some(record) => Err(CoreError::invalid_transaction(
                tx_id,
                format!("transaction is {}", record.state),
            )),
            None => Err(CoreError::invalid_transaction(tx_id, "transaction not found")),
        }
    }

    /// Refreshes `last_touched_at` and adds `collection` to the touched set.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransaction`] if the transaction is missing or
    /// not active.
    pub fn touch(&self, tx_id: TransactionId, collection: &str) -> CoreResult<TransactionRecord> {
        self.update(tx_id, |record| {
            if record.state != TxState::Active {
                return Err(CoreError::invalid_transaction(
                    tx_id,
                    format!("transaction is {}", record.state),
                ));
            }
            record.last_touched_at = record.last_touched_at.max(now_millis());
            record.collections.insert(collection.to_string());
            Ok(())
        })
    }

    /// Moves a transaction from `from` to `to`.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransaction`] if the transaction is missing or
    /// not in state `from`.
    pub fn transition(
        &self,
        tx_id: TransactionId,
        from: TxState,
        to: TxState,
    ) -> CoreResult<TransactionRecord> {
        self.transition_if(tx_id, from, to, |_| true)
    }

    /// Like [`transition`](Self::transition), but only while `guard` holds
    /// for the current record. The guard is re-checked on every retry.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransaction`] if the transaction is missing, not
    /// in state `from`, or rejected by `guard`.
    pub fn transition_if(
        &self,
        tx_id: TransactionId,
        from: TxState,
        to: TxState,
        guard: impl Fn(&TransactionRecord) -> bool,
    ) -> CoreResult<TransactionRecord> {
        let record = self.update(tx_id, |record| {
            if record.state != from {
                return Err(CoreError::invalid_transaction(
                    tx_id,
                    format!("transaction is {}, expected {from}", record.state),
                ));
            }
            if !guard(&*record) {
                return Err(CoreError::invalid_transaction(
                    tx_id,
                    format!("transaction changed before moving to {to}"),
                ));
            }
            record.state = to;
            Ok(())
        })?;
        debug!(%tx_id, %from, %to, "transaction state changed");
        Ok(record)
    }

    fn update(
        &self,
        tx_id: TransactionId,
        mut change: impl FnMut(&mut TransactionRecord) -> CoreResult<()>,
    ) -> CoreResult<TransactionRecord> {
        for _ in 0..=self.max_retries {
            let (doc, mut record) = self
                .get_raw(tx_id)?
                .ok_or_else(|| CoreError::invalid_transaction(tx_id, "transaction not found"))?;
            change(&mut record)?;
            if self
                .store
                .replace_if(&self.collection, &doc, &record.to_document()?)?
            {
                return Ok(record);
            }
        }
        Err(CoreError::invalid_operation(format!(
            "transaction record {tx_id} kept changing"
        )))
    }

    /// Deletes a transaction's record. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn remove(&self, tx_id: TransactionId) -> CoreResult<bool> {
        Ok(self
            .store
            .remove(&self.collection, &TransactionRecord::document_id(tx_id))?)
    }

    /// Returns every transaction record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a record is malformed.
    pub fn list(&self) -> CoreResult<Vec<TransactionRecord>> {
        self.store
            .scan(&self.collection)?
            .iter()
            .map(TransactionRecord::from_document)
            .collect()
    }
}

impl std::fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}
