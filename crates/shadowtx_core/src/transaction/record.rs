//! Persisted transaction records.

use crate::error::CoreResult;
use crate::types::{Timestamp, TransactionId, TxState};
use serde::{Deserialize, Serialize};
use shadowtx_storage::{Document, DocumentId};
use std::collections::BTreeSet;

/// One transaction's entry in the transaction collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction id; also the record's document id.
    pub id: TransactionId,
    /// Lifecycle state.
    pub state: TxState,
    /// When the transaction started.
    pub started_at: Timestamp,
    /// Last time an operation ran under this transaction.
    pub last_touched_at: Timestamp,
    /// Base collections touched so far. Only ever grows.
    pub collections: BTreeSet<String>,
}

impl TransactionRecord {
    /// A fresh `Active` record.
    #[must_use]
    pub fn new(id: TransactionId, now: Timestamp) -> Self {
        Self {
            id,
            state: TxState::Active,
            started_at: now,
            last_touched_at: now,
            collections: BTreeSet::new(),
        }
    }

    /// Document id of the record for `id`.
    #[must_use]
    pub fn document_id(id: TransactionId) -> DocumentId {
        DocumentId::new(id.to_string())
    }

    /// Milliseconds since the last touch, as of `now`.
    #[must_use]
    pub fn idle_for(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.last_touched_at)
    }

    pub(crate) fn to_document(&self) -> CoreResult<Document> {
        Ok(Document::new(
            Self::document_id(self.id),
            serde_json::to_value(self)?,
        ))
    }

    pub(crate) fn from_document(doc: &Document) -> CoreResult<Self> {
        Ok(serde_json::from_value(doc.body.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_active() {
        let id = TransactionId::new();
        let record = TransactionRecord::new(id, 1_000);
        assert_eq!(record.state, TxState::Active);
        assert_eq!(record.started_at, record.last_touched_at);
        assert!(record.collections.is_empty());
        assert_eq!(record.idle_for(1_500), 500);
        assert_eq!(record.idle_for(10), 0);
    }

    #[test]
    fn document_form_is_keyed_by_id() {
        let mut record = TransactionRecord::new(TransactionId::new(), 7);
        record.collections.insert("orders".to_string());

        let doc = record.to_document().unwrap();
        assert_eq!(doc.id.as_str(), record.id.to_string());
        assert_eq!(doc.body["state"], "active");
        assert_eq!(TransactionRecord::from_document(&doc).unwrap(), record);
    }
}
