//! Property-based test generators using proptest.
//!
//! Ids are drawn from a small pool so that generated operations collide
//! often: inserts over live documents, deletes of fresh inserts, updates of
//! deleted ids and so on.

use proptest::prelude::*;
use serde_json::{json, Value};
use shadowtx_core::{CoreError, CoreResult, Transaction};
use shadowtx_storage::{Document, DocumentId};
use std::collections::BTreeMap;

/// One transactional operation on a single document.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Insert a new document.
    Insert(Document),
    /// Replace (or create) a document.
    Update(Document),
    /// Delete a document.
    Delete(DocumentId),
}

/// Expected contents of one collection, by id.
pub type Model = BTreeMap<DocumentId, Value>;

/// Strategy for ids from a pool of eight.
pub fn document_id_strategy() -> impl Strategy<Value = DocumentId> {
    (0u8..8).prop_map(|n| DocumentId::new(format!("d{n}")))
}

/// Strategy for small document bodies.
pub fn body_strategy() -> impl Strategy<Value = Value> {
    (0i64..100, prop::option::of("[a-z]{1,6}")).prop_map(|(v, tag)| match tag {
        Some(tag) => json!({ "v": v, "tag": tag }),
        None => json!({ "v": v }),
    })
}

/// Strategy for documents with pooled ids.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    (document_id_strategy(), body_strategy()).prop_map(|(id, body)| Document::new(id, body))
}

/// Strategy for a single operation.
pub fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        document_strategy().prop_map(Op::Insert),
        document_strategy().prop_map(Op::Update),
        document_id_strategy().prop_map(Op::Delete),
    ]
}

/// Strategy for an operation sequence of up to `max` steps.
pub fn ops_strategy(max: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 0..=max)
}

/// Strategy for the committed state a transaction starts from.
pub fn base_strategy() -> impl Strategy<Value = Vec<Document>> {
    prop::collection::btree_map(document_id_strategy(), body_strategy(), 0..6)
        .prop_map(|docs| docs.into_iter().map(|(id, body)| Document::new(id, body)).collect())
}

/// Builds the model of a base collection.
pub fn model_of(docs: &[Document]) -> Model {
    docs.iter().map(|d| (d.id.clone(), d.body.clone())).collect()
}

/// Applies `op` to `model` the way a transaction's own view changes.
///
/// Returns `false` for an insert over a live id, which the transaction
/// rejects without any effect.
pub fn apply_to_model(model: &mut Model, op: &Op) -> bool {
    match op {
        Op::Insert(doc) => {
            if model.contains_key(&doc.id) {
                return false;
            }
            model.insert(doc.id.clone(), doc.body.clone());
        }
        Op::Update(doc) => {
            model.insert(doc.id.clone(), doc.body.clone());
        }
        Op::Delete(id) => {
            model.remove(id);
        }
    }
    true
}

/// Runs `op` in `tx` against `collection`.
///
/// # Errors
///
/// Whatever the transaction returns.
pub fn run_op(tx: &Transaction<'_>, collection: &str, op: &Op) -> CoreResult<()> {
    match op {
        Op::Insert(doc) => tx.insert(collection, std::slice::from_ref(doc)),
        Op::Update(doc) => tx.update(collection, std::slice::from_ref(doc)),
        Op::Delete(id) => tx.delete(collection, std::slice::from_ref(id)),
    }
}

/// True if `err` is the duplicate-insert rejection.
pub fn is_duplicate(err: &CoreError) -> bool {
    matches!(err.root(), CoreError::DuplicateDocument { .. })
}

/// Turns a model into the documents a scan would return.
pub fn documents_of(model: &Model) -> Vec<Document> {
    model
        .iter()
        .map(|(id, body)| Document::new(id.clone(), body.clone()))
        .collect()
}
