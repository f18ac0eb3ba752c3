//! Multi-document transactions.
//!
//! Transactions provide:
//! - **Atomicity**: every staged effect reaches the base collections, or none
//! - **Isolation**: committed reads; only the owner sees its staged writes
//! - **Recoverability**: an interrupted commit or rollback is finished by
//!   [`TransactionCoordinator::recover`]
//!
//! All state lives in the backing store, so transactions from different
//! processes coordinate through it alone.

mod coordinator;
mod operations;
mod record;
mod recovery;
mod registry;

pub use coordinator::TransactionCoordinator;
pub use operations::Transaction;
pub use record::TransactionRecord;
pub use recovery::{RecoveryFault, RecoveryReport};
pub use registry::TransactionRegistry;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::CoreError;
    use crate::filter::Filter;
    use crate::types::{LockOp, TxState};
    use serde_json::json;
    use shadowtx_storage::{Document, DocumentId, DocumentStore, InMemoryStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Arc<InMemoryStore>, TransactionCoordinator) {
        setup_with(Config::default())
    }

    fn setup_with(config: Config) -> (Arc<InMemoryStore>, TransactionCoordinator) {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = TransactionCoordinator::new(store.clone(), config).unwrap();
        (store, coordinator)
    }

    fn doc(id: &str, v: i64) -> Document {
        Document::new(id, json!({ "v": v }))
    }

    fn seed(store: &InMemoryStore, docs: &[Document]) {
        for d in docs {
            store.put("orders", d).unwrap();
        }
    }

    #[test]
    fn committed_insert_becomes_visible() {
        let (_, c) = setup();
        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("a", 1)]).unwrap();

        assert!(c.read("orders", &"a".into()).unwrap().is_none());
        tx.commit().unwrap();
        assert_eq!(c.read("orders", &"a".into()).unwrap(), Some(doc("a", 1)));
    }

    #[test]
    fn rolled_back_update_leaves_base_untouched() {
        let (store, c) = setup();
        seed(&store, &[doc("b", 1)]);

        let tx = c.begin().unwrap();
        tx.update("orders", &[doc("b", 2)]).unwrap();
        assert_eq!(tx.get("orders", &"b".into()).unwrap(), Some(doc("b", 2)));
        tx.rollback().unwrap();

        assert_eq!(c.read("orders", &"b".into()).unwrap(), Some(doc("b", 1)));
    }

    #[test]
    fn commit_applies_every_operation_kind() {
        let (store, c) = setup();
        seed(&store, &[doc("u", 1), doc("d", 1), doc("keep", 1)]);

        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("n", 1)]).unwrap();
        tx.update("orders", &[doc("u", 2)]).unwrap();
        tx.delete("orders", &["d".into()]).unwrap();
        tx.commit().unwrap();

        let ids: Vec<_> = c
            .find_committed("orders", &Filter::All)
            .unwrap()
            .into_iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, vec!["keep", "n", "u"]);
        assert_eq!(c.read("orders", &"u".into()).unwrap(), Some(doc("u", 2)));

        // Nothing left behind.
        assert!(c.transactions().unwrap().is_empty());
        assert!(c.locks().unwrap().is_empty());
        assert_eq!(store.len("orders.tx"), 0);
    }

    #[test]
    fn reads_see_own_writes_only() {
        let (store, c) = setup();
        seed(&store, &[doc("a", 1), doc("b", 1)]);

        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("c", 1)]).unwrap();
        tx.update("orders", &[doc("a", 5)]).unwrap();
        tx.delete("orders", &["b".into()]).unwrap();

        let mine = tx.find("orders", &Filter::All).unwrap();
        assert_eq!(mine, vec![doc("a", 5), doc("c", 1)]);

        let committed = c.find_committed("orders", &Filter::All).unwrap();
        assert_eq!(committed, vec![doc("a", 1), doc("b", 1)]);

        // Another transaction reads committed state too.
        let other = c.begin().unwrap();
        assert_eq!(other.find("orders", &Filter::All).unwrap(), committed);
    }

    #[test]
    fn find_filters_staged_and_base_alike() {
        let (store, c) = setup();
        seed(&store, &[doc("a", 1), doc("b", 2)]);

        let tx = c.begin().unwrap();
        tx.update("orders", &[doc("b", 1)]).unwrap();
        tx.insert("orders", &[doc("c", 3)]).unwrap();

        let ones = tx.find("orders", &Filter::eq("v", 1)).unwrap();
        assert_eq!(ones, vec![doc("a", 1), doc("b", 1)]);
        let by_id = tx.find("orders", &Filter::ids(["c", "zz"])).unwrap();
        assert_eq!(by_id, vec![doc("c", 3)]);
    }

    #[test]
    fn overlapping_transactions_conflict() {
        let (store, c) = setup();
        seed(&store, &[doc("a", 1)]);

        let t1 = c.begin().unwrap();
        let t2 = c.begin().unwrap();
        t1.update("orders", &[doc("a", 2)]).unwrap();

        let err = t2.update("orders", &[doc("a", 3)]).unwrap_err();
        assert!(matches!(err.root(), CoreError::LockConflict { .. }));
        assert!(err.is_retryable());

        t1.commit().unwrap();
        t2.update("orders", &[doc("a", 3)]).unwrap();
        t2.commit().unwrap();
        assert_eq!(c.read("orders", &"a".into()).unwrap(), Some(doc("a", 3)));
    }

    #[test]
    fn insert_of_existing_id_is_duplicate() {
        let (store, c) = setup();
        seed(&store, &[doc("a", 1)]);

        let tx = c.begin().unwrap();
        let err = tx.insert("orders", &[doc("a", 2)]).unwrap_err();
        assert!(matches!(err.root(), CoreError::DuplicateDocument { .. }));
        // The lock taken for the attempt was released.
        assert!(c.locks().unwrap().is_empty());

        tx.insert("orders", &[doc("b", 1)]).unwrap();
        let err = tx.insert("orders", &[doc("b", 2)]).unwrap_err();
        assert!(matches!(err.root(), CoreError::DuplicateDocument { .. }));
    }

    #[test]
    fn update_of_missing_document_stages_new() {
        let (_, c) = setup();
        let tx = c.begin().unwrap();
        tx.update("orders", &[doc("a", 1)]).unwrap();

        let locks = c.locks_of(tx.id()).unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].op, LockOp::New);
        assert_eq!(locks[0].original, None);

        tx.commit().unwrap();
        assert_eq!(c.read("orders", &"a".into()).unwrap(), Some(doc("a", 1)));
    }

    #[test]
    fn update_captures_original_once() {
        let (store, c) = setup();
        seed(&store, &[doc("a", 1)]);

        let tx = c.begin().unwrap();
        tx.update("orders", &[doc("a", 2)]).unwrap();
        tx.update("orders", &[doc("a", 3)]).unwrap();

        let locks = c.locks_of(tx.id()).unwrap();
        assert_eq!(locks[0].op, LockOp::Updated);
        assert_eq!(locks[0].original, Some(json!({"v": 1})));
        assert_eq!(tx.get("orders", &"a".into()).unwrap(), Some(doc("a", 3)));
    }

    #[test]
    fn insert_then_update_stays_new() {
        let (_, c) = setup();
        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("a", 1)]).unwrap();
        tx.update("orders", &[doc("a", 2)]).unwrap();

        assert_eq!(c.locks_of(tx.id()).unwrap()[0].op, LockOp::New);
        tx.commit().unwrap();
        assert_eq!(c.read("orders", &"a".into()).unwrap(), Some(doc("a", 2)));
    }

    #[test]
    fn deleting_own_insert_forgets_it() {
        let (store, c) = setup();
        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("a", 1)]).unwrap();
        tx.delete("orders", &["a".into()]).unwrap();

        assert!(c.locks_of(tx.id()).unwrap().is_empty());
        assert!(tx.get("orders", &"a".into()).unwrap().is_none());
        assert_eq!(store.len("orders.tx"), 0);

        tx.commit().unwrap();
        assert!(c.read("orders", &"a".into()).unwrap().is_none());
    }

    #[test]
    fn delete_then_reinsert_becomes_update() {
        let (store, c) = setup();
        seed(&store, &[doc("a", 1)]);

        let tx = c.begin().unwrap();
        tx.delete("orders", &["a".into()]).unwrap();
        assert!(tx.get("orders", &"a".into()).unwrap().is_none());
        tx.insert("orders", &[doc("a", 7)]).unwrap();

        let lock = &c.locks_of(tx.id()).unwrap()[0];
        assert_eq!(lock.op, LockOp::Updated);
        assert_eq!(lock.original, Some(json!({"v": 1})));

        tx.commit().unwrap();
        assert_eq!(c.read("orders", &"a".into()).unwrap(), Some(doc("a", 7)));
    }

    #[test]
    fn update_then_delete_removes_on_commit() {
        let (store, c) = setup();
        seed(&store, &[doc("a", 1)]);

        let tx = c.begin().unwrap();
        tx.update("orders", &[doc("a", 2)]).unwrap();
        tx.delete("orders", &["a".into()]).unwrap();
        assert!(tx.find("orders", &Filter::All).unwrap().is_empty());

        tx.commit().unwrap();
        assert!(c.read("orders", &"a".into()).unwrap().is_none());
    }

    #[test]
    fn double_commit_is_rejected() {
        let (_, c) = setup();
        let id = c.start().unwrap();
        c.insert(id, "orders", &[doc("a", 1)]).unwrap();
        c.commit(id).unwrap();

        let err = c.commit(id).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransaction { .. }));
        let err = c.rollback(id).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransaction { .. }));
    }

    #[test]
    fn operations_on_finished_transaction_fail() {
        let (_, c) = setup();
        let tx = c.begin().unwrap();
        let id = tx.id();
        tx.rollback().unwrap();

        let err = c.insert(id, "orders", &[doc("a", 1)]).unwrap_err();
        assert!(matches!(err.root(), CoreError::InvalidTransaction { .. }));
        let err = c.find(id, "orders", &Filter::All).unwrap_err();
        assert!(matches!(err.root(), CoreError::InvalidTransaction { .. }));
        assert!(c.locks().unwrap().is_empty());
    }

    #[test]
    fn reserved_collections_are_rejected() {
        let (_, c) = setup();
        let tx = c.begin().unwrap();
        for name in ["transactions", "transaction_locks", "orders.tx"] {
            let err = tx.insert(name, &[doc("a", 1)]).unwrap_err();
            assert!(matches!(err, CoreError::InvalidOperation { .. }), "{name}");
        }
        let err = tx.insert("bad name", &[doc("a", 1)]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn touch_tracks_collections() {
        let (_, c) = setup();
        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("a", 1)]).unwrap();
        tx.find("users", &Filter::All).unwrap();

        let record = c.transaction_record(tx.id()).unwrap().unwrap();
        assert_eq!(record.state, TxState::Active);
        assert!(record.collections.contains("orders"));
        assert!(record.collections.contains("users"));
    }

    #[test]
    fn commit_fault_on_foreign_write() {
        let (store, c) = setup();
        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("a", 1)]).unwrap();
        // A writer bypassing the transaction layer.
        store.put("orders", &doc("a", 9)).unwrap();

        let err = c.commit(tx.id()).unwrap_err();
        assert!(matches!(err.root(), CoreError::CommitFault { .. }));
        assert_eq!(err.chain().len(), 1);
        assert_eq!(c.read("orders", &"a".into()).unwrap(), Some(doc("a", 9)));

        // The record stays in place and is reported by recovery.
        let record = c.transaction_record(tx.id()).unwrap().unwrap();
        assert_eq!(record.state, TxState::Committing);
        let report = c.recover().unwrap();
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].tx_id, tx.id());
    }

    #[test]
    fn recover_redoes_committing_record() {
        let (store, c) = setup();
        seed(&store, &[doc("u", 1)]);
        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("n", 1)]).unwrap();
        tx.update("orders", &[doc("u", 2)]).unwrap();

        // Crash right after the state change.
        c.registry
            .transition(tx.id(), TxState::Active, TxState::Committing)
            .unwrap();

        let report = c.recover().unwrap();
        assert_eq!(report.redone, 1);
        assert_eq!(c.read("orders", &"n".into()).unwrap(), Some(doc("n", 1)));
        assert_eq!(c.read("orders", &"u".into()).unwrap(), Some(doc("u", 2)));
        assert!(c.transactions().unwrap().is_empty());
        assert!(c.locks().unwrap().is_empty());

        assert!(c.recover().unwrap().is_empty());
    }

    #[test]
    fn redo_twice_matches_redo_once() {
        let (store, c) = setup();
        seed(&store, &[doc("u", 1), doc("d", 1)]);
        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("n", 1)]).unwrap();
        tx.update("orders", &[doc("u", 2)]).unwrap();
        tx.delete("orders", &["d".into()]).unwrap();
        let record = c
            .registry
            .transition(tx.id(), TxState::Active, TxState::Committing)
            .unwrap();

        // Apply every lock without cleaning up, as a crash would leave it.
        for lock in c.locks_of(tx.id()).unwrap() {
            c.apply(&lock).unwrap();
        }
        let once = c.find_committed("orders", &Filter::All).unwrap();

        c.redo(&record).unwrap();
        assert_eq!(c.find_committed("orders", &Filter::All).unwrap(), once);
        assert_eq!(once, vec![doc("n", 1), doc("u", 2)]);
    }

    #[test]
    fn recover_rolls_back_stale_active() {
        let (store, c) = setup_with(Config::new().stale_after(Duration::ZERO));
        seed(&store, &[doc("a", 1)]);
        let tx = c.begin().unwrap();
        tx.update("orders", &[doc("a", 2)]).unwrap();

        let report = c.recover().unwrap();
        assert_eq!(report.rolled_back, 1);
        assert_eq!(c.read("orders", &"a".into()).unwrap(), Some(doc("a", 1)));
        assert!(c.locks().unwrap().is_empty());
        assert_eq!(store.len("orders.tx"), 0);
    }

    #[test]
    fn recover_leaves_fresh_active_alone() {
        let (_, c) = setup();
        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("a", 1)]).unwrap();

        assert!(c.recover().unwrap().is_empty());
        tx.commit().unwrap();
    }

    #[test]
    fn recover_finishes_rolling_back() {
        let (store, c) = setup();
        seed(&store, &[doc("a", 1)]);
        let tx = c.begin().unwrap();
        tx.delete("orders", &["a".into()]).unwrap();
        c.registry
            .transition(tx.id(), TxState::Active, TxState::RollingBack)
            .unwrap();

        let report = c.recover().unwrap();
        assert_eq!(report.rolled_back, 1);
        assert_eq!(c.read("orders", &"a".into()).unwrap(), Some(doc("a", 1)));
        assert!(c.transactions().unwrap().is_empty());
    }

    #[test]
    fn recover_sweeps_orphaned_locks() {
        let (store, c) = setup();
        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("a", 1)]).unwrap();
        // Record lost, lock and staged copy left behind.
        c.registry.remove(tx.id()).unwrap();

        let report = c.recover().unwrap();
        assert_eq!(report.orphans, 1);
        assert!(c.locks().unwrap().is_empty());
        assert_eq!(store.len("orders.tx"), 0);
        assert!(c.read("orders", &"a".into()).unwrap().is_none());
    }

    #[test]
    fn recover_drops_unlocked_staged_copies() {
        let (store, c) = setup();
        let tx = c.begin().unwrap();
        tx.update("orders", &[doc("a", 1)]).unwrap();
        // A write that lost the race with its own transaction's end.
        store.put("orders.tx", &doc("b", 7)).unwrap();

        let report = c.recover().unwrap();
        assert_eq!(report.orphans, 1);
        assert!(store.get("orders.tx", &"b".into()).unwrap().is_none());
        // The live transaction keeps its staged copy.
        assert_eq!(tx.get("orders", &"a".into()).unwrap(), Some(doc("a", 1)));
        assert!(c.recover().unwrap().is_empty());
        tx.commit().unwrap();
    }

    #[test]
    fn conflicting_batch_can_be_retried() {
        let (store, c) = setup();
        let winner = c.begin().unwrap();
        winner.insert("orders", &[doc("b", 1)]).unwrap();

        let loser = c.begin().unwrap();
        let err = loser
            .insert("orders", &[doc("a", 2), doc("b", 2)])
            .unwrap_err();
        assert!(matches!(err.root(), CoreError::LockConflict { .. }));
        assert!(c.locks_of(loser.id()).unwrap().is_empty());
        assert!(store.get("orders.tx", &"a".into()).unwrap().is_none());

        winner.rollback().unwrap();
        loser.insert("orders", &[doc("a", 2), doc("b", 2)]).unwrap();
        loser.commit().unwrap();
        assert_eq!(
            c.find_committed("orders", &Filter::All).unwrap(),
            vec![doc("a", 2), doc("b", 2)]
        );
    }

    #[test]
    fn conflicting_update_and_delete_batches_can_be_retried() {
        let (store, c) = setup();
        seed(&store, &[doc("a", 1), doc("b", 1)]);
        let winner = c.begin().unwrap();
        winner.update("orders", &[doc("b", 5)]).unwrap();

        let loser = c.begin().unwrap();
        let err = loser
            .update("orders", &[doc("a", 2), doc("b", 2)])
            .unwrap_err();
        assert!(err.is_retryable());
        let err = loser.delete("orders", &["a".into(), "b".into()]).unwrap_err();
        assert!(err.is_retryable());
        assert!(c.locks_of(loser.id()).unwrap().is_empty());

        winner.rollback().unwrap();
        loser.update("orders", &[doc("a", 2), doc("b", 2)]).unwrap();
        loser.delete("orders", &["a".into()]).unwrap();
        loser.commit().unwrap();
        assert_eq!(
            c.find_committed("orders", &Filter::All).unwrap(),
            vec![doc("b", 2)]
        );
    }

    #[test]
    fn failed_batch_undoes_its_earlier_documents() {
        let (store, c) = setup();
        seed(&store, &[doc("b", 1)]);
        let tx = c.begin().unwrap();
        tx.update("orders", &[doc("c", 1)]).unwrap();

        let err = tx
            .insert("orders", &[doc("a", 1), doc("b", 2)])
            .unwrap_err();
        assert!(matches!(err.root(), CoreError::DuplicateDocument { .. }));
        // Only the lock taken by the earlier call survives.
        let held: Vec<DocumentId> = c
            .locks_of(tx.id())
            .unwrap()
            .into_iter()
            .map(|l| l.document_id)
            .collect();
        assert_eq!(held, vec![DocumentId::new("c")]);
        assert!(store.get("orders.tx", &"a".into()).unwrap().is_none());

        let err = tx.insert("orders", &[doc("d", 1), doc("d", 2)]).unwrap_err();
        assert!(matches!(err.root(), CoreError::DuplicateDocument { .. }));
        assert!(tx.get("orders", &"d".into()).unwrap().is_none());

        tx.insert("orders", &[doc("a", 1)]).unwrap();
        tx.commit().unwrap();
        assert_eq!(
            c.find_committed("orders", &Filter::All).unwrap(),
            vec![doc("a", 1), doc("b", 1), doc("c", 1)]
        );
    }

    #[test]
    fn deleting_the_same_insert_twice_in_one_call() {
        let (_, c) = setup();
        let tx = c.begin().unwrap();
        tx.insert("orders", &[doc("a", 1)]).unwrap();
        tx.delete("orders", &["a".into(), "a".into()]).unwrap();

        assert!(tx.get("orders", &"a".into()).unwrap().is_none());
        tx.commit().unwrap();
        assert!(c.read("orders", &"a".into()).unwrap().is_none());
        assert!(c.locks().unwrap().is_empty());
    }

    #[test]
    fn bad_configuration_is_rejected() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
        let same = Config::new().lock_collection("transactions");
        assert!(TransactionCoordinator::new(store.clone(), same).is_err());
        let empty = Config::new().staging_suffix("");
        assert!(TransactionCoordinator::new(store.clone(), empty).is_err());
        let bad = Config::new().transaction_collection("tx log");
        assert!(TransactionCoordinator::new(store, bad).is_err());
    }

    #[test]
    fn coordinators_share_state_through_the_store() {
        let store = Arc::new(InMemoryStore::new());
        let c1 = TransactionCoordinator::new(store.clone(), Config::default()).unwrap();
        let c2 = TransactionCoordinator::new(store, Config::default()).unwrap();

        let id = c1.start().unwrap();
        c1.insert(id, "orders", &[doc("a", 1)]).unwrap();
        let err = c2.begin().unwrap().insert("orders", &[doc("a", 2)]).unwrap_err();
        assert!(matches!(err.root(), CoreError::LockConflict { .. }));

        // The second process finishes the first one's transaction.
        c2.transaction(id).commit().unwrap();
        assert_eq!(c1.read("orders", &DocumentId::from("a")).unwrap(), Some(doc("a", 1)));
    }
}
