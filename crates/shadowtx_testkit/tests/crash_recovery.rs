//! Crash-at-every-write tests.
//!
//! Each workload is rerun once per store write, crashing right before that
//! write. After recovery the base collections must hold either the state
//! before the workload or the state after it, and nothing else.

use serde_json::json;
use shadowtx_core::{CoreResult, TransactionCoordinator};
use shadowtx_storage::{Document, InMemoryStore};
use shadowtx_testkit::prelude::*;

fn seed_orders(store: &InMemoryStore) {
    seed(store, "orders", &[doc("a", 1), doc("b", 2), doc("c", 3)]);
    seed(store, "audit", &[doc("x", 0)]);
}

fn before() -> (Vec<Document>, Vec<Document>) {
    (vec![doc("a", 1), doc("b", 2), doc("c", 3)], vec![doc("x", 0)])
}

fn after() -> (Vec<Document>, Vec<Document>) {
    (
        vec![doc("a", 10), doc("c", 3), doc("d", 4)],
        vec![doc("x", 1), doc("y", 9)],
    )
}

fn mixed_commit(c: &TransactionCoordinator) -> CoreResult<()> {
    let tx = c.begin()?;
    tx.update("orders", &[doc("a", 10)])?;
    tx.delete("orders", &["b".into()])?;
    tx.insert("orders", &[doc("d", 4)])?;
    tx.update("audit", &[doc("x", 1)])?;
    tx.insert("audit", &[doc("y", 9)])?;
    tx.commit()
}

fn staged_rollback(c: &TransactionCoordinator) -> CoreResult<()> {
    let tx = c.begin()?;
    tx.update("orders", &[doc("a", 10)])?;
    tx.delete("orders", &["c".into()])?;
    tx.insert("audit", &[doc("y", 9)])?;
    tx.rollback()
}

fn state(store: &InMemoryStore) -> (Vec<Document>, Vec<Document>) {
    (snapshot(store, "orders"), snapshot(store, "audit"))
}

#[test]
fn commit_is_atomic_at_every_crash_point() {
    let total = writes_needed(&seed_orders, &mixed_commit);
    assert!(total > 10, "workload should need many writes, got {total}");

    let mut saw_before = false;
    let mut saw_after = false;
    for n in 0..total {
        let run = crash_at(n, &seed_orders, &mixed_commit);
        assert!(run.crashed, "crash point {n} was never reached");
        assert!(run.outcome.is_err());

        let c = run.restart();
        let report = c.recover().unwrap();
        assert!(report.faults.is_empty(), "crash at {n}: {:?}", report.faults);

        let now = state(&run.store);
        if now == before() {
            saw_before = true;
        } else if now == after() {
            saw_after = true;
        } else {
            panic!("crash at {n} left a partial commit: {now:?}");
        }
        assert_clean(&*run.store, c.config());
    }
    assert!(saw_before && saw_after);
}

#[test]
fn rollback_leaves_base_untouched_at_every_crash_point() {
    let total = writes_needed(&seed_orders, &staged_rollback);
    for n in 0..total {
        let run = crash_at(n, &seed_orders, &staged_rollback);
        assert!(run.crashed);

        let c = run.restart();
        c.recover().unwrap();
        assert_eq!(state(&run.store), before(), "crash at {n}");
        assert_clean(&*run.store, c.config());
    }
}

#[test]
fn recovery_is_idempotent() {
    let total = writes_needed(&seed_orders, &mixed_commit);
    for n in 0..total {
        let run = crash_at(n, &seed_orders, &mixed_commit);
        let c = run.restart();
        c.recover().unwrap();
        let settled = state(&run.store);

        let again = c.recover().unwrap();
        assert!(again.is_empty(), "crash at {n}: second pass did {again:?}");
        assert_eq!(state(&run.store), settled);
    }
}

#[test]
fn store_is_usable_after_recovery() {
    let total = writes_needed(&seed_orders, &mixed_commit);
    let run = crash_at(total / 2, &seed_orders, &mixed_commit);
    let c = run.restart();
    c.recover().unwrap();

    let tx = c.begin().unwrap();
    tx.update("orders", &[Document::new("a", json!({"v": 99}))])
        .unwrap();
    tx.commit().unwrap();
    assert_eq!(
        c.read("orders", &"a".into()).unwrap(),
        Some(Document::new("a", json!({"v": 99})))
    );
    assert_clean(&*run.store, c.config());
}

#[test]
fn recovery_without_crash_finds_nothing() {
    let total = writes_needed(&seed_orders, &mixed_commit);
    let run = crash_at(total, &seed_orders, &mixed_commit);
    assert!(!run.crashed);
    assert!(run.outcome.is_ok());

    let report = run.restart().recover().unwrap();
    assert!(report.is_empty());
    assert_eq!(state(&run.store), after());
}
