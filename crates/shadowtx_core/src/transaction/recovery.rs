//! Crash recovery.
//!
//! Finishes whatever a crashed process left behind:
//!
//! 1. `Committing` records are redone. Every commit step is idempotent, so
//!    repeating the parts that already ran is harmless.
//! 2. `RollingBack` records have their cleanup finished.
//! 3. `Active` records idle for longer than `stale_after` are rolled back.
//! 4. Locks whose record no longer exists are released and their staged
//!    copies dropped.
//! 5. Staged copies with no lock on their id are dropped.
//!
//! Recovery can itself crash at any point and simply be run again.

use super::coordinator::TransactionCoordinator;
use crate::error::{CoreError, CoreResult};
use crate::filter::Filter;
use crate::types::{now_millis, TransactionId, TxState};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// What [`TransactionCoordinator::recover`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Interrupted commits that were completed.
    pub redone: usize,
    /// Transactions that were rolled back, interrupted or stale.
    pub rolled_back: usize,
    /// Orphaned locks released plus lockless staged copies dropped.
    pub orphans: usize,
    /// Commits that could not be completed and were left in place.
    pub faults: Vec<RecoveryFault>,
}

impl RecoveryReport {
    /// True if recovery found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.redone == 0 && self.rolled_back == 0 && self.orphans == 0 && self.faults.is_empty()
    }
}

/// A `Committing` transaction whose redo hit a commit fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryFault {
    /// The stuck transaction.
    pub tx_id: TransactionId,
    /// The fault, with its context chain.
    pub message: String,
}

impl TransactionCoordinator {
    /// Completes or discards transactions interrupted by a crash.
    ///
    /// Intended to run at process start, before new work touches the
    /// affected collections.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails. Commit faults do not abort
    /// recovery; they are listed in the report.
    pub fn recover(&self) -> CoreResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let stale_ms = u64::try_from(self.config.stale_after.as_millis()).unwrap_or(u64::MAX);
        let now = now_millis();

        for record in self.registry.list()? {
            match record.state {
                TxState::Committing => match self.redo(&record) {
                    Ok(_) => {
                        debug!(tx_id = %record.id, "interrupted commit redone");
                        report.redone += 1;
                    }
                    Err(e) if matches!(e.root(), CoreError::CommitFault { .. }) => {
                        warn!(tx_id = %record.id, error = %e, "commit cannot be completed");
                        report.faults.push(RecoveryFault {
                            tx_id: record.id,
                            message: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                },
                TxState::RollingBack => {
                    self.discard(&record)?;
                    debug!(tx_id = %record.id, "interrupted rollback finished");
                    report.rolled_back += 1;
                }
                TxState::Active if record.idle_for(now) >= stale_ms => {
                    let claimed = self.registry.transition_if(
                        record.id,
                        TxState::Active,
                        TxState::RollingBack,
                        |current| current.idle_for(now_millis()) >= stale_ms,
                    );
                    match claimed {
                        Ok(record) => {
                            self.discard(&record)?;
                            info!(tx_id = %record.id, "stale transaction rolled back");
                            report.rolled_back += 1;
                        }
                        // Touched, committed or rolled back since we listed it.
                        Err(e) if matches!(e.root(), CoreError::InvalidTransaction { .. }) => {
                            debug!(tx_id = %record.id, "transaction no longer stale");
                        }
                        Err(e) => return Err(e),
                    }
                }
                TxState::Active => {}
            }
        }

        report.orphans = self.sweep_orphans()?;

        if report.is_empty() {
            debug!("recovery found nothing to do");
        } else {
            info!(
                redone = report.redone,
                rolled_back = report.rolled_back,
                orphans = report.orphans,
                faults = report.faults.len(),
                "recovery complete"
            );
        }
        Ok(report)
    }

    /// Releases locks whose transaction record no longer exists.
    ///
    /// A record is written before its transaction's first lock and removed
    /// after its last release, so such locks belong to transactions that
    /// are over.
    fn sweep_orphans(&self) -> CoreResult<usize> {
        let live: HashSet<TransactionId> =
            self.registry.list()?.into_iter().map(|r| r.id).collect();
        let mut swept = 0;

        for lock in self.ledger.all()? {
            if live.contains(&lock.tx_id) || self.registry.get(lock.tx_id)?.is_some() {
                continue;
            }
            // Only drop the staged copy while the orphan still owns the id.
            if !self.ledger.is_current(&lock)? {
                continue;
            }
            self.shadow.unstage(&lock.collection, &lock.document_id)?;
            if self.ledger.release_record(&lock)? {
                warn!(
                    tx_id = %lock.tx_id,
                    collection = %lock.collection,
                    id = %lock.document_id,
                    "released orphaned lock"
                );
                swept += 1;
            }
        }
        Ok(swept + self.sweep_unlocked_staging()?)
    }

    /// Drops staged copies no lock covers.
    ///
    /// Staging only happens under a lock and every release unstages
    /// first, so such a copy was left by a write that raced the end of its
    /// own transaction.
    fn sweep_unlocked_staging(&self) -> CoreResult<usize> {
        let mut swept = 0;
        for collection in self.shadow.staged_collections()? {
            for doc in self.shadow.query_staged(&collection, &Filter::All)? {
                if self.ledger.get(&collection, &doc.id)?.is_some() {
                    continue;
                }
                if self.shadow.unstage_if(&collection, &doc)? {
                    warn!(collection = %collection, id = %doc.id, "dropped unlocked staged copy");
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }
}
