//! Stress tests for shadowtx.
//!
//! These helpers drive one coordinator from several threads at once.

use serde_json::json;
use shadowtx_core::{CoreResult, TransactionCoordinator};
use shadowtx_storage::Document;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Transactions committed.
    pub committed: usize,
    /// Attempts that hit a lock conflict and were retried.
    pub conflicts: usize,
    /// Transactions given up on.
    pub failed: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Commits per second.
    pub fn commits_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.committed as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Committed: {}", self.committed);
        println!("Conflicts: {}", self.conflicts);
        println!("Failed: {}", self.failed);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} commits/sec", self.commits_per_second());
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Transactions per thread.
    pub transactions: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Attempts per transaction before giving up.
    pub max_attempts: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            transactions: 50,
            threads: 4,
            max_attempts: 1_000,
        }
    }
}

/// Races `threads` transactions for a lock on the same document.
///
/// Every thread tries to update `collection/id`, then all wait for each
/// other before rolling back, so no winner lets go early. Returns the
/// number of threads whose update went through, which must be one.
pub fn lock_race(
    coordinator: &TransactionCoordinator,
    collection: &str,
    id: &str,
    threads: usize,
) -> CoreResult<usize> {
    let barrier = Barrier::new(threads);
    let winners = AtomicUsize::new(0);

    thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|n| {
                let barrier = &barrier;
                let winners = &winners;
                s.spawn(move || -> CoreResult<()> {
                    let tx = coordinator.begin()?;
                    let doc = Document::new(id, json!({ "winner": n }));
                    let won = tx.update(collection, &[doc]).is_ok();
                    if won {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    barrier.wait();
                    tx.rollback()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("stress thread panicked"))
            .collect::<CoreResult<Vec<()>>>()
    })?;

    Ok(winners.load(Ordering::SeqCst))
}

/// Runs transactions from several threads that each insert a private
/// document and overwrite the shared `hot` document.
///
/// Lock conflicts roll the attempt back and retry it. Thread `t`'s
/// documents are named `t{t}-{i}` and carry `{"v": i}`.
pub fn contended_writes(
    coordinator: &TransactionCoordinator,
    collection: &str,
    config: &StressConfig,
) -> StressTestResult {
    let committed = AtomicUsize::new(0);
    let conflicts = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|s| {
        for t in 0..config.threads {
            let (committed, conflicts, failed) = (&committed, &conflicts, &failed);
            s.spawn(move || {
                for i in 0..config.transactions {
                    let private = Document::new(format!("t{t}-{i}"), json!({ "v": i }));
                    let hot = Document::new("hot", json!({ "thread": t, "v": i }));
                    let mut done = false;
                    for _ in 0..config.max_attempts {
                        match write_pair(coordinator, collection, &private, &hot) {
                            Ok(()) => {
                                done = true;
                                break;
                            }
                            Err(e) if e.is_retryable() => {
                                conflicts.fetch_add(1, Ordering::Relaxed);
                                thread::yield_now();
                            }
                            Err(_) => break,
                        }
                    }
                    if done {
                        committed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    StressTestResult {
        committed: committed.into_inner(),
        conflicts: conflicts.into_inner(),
        failed: failed.into_inner(),
        duration: start.elapsed(),
    }
}

fn write_pair(
    coordinator: &TransactionCoordinator,
    collection: &str,
    private: &Document,
    hot: &Document,
) -> CoreResult<()> {
    let tx = coordinator.begin()?;
    let staged = tx
        .update(collection, std::slice::from_ref(hot))
        .and_then(|()| tx.update(collection, std::slice::from_ref(private)));
    match staged {
        Ok(()) => tx.commit(),
        Err(e) => {
            tx.rollback()?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;

    #[test]
    fn single_thread_race_always_wins() {
        let t = TestStore::new();
        assert_eq!(lock_race(&t, "race", "x", 1).unwrap(), 1);
        t.assert_clean();
    }

    #[test]
    fn summary_handles_zero_duration() {
        let result = StressTestResult {
            committed: 3,
            conflicts: 0,
            failed: 0,
            duration: Duration::ZERO,
        };
        assert_eq!(result.commits_per_second(), 0.0);
    }
}
