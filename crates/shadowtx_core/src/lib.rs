//! # shadowtx Core
//!
//! Multi-document transactions over a document store that is atomic only
//! one document at a time.
//!
//! This crate provides:
//! - A lock ledger: one persistent lock document per locked document
//! - A shadow staging area holding each transaction's uncommitted writes
//! - A transaction registry tracking every transaction's lifecycle
//! - Transactional insert, update, delete and find with committed-read
//!   isolation and read-your-own-writes
//! - Commit by idempotent redo, rollback, and crash recovery
//!
//! Writes stage the new document version under a lock; commit replays
//! the staged versions into the base collections. Readers outside the
//! transaction only ever see base collections.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod filter;
mod ledger;
mod staging;
mod transaction;
mod types;

pub use config::Config;
pub use error::{CoreError, CoreResult, ErrorContext};
pub use filter::Filter;
pub use ledger::{lock_id, LockLedger, LockRecord};
pub use staging::ShadowArea;
pub use transaction::{
    RecoveryFault, RecoveryReport, Transaction, TransactionCoordinator, TransactionRecord,
    TransactionRegistry,
};
pub use types::{now_millis, LockOp, Timestamp, TransactionId, TxState};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
