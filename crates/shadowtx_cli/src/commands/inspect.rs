//! Inspect command implementation.

use super::{parse_tx, CommandResult, Format};
use serde::Serialize;
use shadowtx_core::{LockRecord, TransactionCoordinator, TransactionRecord};
use shadowtx_storage::{DocumentStore, FileStore};
use std::path::Path;
use tracing::info;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Every non-empty collection.
    pub collections: Vec<CollectionInfo>,
    /// Transaction records.
    pub transactions: Vec<TransactionRecord>,
    /// Lock records.
    pub locks: Vec<LockRecord>,
}

/// One collection of the store.
#[derive(Debug, Serialize)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// `base`, `shadow` or `internal`.
    pub kind: &'static str,
    /// Number of documents.
    pub documents: usize,
}

/// Runs the inspect command.
pub fn run(
    coordinator: &TransactionCoordinator,
    path: &Path,
    tx: Option<&str>,
    format: Format,
) -> CommandResult {
    info!("Inspecting store at {:?}", path);
    let store = FileStore::open(path)?;
    let config = coordinator.config();

    let mut collections = Vec::new();
    for name in store.collections()? {
        let kind = if name == config.transaction_collection || name == config.lock_collection {
            "internal"
        } else if config.is_reserved(&name) {
            "shadow"
        } else {
            "base"
        };
        collections.push(CollectionInfo {
            documents: store.scan(&name)?.len(),
            name,
            kind,
        });
    }

    let (transactions, locks) = match tx {
        Some(tx) => {
            let id = parse_tx(tx)?;
            let record = coordinator
                .transaction_record(id)?
                .ok_or_else(|| format!("No transaction {id}"))?;
            (vec![record], coordinator.locks_of(id)?)
        }
        None => (coordinator.transactions()?, coordinator.locks()?),
    };

    let result = InspectResult {
        path: path.display().to_string(),
        collections,
        transactions,
        locks,
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!();

    println!("Collections:");
    if result.collections.is_empty() {
        println!("  (none)");
    }
    for c in &result.collections {
        println!("  {:<32} {:<8} {:>8} docs", c.name, c.kind, c.documents);
    }
    println!();

    println!("Transactions: {}", result.transactions.len());
    for t in &result.transactions {
        let collections: Vec<&str> = t.collections.iter().map(String::as_str).collect();
        println!(
            "  {}  {:<12} started={} touched={} [{}]",
            t.id,
            t.state.to_string(),
            t.started_at,
            t.last_touched_at,
            collections.join(", ")
        );
    }
    println!();

    println!("Locks: {}", result.locks.len());
    for l in &result.locks {
        println!(
            "  {}/{}  {:<8} tx={}",
            l.collection,
            l.document_id,
            l.op.to_string(),
            l.tx_id
        );
    }
}
