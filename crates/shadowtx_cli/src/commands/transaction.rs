//! Transaction lifecycle commands.

use super::{parse_tx, CommandResult, Format};
use shadowtx_core::TransactionCoordinator;
use tracing::debug;

/// Starts a transaction and prints its id.
pub fn start(coordinator: &TransactionCoordinator, format: Format) -> CommandResult {
    let id = coordinator.start()?;
    debug!(%id, "Started transaction");
    match format {
        Format::Json => println!("{}", serde_json::json!({ "tx": id })),
        Format::Text => println!("{id}"),
    }
    Ok(())
}

/// Commits a transaction.
pub fn commit(coordinator: &TransactionCoordinator, tx: &str) -> CommandResult {
    let id = parse_tx(tx)?;
    coordinator.commit(id)?;
    println!("Committed {id}");
    Ok(())
}

/// Rolls a transaction back.
pub fn rollback(coordinator: &TransactionCoordinator, tx: &str) -> CommandResult {
    let id = parse_tx(tx)?;
    coordinator.rollback(id)?;
    println!("Rolled back {id}");
    Ok(())
}
