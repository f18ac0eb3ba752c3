//! Write commands: insert, update, delete.

use super::{parse_document, parse_tx, CommandResult};
use shadowtx_core::TransactionCoordinator;
use shadowtx_storage::{Document, DocumentId};

fn parse_all(documents: &[String]) -> CommandResult<Vec<Document>> {
    Ok(documents
        .iter()
        .map(|d| parse_document(d))
        .collect::<Result<Vec<_>, _>>()?)
}

/// Stages new documents in a transaction.
pub fn insert(
    coordinator: &TransactionCoordinator,
    tx: &str,
    collection: &str,
    documents: &[String],
) -> CommandResult {
    let docs = parse_all(documents)?;
    coordinator.insert(parse_tx(tx)?, collection, &docs)?;
    println!("Staged {} insert(s) in {collection}", docs.len());
    Ok(())
}

/// Stages replacement documents in a transaction.
pub fn update(
    coordinator: &TransactionCoordinator,
    tx: &str,
    collection: &str,
    documents: &[String],
) -> CommandResult {
    let docs = parse_all(documents)?;
    coordinator.update(parse_tx(tx)?, collection, &docs)?;
    println!("Staged {} update(s) in {collection}", docs.len());
    Ok(())
}

/// Stages deletions in a transaction.
pub fn delete(
    coordinator: &TransactionCoordinator,
    tx: &str,
    collection: &str,
    ids: &[String],
) -> CommandResult {
    let ids: Vec<DocumentId> = ids.iter().map(|id| DocumentId::from(id.as_str())).collect();
    coordinator.delete(parse_tx(tx)?, collection, &ids)?;
    println!("Staged {} delete(s) in {collection}", ids.len());
    Ok(())
}
