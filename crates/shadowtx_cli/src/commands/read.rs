//! Read commands: find and get.

use super::{parse_tx, print_documents, CliError, CommandResult, Format};
use serde_json::Value;
use shadowtx_core::{Filter, TransactionCoordinator};
use shadowtx_storage::DocumentId;

/// Builds a filter from `--id` and `--eq` arguments.
pub fn build_filter(ids: &[String], eq: &[String]) -> Result<Filter, CliError> {
    let mut filters = Vec::new();
    if !ids.is_empty() {
        filters.push(Filter::ids(ids.iter().map(String::as_str)));
    }
    for arg in eq {
        let (path, raw) = arg
            .split_once('=')
            .ok_or_else(|| CliError::BadFilter(arg.clone()))?;
        if path.is_empty() {
            return Err(CliError::BadFilter(arg.clone()));
        }
        // Bare words are taken as strings.
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        filters.push(Filter::eq(path, value));
    }
    Ok(match filters.len() {
        0 => Filter::All,
        1 => filters.remove(0),
        _ => Filter::And(filters),
    })
}

/// Queries a collection.
pub fn find(
    coordinator: &TransactionCoordinator,
    tx: Option<&str>,
    collection: &str,
    ids: &[String],
    eq: &[String],
    format: Format,
) -> CommandResult {
    let filter = build_filter(ids, eq)?;
    let docs = match tx {
        Some(tx) => coordinator.find(parse_tx(tx)?, collection, &filter)?,
        None => coordinator.find_committed(collection, &filter)?,
    };
    print_documents(&docs, format)
}

/// Reads one document.
pub fn get(
    coordinator: &TransactionCoordinator,
    tx: Option<&str>,
    collection: &str,
    id: &str,
    format: Format,
) -> CommandResult {
    let id = DocumentId::from(id);
    let doc = match tx {
        Some(tx) => coordinator.transaction(parse_tx(tx)?).get(collection, &id)?,
        None => coordinator.read(collection, &id)?,
    };
    match doc {
        Some(doc) => print_documents(&[doc], format),
        None => Err(format!("{collection}/{id} not found").into()),
    }
}
