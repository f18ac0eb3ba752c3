//! CLI command implementations.

pub mod inspect;
pub mod read;
pub mod recover;
pub mod transaction;
pub mod write;

use serde_json::Value;
use shadowtx_core::{Config, TransactionCoordinator, TransactionId};
use shadowtx_storage::{Document, FileStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Input errors detected by the CLI itself.
#[derive(Debug, Error)]
pub enum CliError {
    /// `--format` is neither `text` nor `json`.
    #[error("unknown output format {0:?} (expected text or json)")]
    UnknownFormat(String),

    /// A transaction id did not parse.
    #[error("invalid transaction id {0:?}")]
    BadTransactionId(String),

    /// A document argument is unusable.
    #[error("invalid document {input:?}: {reason}")]
    BadDocument {
        /// The argument as given.
        input: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An `--eq` argument is not `path=json`.
    #[error("invalid --eq {0:?} (expected path=json)")]
    BadFilter(String),
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses a `--format` value.
    pub fn parse(s: &str) -> Result<Self, CliError> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// Opens a coordinator over the store at `path`.
pub fn open(path: &Path, stale_after_secs: Option<u64>) -> CommandResult<TransactionCoordinator> {
    let store = FileStore::open(path)?;
    let mut config = Config::default();
    if let Some(secs) = stale_after_secs {
        config = config.stale_after(Duration::from_secs(secs));
    }
    Ok(TransactionCoordinator::new(Arc::new(store), config)?)
}

/// Parses a transaction id argument.
pub fn parse_tx(s: &str) -> Result<TransactionId, CliError> {
    s.trim()
        .parse()
        .map_err(|_| CliError::BadTransactionId(s.to_string()))
}

/// Parses a document argument: a JSON object whose `_id` is a string.
///
/// The whole object, `_id` included, becomes the document body.
pub fn parse_document(input: &str) -> Result<Document, CliError> {
    let bad = |reason: &str| CliError::BadDocument {
        input: input.to_string(),
        reason: reason.to_string(),
    };
    let body: Value = serde_json::from_str(input).map_err(|e| bad(&e.to_string()))?;
    let id = match body.get("_id") {
        Some(Value::String(id)) => id.clone(),
        Some(_) => return Err(bad("`_id` must be a string")),
        None if body.is_object() => return Err(bad("missing `_id`")),
        None => return Err(bad("not a JSON object")),
    };
    Ok(Document::new(id, body))
}

/// Prints documents in the chosen format.
pub fn print_documents(docs: &[Document], format: Format) -> CommandResult {
    match format {
        Format::Json => {
            let bodies: Vec<&Value> = docs.iter().map(|d| &d.body).collect();
            println!("{}", serde_json::to_string_pretty(&bodies)?);
        }
        Format::Text => {
            for doc in docs {
                println!("{}\t{}", doc.id, serde_json::to_string(&doc.body)?);
            }
        }
    }
    Ok(())
}
