//! Error types for shadowtx core.
//!
//! Errors carry their diagnostic context with them: callers wrap a failure
//! with [`ErrorContext::context`] as it propagates, building a chain that
//! can be inspected with [`CoreError::chain`] while [`CoreError::root`]
//! still exposes the original kind for matching.

use crate::types::TransactionId;
use shadowtx_storage::{DocumentId, StorageError};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in shadowtx core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Documents are locked by another transaction. Retry later.
    #[error("lock conflict in {collection} on {document_ids:?}")]
    LockConflict {
        /// Collection of the contested documents.
        collection: String,
        /// The ids that could not be locked.
        document_ids: Vec<DocumentId>,
    },

    /// The transaction is missing or no longer active.
    #[error("invalid transaction {tx_id}: {reason}")]
    InvalidTransaction {
        /// The offending transaction id.
        tx_id: TransactionId,
        /// Why the transaction was rejected.
        reason: String,
    },

    /// Committing found base state that contradicts the lock ledger.
    #[error("commit fault in {collection} on {document_id}: {message}")]
    CommitFault {
        /// Collection being committed.
        collection: String,
        /// The document whose base state was unexpected.
        document_id: DocumentId,
        /// Description of the fault.
        message: String,
    },

    /// The backing store failed.
    ///
    /// Storage errors caused by the request itself, such as an id the
    /// store cannot hold, become [`CoreError::InvalidOperation`] instead.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StorageError),

    /// A document with this id already exists.
    #[error("duplicate document {document_id} in {collection}")]
    DuplicateDocument {
        /// Collection of the document.
        collection: String,
        /// The duplicate id.
        document_id: DocumentId,
    },

    /// Operation not permitted.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A persisted record could not be converted.
    #[error("malformed record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An error annotated with the operation that was running.
    #[error("{context}: {source}")]
    Context {
        /// What was being done.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    /// Creates a lock conflict error.
    pub fn lock_conflict(collection: impl Into<String>, document_ids: Vec<DocumentId>) -> Self {
        Self::LockConflict {
            collection: collection.into(),
            document_ids,
        }
    }

    /// Creates an invalid transaction error.
    pub fn invalid_transaction(tx_id: TransactionId, reason: impl Into<String>) -> Self {
        Self::InvalidTransaction {
            tx_id,
            reason: reason.into(),
        }
    }

    /// Creates a commit fault error.
    pub fn commit_fault(
        collection: impl Into<String>,
        document_id: DocumentId,
        message: impl Into<String>,
    ) -> Self {
        Self::CommitFault {
            collection: collection.into(),
            document_id,
            message: message.into(),
        }
    }

    /// Creates a duplicate document error.
    pub fn duplicate(collection: impl Into<String>, document_id: DocumentId) -> Self {
        Self::DuplicateDocument {
            collection: collection.into(),
            document_id,
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns the innermost error, skipping all context layers.
    #[must_use]
    pub fn root(&self) -> &CoreError {
        let mut current = self;
        while let CoreError::Context { source, .. } = current {
            current = source.as_ref();
        }
        current
    }

    /// Returns the context messages, outermost first.
    #[must_use]
    pub fn chain(&self) -> Vec<&str> {
        let mut contexts = Vec::new();
        let mut current = self;
        while let CoreError::Context { context, source } = current {
            contexts.push(context.as_str());
            current = source.as_ref();
        }
        contexts
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            CoreError::LockConflict { .. } => true,
            CoreError::StoreUnavailable(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        if e.is_invalid_input() {
            Self::invalid_operation(e.to_string())
        } else {
            Self::StoreUnavailable(e)
        }
    }
}

/// Adds context to errors as they propagate.
pub trait ErrorContext<T> {
    /// Wraps the error with a fixed context message.
    fn context(self, context: impl Into<String>) -> CoreResult<T>;

    /// Wraps the error with a lazily built context message.
    fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> CoreResult<T>;
}

impl<T, E: Into<CoreError>> ErrorContext<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> CoreResult<T> {
        self.map_err(|e| CoreError::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> CoreResult<T> {
        self.map_err(|e| CoreError::Context {
            context: f().into(),
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> CoreResult<()> {
        Err(CoreError::lock_conflict("orders", vec!["a".into()]))
    }

    #[test]
    fn context_chain_is_outermost_first() {
        let err = conflict()
            .context("acquiring locks")
            .with_context(|| "inserting into orders")
            .unwrap_err();

        assert_eq!(err.chain(), vec!["inserting into orders", "acquiring locks"]);
        assert!(matches!(err.root(), CoreError::LockConflict { .. }));
        assert!(err.to_string().starts_with("inserting into orders: acquiring locks: "));
    }

    #[test]
    fn root_of_plain_error_is_itself() {
        let err = CoreError::invalid_operation("nope");
        assert!(err.chain().is_empty());
        assert!(matches!(err.root(), CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn retryable_kinds() {
        assert!(conflict().unwrap_err().is_retryable());
        assert!(CoreError::from(StorageError::unavailable("down")).is_retryable());
        assert!(conflict().context("wrapped").unwrap_err().is_retryable());

        let tx = TransactionId::new();
        assert!(!CoreError::invalid_transaction(tx, "gone").is_retryable());
        assert!(!CoreError::commit_fault("c", "a".into(), "exists").is_retryable());
    }

    #[test]
    fn rejected_input_is_not_retryable() {
        let err = CoreError::from(StorageError::InvalidId("200 bytes".into()));
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert!(!err.is_retryable());

        let err = CoreError::from(StorageError::InvalidName("../x".into()));
        assert!(matches!(err, CoreError::InvalidOperation { .. }));

        let corrupt = StorageError::Decoding {
            path: "c/61.doc".into(),
            message: "not cbor".into(),
        };
        let err = CoreError::from(corrupt);
        assert!(matches!(err, CoreError::StoreUnavailable(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn storage_errors_convert_through_context() {
        let result: Result<(), StorageError> = Err(StorageError::unavailable("down"));
        let err = result.context("reading").unwrap_err();
        assert!(matches!(err.root(), CoreError::StoreUnavailable(_)));
    }
}
