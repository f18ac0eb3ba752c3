//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A document could not be encoded for storage.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// A stored document could not be decoded.
    #[error("decoding failed for {path}: {message}")]
    Decoding {
        /// Location of the undecodable document.
        path: String,
        /// Decoder message.
        message: String,
    },

    /// A collection name is not usable by the store.
    #[error("invalid collection name: {0:?}")]
    InvalidName(String),

    /// A document id is not usable by the store.
    #[error("invalid document id: {0}")]
    InvalidId(String),

    /// The store cannot currently serve requests.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Whether the same request may succeed later.
    ///
    /// Rejected names and ids, and undecodable data, fail the same way
    /// every time.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_))
    }

    /// Whether the request itself was malformed.
    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidName(_) | Self::InvalidId(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_and_outages_are_transient() {
        assert!(StorageError::unavailable("down").is_transient());
        assert!(StorageError::from(io::Error::other("disk")).is_transient());
        assert!(!StorageError::InvalidId("long".into()).is_transient());
        assert!(!StorageError::InvalidName("../x".into()).is_transient());
        assert!(!StorageError::Encoding("bad".into()).is_transient());
    }

    #[test]
    fn invalid_input_kinds() {
        assert!(StorageError::InvalidId("long".into()).is_invalid_input());
        assert!(StorageError::InvalidName("../x".into()).is_invalid_input());
        assert!(!StorageError::unavailable("down").is_invalid_input());
    }
}
