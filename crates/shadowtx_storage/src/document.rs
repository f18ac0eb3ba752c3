//! Documents and document identifiers.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Caller-assigned identifier of a document within a collection.
///
/// Identifiers are opaque strings. The store never generates them.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a document ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase hex of the ID bytes, safe for use as a file name.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.bytes().map(|b| format!("{b:02x}")).collect()
    }

    /// Parses the output of [`DocumentId::to_hex`].
    ///
    /// Returns `None` if the input is not valid hex of a UTF-8 string.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() % 2 != 0 {
            return None;
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
            .collect::<Option<Vec<u8>>>()?;
        String::from_utf8(bytes).ok().map(Self)
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({:?})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A document: an identifier plus an arbitrary JSON-shaped body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Caller-assigned identifier.
    pub id: DocumentId,
    /// Document content.
    pub body: Value,
}

impl Document {
    /// Creates a document.
    pub fn new(id: impl Into<DocumentId>, body: Value) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

/// Checks that a collection name is usable by every store.
///
/// Names must be non-empty, must not start with `.`, and may only contain
/// ASCII letters, digits, `_`, `-` and `.`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidName`] otherwise.
pub fn validate_collection_name(name: &str) -> StorageResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn hex_of_plain_id() {
        let id = DocumentId::from("a:1");
        assert_eq!(id.to_hex(), "613a31");
        assert_eq!(DocumentId::from_hex("613a31"), Some(id));
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert_eq!(DocumentId::from_hex("abc"), None);
        assert_eq!(DocumentId::from_hex("zz"), None);
        assert_eq!(DocumentId::from_hex("ff"), None);
    }

    #[test]
    fn collection_names() {
        assert!(validate_collection_name("orders").is_ok());
        assert!(validate_collection_name("orders.tx").is_ok());
        assert!(validate_collection_name("a-b_c9").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name(".hidden").is_err());
        assert!(validate_collection_name("a/b").is_err());
        assert!(validate_collection_name("a b").is_err());
    }

    #[test]
    fn document_equality_includes_body() {
        let a = Document::new("x", json!({"v": 1}));
        let b = Document::new("x", json!({"v": 2}));
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    proptest! {
        #[test]
        fn hex_names_are_reversible(s in "\\PC{0,24}") {
            let id = DocumentId::new(s);
            prop_assert_eq!(DocumentId::from_hex(&id.to_hex()), Some(id));
        }
    }
}
