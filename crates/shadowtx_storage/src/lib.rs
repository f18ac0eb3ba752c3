//! # shadowtx Storage
//!
//! Backing document store abstraction for shadowtx.
//!
//! This crate provides the lowest-level storage layer. A store holds
//! documents in named collections and guarantees atomicity for **one
//! document at a time** only. Multi-document transactions are built on top
//! of it by `shadowtx_core`.
//!
//! ## Design Principles
//!
//! - Every primitive is atomic for a single document
//! - No multi-document transactions, no secondary indexes
//! - Conditional insert is the compare-and-set the lock ledger relies on
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral data
//! - [`FileStore`] - One file per document, safe across processes
//!
//! ## Example
//!
//! ```rust
//! use shadowtx_storage::{Document, DocumentStore, InMemoryStore};
//! use serde_json::json;
//!
//! let store = InMemoryStore::new();
//! let doc = Document::new("a", json!({"v": 1}));
//! assert!(store.insert("orders", &doc).unwrap());
//! assert!(!store.insert("orders", &doc).unwrap());
//! assert_eq!(store.get("orders", &doc.id).unwrap(), Some(doc));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod file;
mod memory;
mod store;

pub use document::{validate_collection_name, Document, DocumentId};
pub use error::{StorageError, StorageResult};
pub use file::{FileStore, MAX_ID_BYTES};
pub use memory::InMemoryStore;
pub use store::DocumentStore;
