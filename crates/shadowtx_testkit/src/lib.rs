//! # shadowtx Testkit
//!
//! Test utilities for shadowtx.
//!
//! This crate provides:
//! - Test fixtures over in-memory and file-backed stores
//! - Property-based test generators using proptest
//! - Crash simulation by failing store writes
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use shadowtx_testkit::prelude::*;
//!
//! let t = TestStore::new();
//! let tx = t.begin().unwrap();
//! tx.insert("orders", &[doc("a", 1)]).unwrap();
//! tx.commit().unwrap();
//!
//! assert_eq!(t.snapshot("orders"), vec![doc("a", 1)]);
//! t.assert_clean();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
