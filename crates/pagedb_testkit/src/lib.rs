//! # PageDB Testkit
//!
//! Test utilities for PageDB.
//!
//! This crate provides:
//! - Page fixtures backed by memory or a temporary directory
//! - A store wrapper that fails writes on demand, for crash tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pagedb_testkit::prelude::*;
//!
//! #[test]
//! fn two_devices() {
//!     let a = TestPage::memory();
//!     let b = TestPage::device(*a.id());
//!     write(&a, "key", b"value");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
