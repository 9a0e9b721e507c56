//! # PageDB Storage
//!
//! Ordered key-value store contract and implementations for PageDB.
//!
//! This crate provides the lowest-level storage abstraction for PageDB.
//! Stores are **opaque ordered byte maps** - they do not interpret the keys
//! or values they hold. The page layout lives entirely in `pagedb_core`.
//!
//! ## Contract
//!
//! - Point reads with [`KvStore::get`]
//! - Writes only through an atomically applied [`WriteBatch`]
//!   (all operations become visible, or none do)
//! - Prefix scans return rows in lexicographic key order
//! - Stores must be `Send + Sync`
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral pages
//! - [`FileStore`] - Persistent store on a [`redb`] database
//!
//! A storage path may only have one live owner at a time. [`FileStore::open`]
//! refuses a second open of the same directory, both inside this process
//! (see [`PathGuard`]) and across processes (redb's own file lock).
//!
//! ## Example
//!
//! ```rust
//! use pagedb_storage::{InMemoryStore, KvStore, WriteBatch};
//!
//! let store = InMemoryStore::new();
//! let mut batch = WriteBatch::new();
//! batch.put(b"/a/1".to_vec(), b"one".to_vec());
//! batch.put(b"/a/2".to_vec(), b"two".to_vec());
//! store.write(batch).unwrap();
//!
//! let rows = store.scan_prefix(b"/a/").unwrap();
//! assert_eq!(rows.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod error;
mod file;
mod memory;
mod registry;

pub use backend::KvStore;
pub use batch::{BatchOp, WriteBatch};
pub use error::{StorageError, StorageResult};
pub use file::{FileStore, StoreOptions};
pub use memory::InMemoryStore;
pub use registry::PathGuard;
