//! # PageDB Core
//!
//! Versioned key-value pages: content-addressed objects, a commit DAG per
//! page, and merge policies that restore a single head after divergence.
//!
//! ## Architecture
//!
//! ```text
//! Journal ──► Ingestion ──► ObjectStore ──► CommitGraph ──► reference rows
//!                                               ▲
//!            remote commits (sync engine) ──────┘──► resolve_heads (merge)
//! ```
//!
//! - [`keys`] - the only code that knows the row layout
//! - [`ObjectStore`] - immutable blobs keyed by SHA-256, fragmented above
//!   [`FRAGMENT_SIZE`]
//! - [`CommitGraph`] - Merkle DAG with out-of-order completion
//! - [`Page`] / [`Journal`] - single-writer transactional API
//! - [`merge`] - policies and the coordinator loop
//! - [`gc`] - scan-derived reference counts and collection
//!
//! The core is synchronous except where it waits on an outside party:
//! stream ingestion and merge resolvers are `async`.
//!
//! ## Example
//!
//! ```rust
//! use pagedb_core::{Page, PageId, PageOptions, ValueLookup};
//! use pagedb_storage::InMemoryStore;
//! use std::sync::Arc;
//!
//! let page = Page::open(Arc::new(InMemoryStore::new()), PageId::new(), PageOptions::new()).unwrap();
//! let mut journal = page.begin();
//! journal.put("greeting", b"hello").unwrap();
//! journal.commit().unwrap();
//!
//! assert!(matches!(page.get(b"greeting").unwrap(), ValueLookup::Found(_)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod change_feed;
pub mod commit;
mod entries;
mod error;
pub mod gc;
mod ingest;
pub mod keys;
pub mod merge;
pub mod object;
mod page;
mod types;

pub use change_feed::{ChangeFeed, ChangeOrigin, PageChange};
pub use commit::{Commit, CommitGraph, CommitId, CommitState};
pub use entries::{Entry, EntryChange, EntrySet};
pub use error::{CoreError, CoreResult};
pub use gc::{collect_garbage, reference_counts, GcOptions, GcReport};
pub use ingest::{ingest, stage_ingest, DataSource, IngestState, Ingestion};
pub use merge::{
    resolve_heads, ConflictResolver, FnResolver, MergeConflict, MergeDecision, MergePolicy,
    MergeReport, Resolution,
};
pub use object::{ContentHasher, ObjectIdentifier, ObjectStore, FRAGMENT_SIZE};
pub use page::{Journal, Page, PageOptions, PageSnapshot, ValueLookup};
pub use types::{Clock, KeyPriority, ManualClock, PageId, SystemClock};
