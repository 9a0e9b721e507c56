//! # PageDB Sync Engine
//!
//! Keeps pages converged with a remote cloud commit log.
//!
//! This crate provides:
//! - [`CloudLog`] - the remote log interface, and [`MemoryCloudLog`]
//! - [`PageSynchronizer`] - upload, download, merge and the status machine
//! - [`SyncManager`] - one synchronizer task per page
//! - Retry with exponential backoff and jitter
//!
//! ## Architecture
//!
//! Each cycle is **download, merge, upload**:
//! 1. Read remote records from the persisted cursor, fetch the objects they
//!    need and apply them with the cursor in one atomic write
//! 2. Merge divergent heads with the page's merge policy
//! 3. Upload local commits (objects first, then signed commit batches)
//!
//! After the first cycle a standing watch delivers new remote records and
//! local commits wake the upload path.
//!
//! ## Key Invariants
//!
//! - The cursor never moves past commits that were not applied
//! - Uploads are idempotent (dedup signatures, `AlreadyExists` is success)
//! - Connectivity problems are retried, never reported as data errors
//! - Authorization failures are terminal until the caller intervenes

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cloud;
mod config;
mod download;
mod error;
mod manager;
mod state;
mod synchronizer;
mod upload;

pub use cloud::{CloudLog, CloudOp, MemoryCloudLog, WatchStream};
pub use config::{RetryConfig, SyncConfig};
pub use download::DownloadBatch;
pub use error::{SyncError, SyncResult};
pub use manager::SyncManager;
pub use state::{SyncCycleResult, SyncState, SyncStats, SyncStatus};
pub use synchronizer::PageSynchronizer;
