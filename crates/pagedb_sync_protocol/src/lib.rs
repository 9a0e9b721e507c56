//! # PageDB Sync Protocol
//!
//! Record types exchanged with the remote cloud commit log.
//!
//! This crate provides:
//! - [`CommitRecord`] - a commit as it travels: claimed id plus encoded bytes
//! - [`UploadBatch`] - commit records tagged with a dedup [`Signature`]
//! - [`CursorToken`] / [`CommitPage`] - resumable reads of a page's log
//! - [`WatchEvent`] - notifications pushed on a standing watch
//! - [`RemoteError`] - error codes of the remote log
//! - CBOR encoding/decoding of all of the above
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod records;
mod remote;
mod signature;
mod watch;

pub use error::{ProtocolError, ProtocolResult};
pub use records::{CommitPage, CommitRecord, CursorToken};
pub use remote::{RemoteError, RemoteErrorKind, RemoteResult};
pub use signature::{Signature, UploadBatch};
pub use watch::{WatchEvent, WatchNotification};

/// Protocol version carried in every encoded message.
pub const PROTOCOL_VERSION: u16 = 1;
