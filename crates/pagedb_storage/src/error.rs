//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The underlying database engine reported an error.
    #[error("storage engine error: {0}")]
    Engine(#[from] redb::Error),

    /// The path is already owned by another store in this process.
    #[error("storage path already open in this process: {}", .0.display())]
    PathInUse(PathBuf),

    /// Another process has the database open.
    #[error("storage locked: another process has exclusive access to {}", .0.display())]
    Locked(PathBuf),

    /// The store does not exist and creation was not requested.
    #[error("storage does not exist: {}", .0.display())]
    NotFound(PathBuf),

    /// The store is closed.
    #[error("storage is closed")]
    Closed,
}
