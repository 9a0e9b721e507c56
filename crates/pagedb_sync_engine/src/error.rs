//! Error types for the sync engine.

use pagedb_sync_protocol::{ProtocolError, RemoteError, RemoteErrorKind};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote log could not be reached.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A remote call exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The remote log rejected our credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The remote log rejected a request or failed internally.
    #[error("remote error {kind:?}: {message}")]
    Remote {
        /// Error category.
        kind: RemoteErrorKind,
        /// Error message.
        message: String,
    },

    /// A downloaded record could not be accepted.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Local page error while applying or reading commits.
    #[error("page error: {0}")]
    Core(#[from] pagedb_core::CoreError),

    /// Message encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Sync stopped earlier with the given error.
    #[error("sync failed: {0}")]
    Failed(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Returns true if this error can be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Remote { kind, .. } => *kind == RemoteErrorKind::Internal,
            _ => false,
        }
    }

    /// Returns true if the caller must re-authenticate before syncing again.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SyncError::Unauthorized(_))
    }

    /// Returns true if received content was rejected.
    #[must_use]
    pub fn is_content_error(&self) -> bool {
        match self {
            SyncError::MalformedRecord(_) => true,
            SyncError::Protocol(e) => e.is_content_error(),
            SyncError::Core(e) => e.is_content_error(),
            _ => false,
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::Network => Self::Network {
                message: err.message,
                retryable: true,
            },
            RemoteErrorKind::Unauthorized => Self::Unauthorized(err.message),
            kind => Self::Remote {
                kind,
                message: err.message,
            },
        }
    }
}
