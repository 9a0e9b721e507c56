//! Error codes reported by the remote log.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type of remote log calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Category of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// The service could not be reached or the connection dropped.
    Network,
    /// Credentials were rejected.
    Unauthorized,
    /// The requested object or page does not exist.
    NotFound,
    /// The record or object is already stored.
    AlreadyExists,
    /// The request was rejected as invalid.
    InvalidArgument,
    /// The service failed internally.
    Internal,
}

/// A failure reported by the remote log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Category.
    pub kind: RemoteErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl RemoteError {
    /// Creates an error.
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    /// Creates an authorization error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unauthorized, message)
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::Network | RemoteErrorKind::Internal
        )
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(RemoteError::network("reset").is_transient());
        assert!(RemoteError::new(RemoteErrorKind::Internal, "oops").is_transient());
        assert!(!RemoteError::unauthorized("expired").is_transient());
        assert!(!RemoteError::not_found("gone").is_transient());
    }

    #[test]
    fn display_names_kind() {
        let err = RemoteError::unauthorized("token expired");
        assert_eq!(err.to_string(), "Unauthorized: token expired");
    }
}
