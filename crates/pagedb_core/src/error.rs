//! Error types for PageDB core.

use crate::commit::CommitId;
use crate::object::ObjectIdentifier;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in PageDB core operations.
///
/// Probing for something that may legitimately be absent (an object, an
/// entry, a commit) is never an error; those lookups return `Option` or
/// [`crate::ValueLookup`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] pagedb_storage::StorageError),

    /// Content did not hash to the identifier it was claimed under.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Identifier the content was supplied for.
        expected: ObjectIdentifier,
        /// Identifier actually computed from the content.
        actual: ObjectIdentifier,
    },

    /// A commit could not be decoded or violates graph rules.
    #[error("malformed commit: {message}")]
    MalformedCommit {
        /// Description of the problem.
        message: String,
    },

    /// A stored object (entry set, fragment index, row) could not be decoded.
    #[error("malformed object: {message}")]
    MalformedObject {
        /// Description of the problem.
        message: String,
    },

    /// A commit names a parent that is not in the graph.
    #[error("commit parent {parent} is not present")]
    MissingParent {
        /// The absent parent.
        parent: CommitId,
    },

    /// An object the operation depends on is not stored locally.
    #[error("object {id} is not present locally")]
    MissingObject {
        /// The absent object.
        id: ObjectIdentifier,
    },

    /// A commit the operation depends on is not in the graph.
    #[error("commit {id} is not present")]
    MissingCommit {
        /// The absent commit.
        id: CommitId,
    },

    /// Value ingestion failed.
    #[error("ingestion failed: {message}")]
    Ingestion {
        /// Description of the failure.
        message: String,
    },

    /// Serialization of an internal record failed.
    #[error("serialization failed: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a malformed commit error.
    pub fn malformed_commit(message: impl Into<String>) -> Self {
        Self::MalformedCommit {
            message: message.into(),
        }
    }

    /// Creates a malformed object error.
    pub fn malformed_object(message: impl Into<String>) -> Self {
        Self::MalformedObject {
            message: message.into(),
        }
    }

    /// Creates an ingestion error.
    pub fn ingestion(message: impl Into<String>) -> Self {
        Self::Ingestion {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by bad content rather than local I/O.
    ///
    /// Content errors mean a remote peer or the local store handed over
    /// bytes that do not match what they claim to be.
    #[must_use]
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            CoreError::HashMismatch { .. }
                | CoreError::MalformedCommit { .. }
                | CoreError::MalformedObject { .. }
        )
    }
}
