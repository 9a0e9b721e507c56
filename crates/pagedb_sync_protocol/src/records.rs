//! Commit records and cursors.

use crate::error::{check_version, from_cbor, to_cbor, ProtocolError, ProtocolResult};
use crate::PROTOCOL_VERSION;
use pagedb_core::{Commit, CommitId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A commit as stored in and served by the remote log.
///
/// The id is only a claim until [`CommitRecord::decode`] has checked that
/// the bytes hash to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Claimed commit id.
    pub id: CommitId,
    /// Canonical encoding of the commit.
    pub bytes: Vec<u8>,
}

impl CommitRecord {
    /// Builds the record for a local commit.
    #[must_use]
    pub fn from_commit(commit: &Commit) -> Self {
        Self {
            id: *commit.id(),
            bytes: commit.encoded().to_vec(),
        }
    }

    /// Decodes and verifies the commit.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedRecord`] if the bytes are not a
    /// canonical commit or hash to a different id.
    pub fn decode(&self) -> ProtocolResult<Commit> {
        Commit::decode_verified(&self.id, &self.bytes).map_err(|e| ProtocolError::MalformedRecord {
            message: format!("record {}: {e}", self.id),
        })
    }
}

/// Opaque position in a page's remote log.
///
/// The empty token means "from the beginning". Clients persist tokens
/// verbatim and never interpret them.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorToken(Vec<u8>);

impl CursorToken {
    /// The token that reads a log from its first record.
    #[must_use]
    pub fn start() -> Self {
        Self(Vec::new())
    }

    /// Wraps persisted token bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true for the start-of-log token.
    #[must_use]
    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }

    /// Encodes a record offset, for logs addressed by position.
    #[must_use]
    pub fn from_offset(offset: u64) -> Self {
        if offset == 0 {
            return Self::start();
        }
        Self(offset.to_be_bytes().to_vec())
    }

    /// Decodes a token produced by [`CursorToken::from_offset`].
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        if self.0.is_empty() {
            return Some(0);
        }
        let bytes: [u8; 8] = self.0.as_slice().try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }
}

impl fmt::Debug for CursorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset() {
            Some(offset) => write!(f, "CursorToken(@{offset})"),
            None => write!(f, "CursorToken({} bytes)", self.0.len()),
        }
    }
}

/// One response of `get_commits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPage {
    /// Records after the requested cursor, in log order.
    pub records: Vec<CommitRecord>,
    /// Cursor to resume from.
    pub next: CursorToken,
    /// Whether `next` is the end of the log.
    pub caught_up: bool,
}

#[derive(Serialize, Deserialize)]
struct CommitPageMessage {
    version: u16,
    page: CommitPage,
}

impl CommitPage {
    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(
            "commit page",
            &CommitPageMessage {
                version: PROTOCOL_VERSION,
                page: self.clone(),
            },
        )
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error for undecodable bytes or a foreign protocol version.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let message: CommitPageMessage = from_cbor("commit page", bytes)?;
        check_version(message.version)?;
        Ok(message.page)
    }
}
