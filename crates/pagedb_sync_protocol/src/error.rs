//! Error types for protocol encoding and validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding or validating records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be encoded.
    #[error("failed to encode {what}: {message}")]
    Encode {
        /// Kind of message.
        what: &'static str,
        /// Underlying error.
        message: String,
    },

    /// A message could not be decoded.
    #[error("failed to decode {what}: {message}")]
    Decode {
        /// Kind of message.
        what: &'static str,
        /// Underlying error.
        message: String,
    },

    /// A message was produced by an incompatible protocol version.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },

    /// A commit record's bytes do not form the commit it claims to be.
    #[error("malformed commit record: {message}")]
    MalformedRecord {
        /// Description of the problem.
        message: String,
    },

    /// An upload batch's signature does not match its records.
    #[error("upload batch signature mismatch")]
    SignatureMismatch,
}

impl ProtocolError {
    pub(crate) fn encode(what: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Encode {
            what,
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(what: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            what,
            message: err.to_string(),
        }
    }

    /// Returns true if the error means received content is invalid rather
    /// than that encoding failed locally.
    #[must_use]
    pub fn is_content_error(&self) -> bool {
        !matches!(self, ProtocolError::Encode { .. })
    }
}

pub(crate) fn to_cbor<T: serde::Serialize>(what: &'static str, value: &T) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| ProtocolError::encode(what, e))?;
    Ok(out)
}

pub(crate) fn from_cbor<T: serde::de::DeserializeOwned>(
    what: &'static str,
    bytes: &[u8],
) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::decode(what, e))
}

pub(crate) fn check_version(remote: u16) -> ProtocolResult<()> {
    if remote == crate::PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(ProtocolError::VersionMismatch {
            local: crate::PROTOCOL_VERSION,
            remote,
        })
    }
}
