//! Signed upload batches.
//!
//! A batch's [`Signature`] is a SHA-256 over a domain tag and every record's
//! id and bytes in order. Re-sending the same commits yields the same
//! signature, which lets the remote log recognise a retried upload whose
//! acknowledgement was lost and ignore it instead of appending duplicates.

use crate::error::{check_version, from_cbor, to_cbor, ProtocolError, ProtocolResult};
use crate::records::CommitRecord;
use crate::PROTOCOL_VERSION;
use pagedb_core::keys::encode_hex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const SIGNATURE_DOMAIN: &[u8] = b"pagedb/upload-batch/v1\0";

/// Dedup tag of an upload batch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Signature([u8; 32]);

impl Signature {
    /// Computes the signature of `records`.
    #[must_use]
    pub fn of(records: &[CommitRecord]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(SIGNATURE_DOMAIN);
        hasher.update((records.len() as u64).to_be_bytes());
        for record in records {
            hasher.update(record.id.as_bytes());
            hasher.update((record.bytes.len() as u64).to_be_bytes());
            hasher.update(&record.bytes);
        }
        Self(hasher.finalize().into())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", &encode_hex(&self.0)[..16])
    }
}

/// Commit records uploaded together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadBatch {
    records: Vec<CommitRecord>,
    signature: Signature,
}

#[derive(Serialize, Deserialize)]
struct UploadMessage {
    version: u16,
    batch: UploadBatch,
}

impl UploadBatch {
    /// Creates a signed batch.
    #[must_use]
    pub fn new(records: Vec<CommitRecord>) -> Self {
        let signature = Signature::of(&records);
        Self { records, signature }
    }

    /// Returns the records.
    #[must_use]
    pub fn records(&self) -> &[CommitRecord] {
        &self.records
    }

    /// Consumes the batch, returning its records.
    #[must_use]
    pub fn into_records(self) -> Vec<CommitRecord> {
        self.records
    }

    /// Returns the signature.
    #[must_use]
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Checks the signature against the records.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::SignatureMismatch`] if they disagree.
    pub fn verify(&self) -> ProtocolResult<()> {
        if Signature::of(&self.records) == self.signature {
            Ok(())
        } else {
            Err(ProtocolError::SignatureMismatch)
        }
    }

    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(
            "upload batch",
            &UploadMessage {
                version: PROTOCOL_VERSION,
                batch: self.clone(),
            },
        )
    }

    /// Decodes from CBOR and verifies the signature.
    ///
    /// # Errors
    ///
    /// Returns an error for undecodable bytes, a foreign protocol version or
    /// a signature that does not match the records.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let message: UploadMessage = from_cbor("upload batch", bytes)?;
        check_version(message.version)?;
        message.batch.verify()?;
        Ok(message.batch)
    }
}
