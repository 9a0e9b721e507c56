//! CBOR helpers for internal records.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes `value` as CBOR.
pub(crate) fn to_vec<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| CoreError::Serialization {
        message: e.to_string(),
    })?;
    Ok(out)
}

/// Decodes a CBOR record, describing it as `what` on failure.
pub(crate) fn from_slice<T: DeserializeOwned>(bytes: &[u8], what: &str) -> CoreResult<T> {
    ciborium::from_reader(bytes)
        .map_err(|e| CoreError::malformed_object(format!("undecodable {what}: {e}")))
}
