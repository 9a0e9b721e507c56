//! Notifications pushed on a standing watch.

use crate::error::{check_version, from_cbor, to_cbor, ProtocolResult};
use crate::records::{CommitRecord, CursorToken};
use crate::remote::RemoteError;
use crate::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};

/// New records appended to a watched log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchNotification {
    /// Records in log order.
    pub records: Vec<CommitRecord>,
    /// Cursor positioned after `records`.
    pub cursor: CursorToken,
    /// Whether the watcher has now seen the whole log.
    pub caught_up: bool,
}

/// One item of a watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEvent {
    /// Records arrived.
    Records(WatchNotification),
    /// The watch failed and will deliver nothing further.
    Error(RemoteError),
}

#[derive(Serialize, Deserialize)]
struct WatchMessage {
    version: u16,
    event: WatchEvent,
}

impl WatchEvent {
    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(
            "watch event",
            &WatchMessage {
                version: PROTOCOL_VERSION,
                event: self.clone(),
            },
        )
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error for undecodable bytes or a foreign protocol version.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let message: WatchMessage = from_cbor("watch event", bytes)?;
        check_version(message.version)?;
        Ok(message.event)
    }

    /// Returns true if this event ends the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchEvent::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagedb_core::CommitId;

    #[test]
    fn events_survive_the_wire() {
        let records = WatchEvent::Records(WatchNotification {
            records: vec![CommitRecord {
                id: CommitId::from_bytes([3; 32]),
                bytes: vec![1, 2, 3],
            }],
            cursor: CursorToken::from_offset(4),
            caught_up: false,
        });
        let error = WatchEvent::Error(RemoteError::unauthorized("revoked"));

        for event in [records, error] {
            let decoded = WatchEvent::decode(&event.encode().unwrap()).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn only_errors_are_terminal() {
        assert!(WatchEvent::Error(RemoteError::network("x")).is_terminal());
        assert!(!WatchEvent::Records(WatchNotification {
            records: Vec::new(),
            cursor: CursorToken::start(),
            caught_up: true,
        })
        .is_terminal());
    }
}
