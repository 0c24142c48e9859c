//! Wire protocol types shared between peers and the room relay.
//!
//! Two kinds of frame travel through a room:
//!
//! - **Keyed** frames: a JSON [`Envelope`] `{ key, data }` where `data` is a
//!   plain object carrying a `guid` field.
//! - **Binary** frames: a 4-byte ASCII [`BinaryIdentifier`] followed by a
//!   little-endian table payload.

use crate::constants::{BINARY_IDENTIFIER_LEN, DONT_SAVE_FIELD, GUID_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Buffering policy for an outgoing keyed message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendQueue {
    /// Held until the transport first opens, then sent once.
    OnConnection,
    /// Held until the room join completes, then sent once.
    OnRoomJoin,
    /// Buffered and flushed once per frame. Dropped while disconnected.
    #[default]
    Queued,
    /// Sent right away. Dropped while disconnected.
    Immediate,
}

impl SendQueue {
    /// Returns true if messages of this class survive a closed transport.
    #[must_use]
    pub const fn is_deferred(self) -> bool {
        matches!(self, Self::OnConnection | Self::OnRoomJoin)
    }
}

/// Fixed-length ASCII tag prefixing a binary payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinaryIdentifier([u8; BINARY_IDENTIFIER_LEN]);

impl BinaryIdentifier {
    /// Camera pose sync.
    pub const SYNCED_CAMERA: Self = Self::new(*b"SCAM");
    /// Per-user head and hand state.
    pub const USER_STATE: Self = Self::new(*b"VRUS");
    /// Networked transform pose.
    pub const SYNCED_TRANSFORM: Self = Self::new(*b"STRS");

    /// Creates an identifier from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; BINARY_IDENTIFIER_LEN]) -> Self {
        Self(bytes)
    }

    /// Reads the identifier prefix of a binary frame.
    ///
    /// Returns `None` if the frame is too short or the tag is not printable ASCII.
    #[must_use]
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let prefix = frame.get(..BINARY_IDENTIFIER_LEN)?;
        if !prefix.iter().all(u8::is_ascii_graphic) {
            return None;
        }
        let mut bytes = [0u8; BINARY_IDENTIFIER_LEN];
        bytes.copy_from_slice(prefix);
        Some(Self(bytes))
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BINARY_IDENTIFIER_LEN] {
        &self.0
    }

    /// Identifier as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Debug for BinaryIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BinaryIdentifier({})", self.as_str())
    }
}

impl fmt::Display for BinaryIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyed message as it travels on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Listener key
    pub key: String,
    /// Structured payload
    #[serde(default)]
    pub data: Value,
    /// Ask the relay to deliver this frame back to its sender as well.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub echo: bool,
}

impl Envelope {
    /// Creates an envelope that is not echoed to its sender.
    #[must_use]
    pub fn new(key: impl Into<String>, data: Value) -> Self {
        Self { key: key.into(), data, echo: false }
    }

    /// Target entity of the payload, if it names one.
    #[must_use]
    pub fn guid(&self) -> Option<&str> {
        payload_guid(&self.data)
    }

    /// Returns true if the payload opts out of room state persistence.
    #[must_use]
    pub fn dont_save(&self) -> bool {
        payload_dont_save(&self.data)
    }
}

/// Reads the `guid` field of a payload.
#[must_use]
pub fn payload_guid(data: &Value) -> Option<&str> {
    data.get(GUID_FIELD).and_then(Value::as_str)
}

/// Reads the `dontSave` flag of a payload. Missing means `false`.
#[must_use]
pub fn payload_dont_save(data: &Value) -> bool {
    data.get(DONT_SAVE_FIELD).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_from_frame() {
        let frame = b"SCAM\x01\x02";
        assert_eq!(BinaryIdentifier::from_frame(frame), Some(BinaryIdentifier::SYNCED_CAMERA));
        assert_eq!(BinaryIdentifier::from_frame(b"SC"), None);
        assert_eq!(BinaryIdentifier::from_frame(b"\x00\x01\x02\x03"), None);
        assert_eq!(BinaryIdentifier::USER_STATE.to_string(), "VRUS");
    }

    #[test]
    fn test_envelope_flags() {
        let envelope = Envelope::new("color", json!({ "guid": "abc", "dontSave": true }));
        assert_eq!(envelope.guid(), Some("abc"));
        assert!(envelope.dont_save());

        let text = serde_json::to_string(&envelope).unwrap();
        assert!(!text.contains("echo"));
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_deferred_classes() {
        assert!(SendQueue::OnConnection.is_deferred());
        assert!(SendQueue::OnRoomJoin.is_deferred());
        assert!(!SendQueue::Queued.is_deferred());
        assert!(!SendQueue::Immediate.is_deferred());
    }
}
