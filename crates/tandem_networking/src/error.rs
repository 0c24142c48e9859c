//! # Networking Error Types
//!
//! Network faults are logged and the affected message is dropped; nothing
//! here is retried except through the delivery-class buffers. The types
//! below are what a transport, the wire codec or a listener can report.

use tandem_shared::BinaryIdentifier;
use thiserror::Error;

/// Failures of the connection and its transport.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// No transport is attached, or it has not opened yet.
    #[error("not connected")]
    NotConnected,

    /// The transport was closed by either side.
    #[error("transport closed")]
    TransportClosed,

    /// The operation needs a joined room.
    #[error("not in a room")]
    NotInRoom,

    /// An incoming frame could not be understood.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// No decoder is registered for a binary identifier.
    #[error("unknown binary identifier {0}")]
    UnknownIdentifier(BinaryIdentifier),

    /// Binary payload failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for connection operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Binary table codec failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The payload ended before a field could be read.
    #[error("payload truncated at byte {0}")]
    Truncated(usize),

    /// The payload does not fit in a table.
    #[error("payload exceeds {0} bytes")]
    Overflow(usize),

    /// A string field is not valid UTF-8.
    #[error("invalid utf-8 in field {0}")]
    InvalidUtf8(u8),

    /// The frame does not start with the expected identifier.
    #[error("expected identifier {expected}, found {found:?}")]
    BadIdentifier {
        /// Identifier of the model being decoded
        expected: BinaryIdentifier,
        /// Leading bytes of the frame
        found: Vec<u8>,
    },

    /// A required field is absent from the table.
    #[error("missing required field {0}")]
    MissingField(u8),
}

/// Result type for the binary codec.
pub type WireResult<T> = Result<T, WireError>;

/// Failure raised by a message listener.
///
/// Caught at the connection boundary and logged; delivery to the other
/// listeners of the same message continues.
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Free-form failure.
    #[error("{0}")]
    Message(String),

    /// The payload did not have the expected shape.
    #[error("unexpected payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The binary payload could not be decoded.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A scene or component failure while applying a message.
    #[error(transparent)]
    Behaviour(#[from] tandem_core::BehaviourError),
}

impl ListenerError {
    /// Creates a free-form listener error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Result of a listener callback.
pub type ListenerResult = Result<(), ListenerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = WireError::BadIdentifier {
            expected: BinaryIdentifier::SYNCED_CAMERA,
            found: b"VRUS".to_vec(),
        };
        assert!(err.to_string().starts_with("expected identifier SCAM"));

        let err = NetworkError::from(WireError::Truncated(7));
        assert_eq!(err.to_string(), "payload truncated at byte 7");
    }
}
