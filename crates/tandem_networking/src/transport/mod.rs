//! # Transport Layer
//!
//! The seam between a [`NetworkConnection`](crate::NetworkConnection) and
//! whatever carries its frames. A transport is polled once per frame from
//! the scheduler thread; it never calls back into the connection.
//!
//! - [`MemoryTransport`]: in-process link to a [`RoomHub`](crate::RoomHub)

mod memory;

pub use memory::MemoryTransport;
pub(crate) use memory::{Downstream, Upstream};

use crate::error::NetworkResult;

/// One message on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// JSON-encoded keyed envelope
    Text(String),
    /// Identifier-prefixed binary payload
    Binary(Vec<u8>),
}

impl Frame {
    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns true for an empty payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Something a transport observed since the last poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link is up and frames can be sent.
    Opened,
    /// The link went down. No frames are delivered after this.
    Closed,
    /// An incoming frame.
    Frame(Frame),
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames sent.
    pub frames_sent: u64,
    /// Frames received.
    pub frames_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
}

impl TransportStats {
    pub(crate) fn record_sent(&mut self, frame: &Frame) {
        self.frames_sent += 1;
        self.bytes_sent += frame.len() as u64;
    }

    pub(crate) fn record_received(&mut self, frame: &Frame) {
        self.frames_received += 1;
        self.bytes_received += frame.len() as u64;
    }
}

/// A bidirectional frame link to a room server.
pub trait Transport {
    /// Drains everything that happened since the last poll, in order.
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Sends a frame. Fails if the link is not open.
    fn send(&mut self, frame: Frame) -> NetworkResult<()>;

    /// Returns true between `Opened` and `Closed`.
    fn is_open(&self) -> bool;

    /// Closes the link from this side.
    fn close(&mut self);

    /// Traffic counters
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}
