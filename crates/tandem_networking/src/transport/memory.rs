//! In-process transport backed by crossbeam channels.

use super::{Frame, Transport, TransportEvent, TransportStats};
use crate::error::{NetworkError, NetworkResult};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::debug;

/// Peer to hub.
#[derive(Debug)]
pub(crate) enum Upstream {
    Frame(Frame),
    Close,
}

/// Hub to peer.
#[derive(Debug)]
pub(crate) enum Downstream {
    Opened,
    Frame(Frame),
    Closed,
}

/// Client end of a [`RoomHub`](crate::RoomHub) link.
///
/// Opens once the hub has accepted it, which happens on the next
/// [`RoomHub::pump`](crate::RoomHub::pump).
pub struct MemoryTransport {
    outbound: Sender<Upstream>,
    inbound: Receiver<Downstream>,
    open: bool,
    closed: bool,
    stats: TransportStats,
}

impl MemoryTransport {
    pub(crate) fn new(outbound: Sender<Upstream>, inbound: Receiver<Downstream>) -> Self {
        Self {
            outbound,
            inbound,
            open: false,
            closed: false,
            stats: TransportStats::default(),
        }
    }
}

impl Transport for MemoryTransport {
    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }
        loop {
            match self.inbound.try_recv() {
                Ok(Downstream::Opened) => {
                    self.open = true;
                    events.push(TransportEvent::Opened);
                }
                Ok(Downstream::Frame(frame)) => {
                    self.stats.record_received(&frame);
                    events.push(TransportEvent::Frame(frame));
                }
                Ok(Downstream::Closed) | Err(TryRecvError::Disconnected) => {
                    self.open = false;
                    self.closed = true;
                    events.push(TransportEvent::Closed);
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        events
    }

    fn send(&mut self, frame: Frame) -> NetworkResult<()> {
        if !self.open {
            self.stats.send_errors += 1;
            return Err(NetworkError::NotConnected);
        }
        self.stats.record_sent(&frame);
        self.outbound.send(Upstream::Frame(frame)).map_err(|_| {
            self.open = false;
            NetworkError::TransportClosed
        })
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        debug!("closing memory transport");
        // The hub may already be gone
        let _ = self.outbound.send(Upstream::Close);
        self.open = false;
        self.closed = true;
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}
