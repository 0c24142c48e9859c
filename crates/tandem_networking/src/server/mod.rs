//! # Room Hub
//!
//! In-process room relay. Peers connect through [`MemoryTransport`]s; the
//! hub is driven by calling [`RoomHub::pump`] between frames.
//!
//! ```text
//!   peer A ──┐                         ┌──► peer A (echo only)
//!            ├──► RoomHub::pump ───────┼──► peer B
//!   peer B ──┘    ├── rosters          └──► peer C
//!                 └── room state (last message per guid)
//! ```
//!
//! ## Responsibilities
//!
//! - Assigns each link a connection id, never reused
//! - Tracks room rosters and emits room lifecycle events
//! - Relays keyed and binary frames to the other members of the room
//! - Stores guid-keyed messages that are not `dontSave` and replays them
//!   to joiners, followed by `room-state-sent`

mod room;

use crate::transport::{Downstream, Frame, MemoryTransport, Upstream};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use room::Room;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tandem_shared::{
    Envelope, JoinRoomPayload, JoinedRoomPayload, RoomEvent, RoomRequest, UserPresencePayload,
};
use tracing::{debug, error, info, trace, warn};

struct PeerLink {
    id: String,
    inbound: Receiver<Upstream>,
    outbound: Sender<Downstream>,
    accepted: bool,
    room: Option<String>,
    view_only: bool,
}

/// Hub statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Frames read from peers.
    pub frames_in: u64,
    /// Frames written to peers, relays and events included.
    pub frames_out: u64,
    /// Frames that could not be parsed or had no room.
    pub frames_dropped: u64,
}

/// In-process room server.
#[derive(Default)]
pub struct RoomHub {
    peers: Vec<PeerLink>,
    rooms: HashMap<String, Room>,
    next_peer: u32,
    stats: HubStats,
}

impl RoomHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new link. It is accepted on the next [`pump`](Self::pump).
    pub fn connect(&mut self) -> MemoryTransport {
        let (up_tx, up_rx) = unbounded();
        let (down_tx, down_rx) = unbounded();
        self.next_peer += 1;
        let id = format!("peer-{}", self.next_peer);
        debug!(peer = %id, "link created");
        self.peers.push(PeerLink {
            id,
            inbound: up_rx,
            outbound: down_tx,
            accepted: false,
            room: None,
            view_only: false,
        });
        MemoryTransport::new(up_tx, down_rx)
    }

    /// Number of connected links
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Listed members of `room`, in join order.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<String> {
        self.rooms.get(room).map(|r| r.members().to_vec()).unwrap_or_default()
    }

    /// Number of stored state messages in `room`.
    #[must_use]
    pub fn stored_state(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, Room::state_len)
    }

    /// Traffic counters
    #[must_use]
    pub const fn stats(&self) -> HubStats {
        self.stats
    }

    /// Drops a link from the server side, as if the connection was lost.
    pub fn disconnect(&mut self, peer: &str) -> bool {
        let Some(index) = self.index_of(peer) else {
            return false;
        };
        self.leave_room(index, false);
        let link = self.peers.remove(index);
        // The client may already be gone
        let _ = link.outbound.send(Downstream::Closed);
        info!(peer, "peer disconnected by hub");
        true
    }

    /// Accepts new links, then processes every pending frame in arrival
    /// order per peer. Returns the number of frames read.
    pub fn pump(&mut self) -> usize {
        for link in &mut self.peers {
            if !link.accepted {
                link.accepted = true;
                if link.outbound.send(Downstream::Opened).is_ok() {
                    trace!(peer = %link.id, "link accepted");
                }
            }
        }

        let mut inbox = Vec::new();
        let mut gone = Vec::new();
        for link in &self.peers {
            loop {
                match link.inbound.try_recv() {
                    Ok(Upstream::Frame(frame)) => inbox.push((link.id.clone(), frame)),
                    Ok(Upstream::Close) | Err(TryRecvError::Disconnected) => {
                        gone.push(link.id.clone());
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }
        }

        let read = inbox.len();
        self.stats.frames_in += read as u64;
        for (peer, frame) in inbox {
            // Lookup per frame: an earlier frame may have changed the peer list
            if let Some(index) = self.index_of(&peer) {
                self.handle_frame(index, frame);
            }
        }

        for peer in gone {
            if let Some(index) = self.index_of(&peer) {
                self.leave_room(index, false);
                self.peers.remove(index);
                info!(peer = %peer, "peer closed its link");
            }
        }
        read
    }

    fn index_of(&self, peer: &str) -> Option<usize> {
        self.peers.iter().position(|link| link.id == peer)
    }

    fn handle_frame(&mut self, index: usize, frame: Frame) {
        match frame {
            Frame::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => self.handle_envelope(index, envelope, text),
                Err(err) => {
                    self.stats.frames_dropped += 1;
                    warn!(peer = %self.peers[index].id, %err, "malformed keyed frame dropped");
                }
            },
            Frame::Binary(bytes) => self.relay(index, Frame::Binary(bytes), false),
        }
    }

    fn handle_envelope(&mut self, index: usize, envelope: Envelope, text: String) {
        match RoomRequest::from_key(&envelope.key) {
            Some(RoomRequest::JoinRoom) => {
                match serde_json::from_value::<JoinRoomPayload>(envelope.data) {
                    Ok(request) => self.join_room(index, request),
                    Err(err) => {
                        self.stats.frames_dropped += 1;
                        warn!(peer = %self.peers[index].id, %err, "malformed join request");
                    }
                }
            }
            Some(RoomRequest::LeaveRoom) => self.leave_room(index, true),
            None => {
                if let Some(room) = self.peers[index].room.clone() {
                    if let Some(guid) = envelope.guid().filter(|_| !envelope.dont_save()) {
                        let guid = guid.to_owned();
                        if let Some(state) = self.rooms.get_mut(&room) {
                            state.store(guid, text.clone());
                        }
                    }
                }
                self.relay(index, Frame::Text(text), envelope.echo);
            }
        }
    }

    fn relay(&mut self, index: usize, frame: Frame, echo: bool) {
        let Some(room) = self.peers[index].room.clone() else {
            self.stats.frames_dropped += 1;
            debug!(peer = %self.peers[index].id, "frame from peer outside a room dropped");
            return;
        };
        let sender = self.peers[index].id.clone();
        let targets: Vec<usize> = self
            .peers
            .iter()
            .enumerate()
            .filter(|(_, link)| link.room.as_deref() == Some(room.as_str()))
            .filter(|(_, link)| echo || link.id != sender)
            .map(|(i, _)| i)
            .collect();
        for target in targets {
            self.deliver(target, frame.clone());
        }
    }

    fn join_room(&mut self, index: usize, request: JoinRoomPayload) {
        if self.peers[index].room.as_deref() == Some(request.room.as_str()) {
            debug!(peer = %self.peers[index].id, room = %request.room, "already in room");
            return;
        }
        self.leave_room(index, true);

        let peer = self.peers[index].id.clone();
        let room = self.rooms.entry(request.room.clone()).or_default();
        if !request.view_only {
            room.add_member(&peer);
        }
        let roster = room.members().to_vec();
        let replay = room.state().to_vec();
        self.peers[index].room = Some(request.room.clone());
        self.peers[index].view_only = request.view_only;
        info!(peer = %peer, room = %request.room, view_only = request.view_only, "peer joined room");

        self.send_event(
            index,
            RoomEvent::JoinedRoom,
            &JoinedRoomPayload { room: request.room.clone(), user_id: peer.clone(), in_room: roster },
        );
        if !request.view_only {
            self.broadcast_event(index, RoomEvent::UserJoinedRoom, &UserPresencePayload { user_id: peer });
        }
        for text in replay {
            self.deliver(index, Frame::Text(text));
        }
        self.send_event(index, RoomEvent::RoomStateSent, &json!({ "room": request.room }));
    }

    fn leave_room(&mut self, index: usize, notify_self: bool) {
        let Some(name) = self.peers[index].room.take() else {
            return;
        };
        let peer = self.peers[index].id.clone();
        let was_listed = !self.peers[index].view_only;
        self.peers[index].view_only = false;
        if let Some(room) = self.rooms.get_mut(&name) {
            room.remove_member(&peer);
        }
        info!(peer = %peer, room = %name, "peer left room");

        if was_listed {
            self.broadcast_to_room(&name, RoomEvent::UserLeftRoom, &UserPresencePayload { user_id: peer.clone() });
        }
        if notify_self {
            self.send_event(
                index,
                RoomEvent::LeftRoom,
                &JoinedRoomPayload { room: name.clone(), user_id: peer, in_room: Vec::new() },
            );
        }
        if !self.peers.iter().any(|link| link.room.as_deref() == Some(name.as_str())) {
            debug!(room = %name, "room empty, state discarded");
            self.rooms.remove(&name);
        }
    }

    fn broadcast_event(&mut self, index: usize, event: RoomEvent, payload: &impl Serialize) {
        let Some(room) = self.peers[index].room.clone() else {
            return;
        };
        let Some(frame) = event_frame(event, payload) else {
            return;
        };
        let sender = self.peers[index].id.clone();
        let targets: Vec<usize> = self
            .peers
            .iter()
            .enumerate()
            .filter(|(_, link)| link.id != sender && link.room.as_deref() == Some(room.as_str()))
            .map(|(i, _)| i)
            .collect();
        for target in targets {
            self.deliver(target, frame.clone());
        }
    }

    fn broadcast_to_room(&mut self, room: &str, event: RoomEvent, payload: &impl Serialize) {
        let Some(frame) = event_frame(event, payload) else {
            return;
        };
        let targets: Vec<usize> = self
            .peers
            .iter()
            .enumerate()
            .filter(|(_, link)| link.room.as_deref() == Some(room))
            .map(|(i, _)| i)
            .collect();
        for target in targets {
            self.deliver(target, frame.clone());
        }
    }

    fn send_event(&mut self, index: usize, event: RoomEvent, payload: &impl Serialize) {
        if let Some(frame) = event_frame(event, payload) {
            self.deliver(index, frame);
        }
    }

    fn deliver(&mut self, index: usize, frame: Frame) {
        if self.peers[index].outbound.send(Downstream::Frame(frame)).is_ok() {
            self.stats.frames_out += 1;
        } else {
            trace!(peer = %self.peers[index].id, "delivery to closed link skipped");
        }
    }
}

fn event_frame(event: RoomEvent, payload: &impl Serialize) -> Option<Frame> {
    let encoded = serde_json::to_value(payload)
        .and_then(|data| serde_json::to_string(&Envelope::new(event.key(), data)));
    match encoded {
        Ok(text) => Some(Frame::Text(text)),
        Err(err) => {
            error!(key = event.key(), %err, "failed to encode room event");
            None
        }
    }
}
