//! Room lifecycle and ownership message keys.
//!
//! Room events are delivered through the same keyed pub/sub as application
//! messages, so consumers subscribe with [`RoomEvent::key`].

use serde::{Deserialize, Serialize};

/// Room lifecycle signal emitted by the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoomEvent {
    /// The local peer finished joining a room.
    JoinedRoom,
    /// The local peer left its room.
    LeftRoom,
    /// Another peer joined the local peer's room.
    UserJoinedRoom,
    /// Another peer left the local peer's room.
    UserLeftRoom,
    /// Stored room state has been fully replayed after a join.
    RoomStateSent,
}

impl RoomEvent {
    /// All room events
    pub const ALL: [Self; 5] = [
        Self::JoinedRoom,
        Self::LeftRoom,
        Self::UserJoinedRoom,
        Self::UserLeftRoom,
        Self::RoomStateSent,
    ];

    /// Listener key of this event.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::JoinedRoom => "joined-room",
            Self::LeftRoom => "left-room",
            Self::UserJoinedRoom => "user-joined-room",
            Self::UserLeftRoom => "user-left-room",
            Self::RoomStateSent => "room-state-sent",
        }
    }

    /// Parses a listener key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.key() == key)
    }
}

/// Request sent by a peer to the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoomRequest {
    /// Join (or switch to) a room.
    JoinRoom,
    /// Leave the current room.
    LeaveRoom,
}

impl RoomRequest {
    /// Wire key of this request.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::JoinRoom => "join-room",
            Self::LeaveRoom => "leave-room",
        }
    }

    /// Parses a wire key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "join-room" => Some(Self::JoinRoom),
            "leave-room" => Some(Self::LeaveRoom),
            _ => None,
        }
    }
}

/// Ownership protocol messages. All are plain room broadcasts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OwnershipEvent {
    /// A peer claims a guid.
    Claim,
    /// The owner of a guid released it.
    Free,
    /// A peer asks the current owner of a guid to re-broadcast its claim.
    Query,
}

impl OwnershipEvent {
    /// Listener key of this message.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Claim => "ownership-claim",
            Self::Free => "ownership-free",
            Self::Query => "ownership-query",
        }
    }
}

/// Payload of [`RoomRequest::JoinRoom`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    /// Room name
    pub room: String,
    /// Join without being listed in the roster
    #[serde(default)]
    pub view_only: bool,
}

/// Payload of [`RoomEvent::JoinedRoom`] and [`RoomEvent::LeftRoom`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoomPayload {
    /// Room name
    pub room: String,
    /// Connection id of the local peer
    pub user_id: String,
    /// Roster at the time of joining, local peer included
    #[serde(default)]
    pub in_room: Vec<String>,
}

/// Payload of [`RoomEvent::UserJoinedRoom`] and [`RoomEvent::UserLeftRoom`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresencePayload {
    /// Connection id of the peer that joined or left
    pub user_id: String,
}
