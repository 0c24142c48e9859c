//! # TANDEM Shared
//!
//! Common types used by every peer and by the room relay.
//!
//! ## Contents
//!
//! - [`math`]: vectors, quaternions and transforms
//! - [`protocol`]: delivery classes, binary identifiers, keyed envelopes
//! - [`events`]: room lifecycle and ownership message keys
//! - [`constants`]: protocol defaults shared by runtime and relay

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod events;
pub mod math;
pub mod protocol;

pub use constants::{BINARY_IDENTIFIER_LEN, COMPONENTS_EXTENSION};
pub use events::{
    JoinRoomPayload, JoinedRoomPayload, OwnershipEvent, RoomEvent, RoomRequest,
    UserPresencePayload,
};
pub use math::{Quaternion, Transform, Vec3};
pub use protocol::{BinaryIdentifier, Envelope, SendQueue};
