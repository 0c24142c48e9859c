//! # TANDEM Networking
//!
//! Room-scoped sharing of live scene objects between peers.
//!
//! ## Architecture
//!
//! ```text
//! Context ──► NetworkConnection ──► Transport ──► RoomHub (relay)
//!                 │    ▲                              │
//!                 │    └──── keyed / binary frames ◄──┘
//!                 ▼
//!          listeners ──► component inboxes ──► frame hooks
//!                             │
//!                OwnershipModel  SyncedTransform  SyncedCamera
//!                               UserStateSync  FieldSync
//! ```
//!
//! ## Delivery
//!
//! Keyed messages are JSON envelopes routed by key. Binary frames start
//! with a 4-byte identifier (`STRS`, `SCAM`, `VRUS`) and are decoded before
//! they reach their listeners. Everything runs on the frame loop: the
//! connection polls at `PreUpdate` and flushes queued traffic at
//! `PostRender`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tandem_networking::{NetworkConnection, RoomHub, SyncedTransform};
//!
//! let mut hub = RoomHub::new();
//! let connection = NetworkConnection::default();
//! connection.connect(hub.connect());
//! connection.install(&mut cx);
//! connection.join_room("lobby");
//!
//! cx.attach_with(node, SyncedTransform::new(), AttachOptions::new().guid("crate-1"));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod interpolation;
pub mod ownership;
pub mod server;
pub mod sync;
pub mod transport;
pub mod wire;

pub use config::{NetworkConfig, OwnershipConfig, SyncConfig};
pub use connection::{
    BinaryMessage, ListenerId, ListenerKey, NetworkConnection, Subscription, WeakConnection,
};
pub use error::{
    ListenerError, ListenerResult, NetworkError, NetworkResult, WireError, WireResult,
};
pub use interpolation::{InterpolationMode, Pose, PoseInterpolator};
pub use ownership::{OwnershipClaim, OwnershipModel, OwnershipQuery, OwnershipState};
pub use server::{HubStats, RoomHub};
pub use sync::{
    register_sync_types, CameraModel, FieldSync, MirrorSpawner, RemoteCamera, RemoteUser,
    SyncedCamera, SyncedTransform, TransformModel, UserStateModel, UserStateSync,
};
pub use transport::{Frame, MemoryTransport, Transport, TransportEvent, TransportStats};
pub use wire::BinaryModel;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
