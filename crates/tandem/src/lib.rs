//! # TANDEM
//!
//! Scene runtime with room-based ownership sync.
//!
//! ```text
//! tandem
//!  ├── core        scene graph, lifecycle, scheduler, persistence
//!  ├── networking  room connection, ownership, sync components
//!  └── shared      math, protocol keys, delivery classes
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tandem::prelude::*;
//!
//! let mut hub = RoomHub::new();
//! let mut peer = Peer::connect(&mut hub, NetworkConfig::default());
//! peer.connection.join_room("lobby");
//!
//! loop {
//!     hub.pump();
//!     peer.tick(1.0 / 60.0);
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub use tandem_core as core;
pub use tandem_networking as networking;
pub use tandem_shared as shared;

use tandem_core::{Context, FrameStats, RuntimeConfig, TypeStore};
use tandem_networking::{register_sync_types, NetworkConfig, NetworkConnection, Transport};

/// Common imports for applications.
pub mod prelude {
    pub use super::{default_type_store, Peer};
    pub use tandem_core::{
        AttachOptions, Behaviour, ComponentKind, ComponentType, Context, FrameEvent, HookContext,
        HookResult, NodeId, Parent,
    };
    pub use tandem_networking::{
        FieldSync, NetworkConfig, NetworkConnection, OwnershipModel, RoomHub, SyncedCamera,
        SyncedTransform, UserStateSync,
    };
    pub use tandem_shared::{Quaternion, RoomEvent, SendQueue, Vec3};
}

/// A type store that knows every sync component.
#[must_use]
pub fn default_type_store() -> TypeStore {
    let mut store = TypeStore::new();
    register_sync_types(&mut store);
    store
}

/// One participant: a context with a connection installed in it.
pub struct Peer {
    /// Scene and frame loop
    pub cx: Context,
    /// Room connection, also stored as a resource of `cx`
    pub connection: NetworkConnection,
}

impl Peer {
    /// Creates a peer on `transport`.
    pub fn new(transport: impl Transport + 'static, runtime: RuntimeConfig, network: NetworkConfig) -> Self {
        let mut cx = Context::with_config(runtime);
        let connection = NetworkConnection::new(network);
        connection.connect(transport);
        connection.install(&mut cx);
        Self { cx, connection }
    }

    /// Creates a peer linked to `hub`, with the default runtime settings.
    pub fn connect(hub: &mut tandem_networking::RoomHub, network: NetworkConfig) -> Self {
        Self::new(hub.connect(), RuntimeConfig::default(), network)
    }

    /// Runs one frame.
    pub fn tick(&mut self, delta_seconds: f32) -> FrameStats {
        self.cx.tick(delta_seconds)
    }
}
