//! # Sync Components
//!
//! Behaviours that mirror scene state between the peers of a room.
//!
//! | Component         | Channel          | Authority                  |
//! |-------------------|------------------|----------------------------|
//! | [`SyncedTransform`] | binary `STRS`  | ownership of its guid      |
//! | [`SyncedCamera`]    | binary `SCAM`  | each peer its own camera   |
//! | [`UserStateSync`]   | binary `VRUS`  | ownership of the peer id   |
//! | [`FieldSync`]       | keyed per type | none, last write wins      |
//!
//! Listeners never touch the scene. They push what they receive into a
//! channel owned by the component, and the component applies it from its
//! own frame hook, where it has the node and the context at hand.

mod camera;
mod fields;
mod transform;
mod user_state;

pub use camera::{CameraModel, RemoteCamera, SyncedCamera};
pub use fields::FieldSync;
pub use transform::{SyncedTransform, TransformModel};
pub use user_state::{RemoteUser, UserStateModel, UserStateSync};

use crate::connection::NetworkConnection;
use crate::interpolation::Pose;
use std::time::{SystemTime, UNIX_EPOCH};
use tandem_core::{BehaviourError, Context, NodeId, Parent, TypeStore};
use tracing::warn;

/// Creates the mirror node of a remote peer.
///
/// Called with the peer's connection id and the node of the spawning
/// component. Returning `None` skips the peer until its next update.
pub type MirrorSpawner = Box<dyn FnMut(&mut Context, &str, NodeId) -> Option<NodeId>>;

/// Registers every sync component with a type store, so scene documents
/// can carry them.
pub fn register_sync_types(store: &mut TypeStore) -> &mut TypeStore {
    store
        .register::<SyncedTransform>()
        .register::<SyncedCamera>()
        .register::<UserStateSync>()
        .register::<FieldSync>()
}

/// Wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64() * 1000.0)
}

/// The connection installed in `cx`, or the error a hook reports without one.
pub(crate) fn require_connection(cx: &Context) -> Result<NetworkConnection, BehaviourError> {
    NetworkConnection::from_context(cx).ok_or(BehaviourError::MissingResource("NetworkConnection"))
}

pub(crate) fn world_pose(cx: &Context, node: NodeId) -> Option<Pose> {
    let scene = cx.scene();
    Some(Pose::new(scene.world_position(node)?, scene.world_rotation(node)?))
}

pub(crate) fn set_world_pose(cx: &mut Context, node: NodeId, pose: Pose) {
    let scene = cx.scene_mut();
    if !(scene.set_world_position(node, pose.position) && scene.set_world_rotation(node, pose.rotation)) {
        warn!(?node, "pose applied to unknown node");
    }
}

/// Creates a mirror with `spawner`, or an empty root node without one.
///
/// `origin` is only handed to the spawner. Default mirrors are roots so they
/// never move with the local rig.
pub(crate) fn spawn_mirror(
    cx: &mut Context,
    spawner: Option<&mut MirrorSpawner>,
    label: &str,
    user: &str,
    origin: NodeId,
) -> Option<NodeId> {
    if let Some(spawner) = spawner {
        return spawner(cx, user, origin);
    }
    match cx.create_node(format!("{label} {user}"), Parent::Root) {
        Ok(node) => Some(node),
        Err(err) => {
            warn!(%err, "failed to create mirror node");
            None
        }
    }
}
