//! Per-user camera sync.
//!
//! Every peer broadcasts its own camera and mirrors everyone else's. A
//! camera needs no ownership: its guid is the sender's connection id with
//! a `_camera` suffix, and only that peer ever sends it.

use super::{require_connection, set_world_pose, spawn_mirror, world_pose, MirrorSpawner};
use crate::config::SyncConfig;
use crate::connection::{NetworkConnection, Subscription};
use crate::error::WireResult;
use crate::interpolation::{Pose, PoseInterpolator};
use crate::wire::{required, BinaryModel, TableReader, TableWriter};
use crossbeam_channel::{unbounded, Receiver};
use std::collections::HashMap;
use tandem_core::{
    Behaviour, BehaviourError, ComponentKind, ComponentSchema, ComponentType, FieldDescriptor,
    FieldKind, FieldValue, HookContext, HookResult, NodeId, PersistenceResult, Persistent,
};
use tandem_shared::constants::CAMERA_GUID_SUFFIX;
use tandem_shared::{BinaryIdentifier, Quaternion, RoomEvent, UserPresencePayload, Vec3};
use tracing::{debug, info, trace};

/// Camera pose of one user, `SCAM` on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraModel {
    /// `<userId>_camera`
    pub guid: String,
    /// Connection id of the sender
    pub user_id: String,
    /// World position
    pub position: Vec3,
    /// World rotation
    pub rotation: Quaternion,
}

impl CameraModel {
    const GUID: u8 = 0;
    const USER_ID: u8 = 1;
    const POSITION: u8 = 2;
    const ROTATION: u8 = 3;

    /// Camera guid of `user`.
    #[must_use]
    pub fn guid_for(user: &str) -> String {
        format!("{user}{CAMERA_GUID_SUFFIX}")
    }
}

impl BinaryModel for CameraModel {
    const IDENTIFIER: BinaryIdentifier = BinaryIdentifier::SYNCED_CAMERA;

    fn encode(&self, writer: &mut TableWriter) -> WireResult<()> {
        writer.write_str(Self::GUID, &self.guid)?;
        writer.write_str(Self::USER_ID, &self.user_id)?;
        writer.write_vec3(Self::POSITION, self.position)?;
        writer.write_quaternion(Self::ROTATION, self.rotation)
    }

    fn decode(reader: &mut TableReader<'_>) -> WireResult<Self> {
        let guid = reader.read_str(Self::GUID)?.map(str::to_owned);
        let user_id = required(Self::USER_ID, reader.read_str(Self::USER_ID)?)?.to_owned();
        Ok(Self {
            guid: guid.unwrap_or_else(|| Self::guid_for(&user_id)),
            user_id,
            position: required(Self::POSITION, reader.read_vec3(Self::POSITION)?)?,
            rotation: reader.read_quaternion(Self::ROTATION)?.unwrap_or(Quaternion::IDENTITY),
        })
    }
}

/// Mirror of another user's camera.
#[derive(Debug)]
pub struct RemoteCamera {
    /// Connection id of the user
    pub user_id: String,
    /// Mirror node
    pub node: NodeId,
    /// Scene time of the last update, in seconds
    pub last_update: f64,
    interpolator: PoseInterpolator,
}

enum Inbound {
    Camera(CameraModel),
    UserLeft(String),
    Left,
}

struct Link {
    connection: NetworkConnection,
    inbound: Receiver<Inbound>,
    _subscriptions: [Subscription; 3],
}

static SCHEMA: ComponentSchema =
    ComponentSchema::new("SyncedCamera", &[FieldDescriptor::new("camera", FieldKind::NodeRef)]);

/// Broadcasts the local camera and mirrors the cameras of the room.
pub struct SyncedCamera {
    /// Node whose pose is broadcast. Defaults to the component's node.
    pub camera: Option<NodeId>,
    spawner: Option<MirrorSpawner>,
    remotes: HashMap<String, RemoteCamera>,
    last_pose: Option<Pose>,
    last_send: Option<f64>,
    settings: SyncConfig,
    link: Option<Link>,
}

impl Default for SyncedCamera {
    fn default() -> Self {
        Self {
            camera: None,
            spawner: None,
            remotes: HashMap::new(),
            last_pose: None,
            last_send: None,
            settings: SyncConfig::default(),
            link: None,
        }
    }
}

impl SyncedCamera {
    /// Creates a camera sync broadcasting the pose of its own node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates remote mirrors with `spawner` instead of empty root nodes.
    #[must_use]
    pub fn with_spawner<F>(mut self, spawner: F) -> Self
    where
        F: FnMut(&mut tandem_core::Context, &str, NodeId) -> Option<NodeId> + 'static,
    {
        self.spawner = Some(Box::new(spawner));
        self
    }

    /// Mirrors by camera guid.
    pub fn remote_cameras(&self) -> impl Iterator<Item = &RemoteCamera> {
        self.remotes.values()
    }

    /// Mirror node of `user`'s camera.
    #[must_use]
    pub fn camera_of(&self, user: &str) -> Option<NodeId> {
        self.remotes.get(&CameraModel::guid_for(user)).map(|remote| remote.node)
    }

    /// Number of mirrored cameras.
    #[must_use]
    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    fn receive(&mut self, cx: &mut HookContext<'_>, connection: &NetworkConnection, model: CameraModel) {
        if connection.is_local(&model.user_id) || !connection.user_is_in_room(&model.user_id) {
            trace!(user = %model.user_id, "camera update ignored");
            return;
        }
        let now = cx.time().time();
        let target = Pose::new(model.position, model.rotation);

        let live = self
            .remotes
            .get(&model.guid)
            .is_some_and(|remote| cx.scene().contains_node(remote.node));
        if !live {
            let origin = cx.node();
            let Some(node) = spawn_mirror(cx, self.spawner.as_mut(), "Remote Camera", &model.user_id, origin) else {
                return;
            };
            info!(user = %model.user_id, ?node, "remote camera spawned");
            set_world_pose(cx, node, target);
            self.remotes.insert(
                model.guid.clone(),
                RemoteCamera {
                    user_id: model.user_id,
                    node,
                    last_update: now,
                    interpolator: PoseInterpolator::new(self.settings.blend_seconds),
                },
            );
            return;
        }

        if let Some(remote) = self.remotes.get_mut(&model.guid) {
            let current = world_pose(cx, remote.node).unwrap_or(target);
            remote.interpolator.set_target(current, target);
            remote.last_update = now;
        }
    }

    fn remove_where(&mut self, cx: &mut HookContext<'_>, mut predicate: impl FnMut(&RemoteCamera) -> bool) {
        let gone: Vec<String> = self
            .remotes
            .iter()
            .filter(|(_, remote)| predicate(remote))
            .map(|(guid, _)| guid.clone())
            .collect();
        for guid in gone {
            if let Some(remote) = self.remotes.remove(&guid) {
                debug!(user = %remote.user_id, "remote camera removed");
                if cx.scene().contains_node(remote.node) {
                    cx.destroy_node(remote.node);
                }
            }
        }
    }

    fn send_if_due(&mut self, cx: &HookContext<'_>, connection: &NetworkConnection) -> HookResult {
        let Some(user_id) = connection.connection_id().filter(|_| connection.is_in_room()) else {
            return Ok(());
        };
        let Some(pose) = world_pose(cx, self.camera.unwrap_or_else(|| cx.node())) else {
            return Ok(());
        };
        let now = cx.time().time();
        let moved = self.last_pose.map_or(true, |last| {
            pose.moved_from(&last, self.settings.position_threshold, self.settings.rotation_threshold)
        });
        let due = cx.time().frame() % u64::from(self.settings.send_interval_frames.max(1)) == 0;
        let keepalive = self
            .last_send
            .map_or(true, |sent| now - sent >= f64::from(self.settings.keepalive_seconds));
        if !((moved && due) || keepalive) {
            return Ok(());
        }

        let model = CameraModel {
            guid: CameraModel::guid_for(&user_id),
            user_id,
            position: pose.position,
            rotation: pose.rotation,
        };
        connection.send_model(&model).map_err(|err| BehaviourError::Other(Box::new(err)))?;
        self.last_pose = Some(pose);
        self.last_send = Some(now);
        Ok(())
    }
}

impl ComponentKind for SyncedCamera {
    const TYPE: &'static ComponentType = &ComponentType::new("SyncedCamera");
}

impl Behaviour for SyncedCamera {
    fn component_type(&self) -> &'static ComponentType {
        Self::TYPE
    }

    fn on_enable(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        let connection = require_connection(cx)?;
        self.settings = connection.config().sync;

        let (tx, rx) = unbounded();
        let cameras = tx.clone();
        let camera_listener = connection.subscribe_binary::<CameraModel, _>(move |_, model| {
            let _ = cameras.send(Inbound::Camera(model));
            Ok(())
        });
        let departures = tx.clone();
        let left_listener = connection.on_room_event(RoomEvent::UserLeftRoom, move |_, data| {
            if let Ok(payload) = serde_json::from_value::<UserPresencePayload>(data.clone()) {
                let _ = departures.send(Inbound::UserLeft(payload.user_id));
            }
            Ok(())
        });
        let room_listener = connection.on_room_event(RoomEvent::LeftRoom, move |_, _| {
            let _ = tx.send(Inbound::Left);
            Ok(())
        });

        self.last_pose = None;
        self.last_send = None;
        self.link = Some(Link {
            connection,
            inbound: rx,
            _subscriptions: [camera_listener, left_listener, room_listener],
        });
        Ok(())
    }

    fn on_disable(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        self.link = None;
        self.remove_where(cx, |_| true);
        Ok(())
    }

    fn update(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        let Some(link) = &self.link else {
            return Ok(());
        };
        let connection = link.connection.clone();
        let inbound: Vec<Inbound> = link.inbound.try_iter().collect();
        for message in inbound {
            match message {
                Inbound::Camera(model) => self.receive(cx, &connection, model),
                Inbound::UserLeft(user) => self.remove_where(cx, |remote| remote.user_id == user),
                Inbound::Left => self.remove_where(cx, |_| true),
            }
        }

        let now = cx.time().time();
        let timeout = f64::from(self.settings.remote_timeout_seconds);
        self.remove_where(cx, |remote| now - remote.last_update > timeout);

        let dt = cx.time().delta_time();
        for remote in self.remotes.values_mut() {
            if let Some(pose) = remote.interpolator.update(dt) {
                set_world_pose(cx, remote.node, pose);
            }
        }

        self.send_if_due(cx, &connection)
    }

    fn persistent(&self) -> Option<&dyn Persistent> {
        Some(self)
    }

    fn persistent_mut(&mut self) -> Option<&mut dyn Persistent> {
        Some(self)
    }
}

impl Persistent for SyncedCamera {
    fn schema(&self) -> &'static ComponentSchema {
        &SCHEMA
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        (name == "camera").then_some(FieldValue::Node(self.camera))
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> PersistenceResult<()> {
        if name != "camera" {
            return Err(SCHEMA.unknown_field(name));
        }
        self.camera = value.as_node().ok_or_else(|| SCHEMA.type_mismatch(name))?;
        Ok(())
    }
}
