//! Per-user avatar state: head pose, scale and tracked hands.
//!
//! The record of a user is keyed by its connection id and guarded by an
//! ownership claim on that id. The claim is re-requested every few seconds
//! while it is not held, so a peer that reconnects under a new id, or
//! whose claim was lost in a room switch, picks its record back up.

use super::{now_ms, require_connection, set_world_pose, spawn_mirror, world_pose, MirrorSpawner};
use crate::config::NetworkConfig;
use crate::connection::{NetworkConnection, Subscription};
use crate::error::WireResult;
use crate::interpolation::{Pose, PoseInterpolator};
use crate::ownership::OwnershipModel;
use crate::wire::{required, BinaryModel, TableReader, TableWriter};
use crossbeam_channel::{unbounded, Receiver};
use std::collections::HashMap;
use tandem_core::{
    Behaviour, BehaviourError, ComponentKind, ComponentSchema, ComponentType, Context,
    FieldDescriptor, FieldKind, FieldValue, HookContext, HookResult, NodeId, PersistenceResult,
    Persistent,
};
use tandem_shared::{BinaryIdentifier, Quaternion, RoomEvent, UserPresencePayload, Vec3};
use tracing::{debug, info, trace};

/// State of one user, `VRUS` on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct UserStateModel {
    /// Connection id of the user
    pub guid: String,
    /// Wall-clock send time, milliseconds since the Unix epoch
    pub time: f64,
    /// Head position
    pub head_position: Vec3,
    /// Head rotation
    pub head_rotation: Quaternion,
    /// Avatar scale
    pub scale: f32,
    /// Left hand, when tracked
    pub left_hand: Option<Pose>,
    /// Right hand, when tracked
    pub right_hand: Option<Pose>,
}

impl UserStateModel {
    const GUID: u8 = 0;
    const TIME: u8 = 1;
    const HEAD_POSITION: u8 = 2;
    const HEAD_ROTATION: u8 = 3;
    const SCALE: u8 = 4;
    const LEFT_POSITION: u8 = 5;
    const LEFT_ROTATION: u8 = 6;
    const RIGHT_POSITION: u8 = 7;
    const RIGHT_ROTATION: u8 = 8;

    /// Returns true unless the state was sent more than `stale_after_ms`
    /// before `now_ms`.
    #[must_use]
    pub fn is_fresh(&self, now_ms: f64, stale_after_ms: f64) -> bool {
        now_ms - self.time <= stale_after_ms
    }
}

fn write_hand(writer: &mut TableWriter, slots: (u8, u8), hand: Option<Pose>) -> WireResult<()> {
    if let Some(pose) = hand {
        writer.write_vec3(slots.0, pose.position)?;
        writer.write_quaternion(slots.1, pose.rotation)?;
    }
    Ok(())
}

fn read_hand(reader: &mut TableReader<'_>, slots: (u8, u8)) -> WireResult<Option<Pose>> {
    let position = reader.read_vec3(slots.0)?;
    let rotation = reader.read_quaternion(slots.1)?;
    Ok(position.map(|position| Pose::new(position, rotation.unwrap_or(Quaternion::IDENTITY))))
}

impl BinaryModel for UserStateModel {
    const IDENTIFIER: BinaryIdentifier = BinaryIdentifier::USER_STATE;

    fn encode(&self, writer: &mut TableWriter) -> WireResult<()> {
        writer.write_str(Self::GUID, &self.guid)?;
        writer.write_f64(Self::TIME, self.time)?;
        writer.write_vec3(Self::HEAD_POSITION, self.head_position)?;
        writer.write_quaternion(Self::HEAD_ROTATION, self.head_rotation)?;
        writer.write_f32(Self::SCALE, self.scale)?;
        write_hand(writer, (Self::LEFT_POSITION, Self::LEFT_ROTATION), self.left_hand)?;
        write_hand(writer, (Self::RIGHT_POSITION, Self::RIGHT_ROTATION), self.right_hand)
    }

    fn decode(reader: &mut TableReader<'_>) -> WireResult<Self> {
        Ok(Self {
            guid: required(Self::GUID, reader.read_str(Self::GUID)?)?.to_owned(),
            time: reader.read_f64(Self::TIME)?.unwrap_or_default(),
            head_position: required(Self::HEAD_POSITION, reader.read_vec3(Self::HEAD_POSITION)?)?,
            head_rotation: reader.read_quaternion(Self::HEAD_ROTATION)?.unwrap_or(Quaternion::IDENTITY),
            scale: reader.read_f32(Self::SCALE)?.unwrap_or(1.0),
            left_hand: read_hand(reader, (Self::LEFT_POSITION, Self::LEFT_ROTATION))?,
            right_hand: read_hand(reader, (Self::RIGHT_POSITION, Self::RIGHT_ROTATION))?,
        })
    }
}

/// Mirror of another user.
#[derive(Debug)]
pub struct RemoteUser {
    /// Connection id of the user
    pub user_id: String,
    /// Mirror node, posed like the user's head
    pub node: NodeId,
    /// Last received scale
    pub scale: f32,
    /// Last received left hand
    pub left_hand: Option<Pose>,
    /// Last received right hand
    pub right_hand: Option<Pose>,
    /// Scene time of the last update, in seconds
    pub last_update: f64,
    interpolator: PoseInterpolator,
}

enum Inbound {
    State(UserStateModel),
    UserLeft(String),
    Left,
}

struct Link {
    connection: NetworkConnection,
    config: NetworkConfig,
    inbound: Receiver<Inbound>,
    _subscriptions: [Subscription; 3],
}

static SCHEMA: ComponentSchema = ComponentSchema::new(
    "UserStateSync",
    &[
        FieldDescriptor::new("head", FieldKind::NodeRef),
        FieldDescriptor::new("leftHand", FieldKind::NodeRef),
        FieldDescriptor::new("rightHand", FieldKind::NodeRef),
        FieldDescriptor::new("scale", FieldKind::Number),
    ],
);

/// Broadcasts the local user's avatar state and mirrors everyone else's.
pub struct UserStateSync {
    /// Head node. Defaults to the component's node.
    pub head: Option<NodeId>,
    /// Left hand node, if tracked
    pub left_hand: Option<NodeId>,
    /// Right hand node, if tracked
    pub right_hand: Option<NodeId>,
    /// Avatar scale sent with every state
    pub scale: f32,
    spawner: Option<MirrorSpawner>,
    ownership: Option<OwnershipModel>,
    frames_since_request: u32,
    remotes: HashMap<String, RemoteUser>,
    last_sent: Option<Pose>,
    last_send_time: Option<f64>,
    link: Option<Link>,
}

impl Default for UserStateSync {
    fn default() -> Self {
        Self {
            head: None,
            left_hand: None,
            right_hand: None,
            scale: 1.0,
            spawner: None,
            ownership: None,
            frames_since_request: 0,
            remotes: HashMap::new(),
            last_sent: None,
            last_send_time: None,
            link: None,
        }
    }
}

impl UserStateSync {
    /// Creates a user state sync for the component's node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates remote mirrors with `spawner` instead of empty root nodes.
    #[must_use]
    pub fn with_spawner<F>(mut self, spawner: F) -> Self
    where
        F: FnMut(&mut Context, &str, NodeId) -> Option<NodeId> + 'static,
    {
        self.spawner = Some(Box::new(spawner));
        self
    }

    /// Ownership of the local user's record, once in a room.
    #[must_use]
    pub fn ownership(&self) -> Option<&OwnershipModel> {
        self.ownership.as_ref()
    }

    /// Mirrored user by connection id.
    #[must_use]
    pub fn remote(&self, user: &str) -> Option<&RemoteUser> {
        self.remotes.get(user)
    }

    /// Number of mirrored users.
    #[must_use]
    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    /// Keeps an ownership model for the current connection id and re-requests
    /// the claim while it is not held.
    fn maintain_ownership(&mut self, connection: &NetworkConnection, rerequest_frames: u32) {
        let Some(local) = connection.connection_id().filter(|_| connection.is_in_room()) else {
            return;
        };
        if self.ownership.as_ref().map_or(true, |model| model.guid() != local) {
            debug!(user = %local, "tracking user state ownership");
            self.ownership = Some(OwnershipModel::new(connection, local));
            self.frames_since_request = rerequest_frames;
        }
        let Some(model) = &self.ownership else {
            return;
        };
        if model.has_ownership() {
            self.frames_since_request = 0;
            return;
        }
        self.frames_since_request += 1;
        if self.frames_since_request >= rerequest_frames && model.request_ownership_if_not_owned() {
            self.frames_since_request = 0;
        }
    }

    fn receive(
        &mut self,
        cx: &mut HookContext<'_>,
        config: &NetworkConfig,
        connection: &NetworkConnection,
        model: UserStateModel,
    ) {
        if connection.is_local(&model.guid) {
            trace!("own user state echo dropped");
            return;
        }
        if !model.is_fresh(now_ms(), config.sync.stale_after_ms) {
            debug!(user = %model.guid, "stale user state dropped");
            return;
        }
        if !connection.user_is_in_room(&model.guid) {
            trace!(user = %model.guid, "user state from outside the room dropped");
            return;
        }

        let now = cx.time().time();
        let target = Pose::new(model.head_position, model.head_rotation);
        let live = self
            .remotes
            .get(&model.guid)
            .is_some_and(|remote| cx.scene().contains_node(remote.node));
        if !live {
            let origin = cx.node();
            let Some(node) = spawn_mirror(cx, self.spawner.as_mut(), "Remote User", &model.guid, origin) else {
                return;
            };
            info!(user = %model.guid, ?node, "remote user spawned");
            set_world_pose(cx, node, target);
            self.remotes.insert(
                model.guid.clone(),
                RemoteUser {
                    user_id: model.guid.clone(),
                    node,
                    scale: model.scale,
                    left_hand: None,
                    right_hand: None,
                    last_update: now,
                    interpolator: PoseInterpolator::new(config.sync.blend_seconds),
                },
            );
        } else if let Some(remote) = self.remotes.get_mut(&model.guid) {
            let current = world_pose(cx, remote.node).unwrap_or(target);
            remote.interpolator.set_target(current, target);
        }

        if let Some(remote) = self.remotes.get_mut(&model.guid) {
            remote.scale = model.scale;
            remote.left_hand = model.left_hand;
            remote.right_hand = model.right_hand;
            remote.last_update = now;
            apply_scale(cx, remote.node, model.scale);
        }
    }

    fn remove_where(&mut self, cx: &mut HookContext<'_>, mut predicate: impl FnMut(&RemoteUser) -> bool) {
        let gone: Vec<String> = self
            .remotes
            .iter()
            .filter(|(_, remote)| predicate(remote))
            .map(|(id, _)| id.clone())
            .collect();
        for id in gone {
            if let Some(remote) = self.remotes.remove(&id) {
                debug!(user = %remote.user_id, "remote user removed");
                if cx.scene().contains_node(remote.node) {
                    cx.destroy_node(remote.node);
                }
            }
        }
    }

    fn send_if_due(
        &mut self,
        cx: &HookContext<'_>,
        config: &NetworkConfig,
        connection: &NetworkConnection,
    ) -> HookResult {
        let Some(model) = self.ownership.as_ref().filter(|model| model.has_ownership()) else {
            return Ok(());
        };
        let Some(head) = world_pose(cx, self.head.unwrap_or_else(|| cx.node())) else {
            return Ok(());
        };
        let sync = &config.sync;
        let now = cx.time().time();
        let moved = self
            .last_sent
            .map_or(true, |last| head.moved_from(&last, sync.position_threshold, sync.rotation_threshold));
        let due = cx.time().frame() % u64::from(sync.send_interval_frames.max(1)) == 0;
        let keepalive = self
            .last_send_time
            .map_or(true, |sent| now - sent >= f64::from(sync.keepalive_seconds));
        if !((moved && due) || keepalive) {
            return Ok(());
        }

        let state = UserStateModel {
            guid: model.guid(),
            time: now_ms(),
            head_position: head.position,
            head_rotation: head.rotation,
            scale: self.scale,
            left_hand: self.left_hand.and_then(|node| world_pose(cx, node)),
            right_hand: self.right_hand.and_then(|node| world_pose(cx, node)),
        };
        connection.send_model(&state).map_err(|err| BehaviourError::Other(Box::new(err)))?;
        self.last_sent = Some(head);
        self.last_send_time = Some(now);
        Ok(())
    }
}

fn apply_scale(cx: &mut Context, node: NodeId, scale: f32) {
    let scene = cx.scene_mut();
    if let Some(mut transform) = scene.transform(node) {
        transform.scale = Vec3::new(scale, scale, scale);
        scene.set_transform(node, transform);
    }
}

impl ComponentKind for UserStateSync {
    const TYPE: &'static ComponentType = &ComponentType::new("UserStateSync");
}

impl Behaviour for UserStateSync {
    fn component_type(&self) -> &'static ComponentType {
        Self::TYPE
    }

    fn on_enable(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        let connection = require_connection(cx)?;

        let (tx, rx) = unbounded();
        let states = tx.clone();
        let state_listener = connection.subscribe_binary::<UserStateModel, _>(move |_, model| {
            let _ = states.send(Inbound::State(model));
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

        self.last_sent = None;
        self.last_send_time = None;
        self.link = Some(Link {
            config: connection.config(),
            connection,
            inbound: rx,
            _subscriptions: [state_listener, left_listener, room_listener],
        });
        Ok(())
    }

    fn on_disable(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        if let Some(model) = self.ownership.take() {
            model.free_ownership();
        }
        self.link = None;
        self.remove_where(cx, |_| true);
        Ok(())
    }

    fn update(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        let Some(link) = &self.link else {
            return Ok(());
        };
        let connection = link.connection.clone();
        let config = link.config.clone();
        let inbound: Vec<Inbound> = link.inbound.try_iter().collect();

        self.maintain_ownership(&connection, config.ownership.rerequest_frames.max(1));
        for message in inbound {
            match message {
                Inbound::State(model) => self.receive(cx, &config, &connection, model),
                Inbound::UserLeft(user) => self.remove_where(cx, |remote| remote.user_id == user),
                Inbound::Left => self.remove_where(cx, |_| true),
            }
        }

        let now = cx.time().time();
        let timeout = f64::from(config.sync.remote_timeout_seconds);
        self.remove_where(cx, |remote| now - remote.last_update > timeout);

        let dt = cx.time().delta_time();
        for remote in self.remotes.values_mut() {
            if let Some(pose) = remote.interpolator.update(dt) {
                set_world_pose(cx, remote.node, pose);
            }
        }

        self.send_if_due(cx, &config, &connection)
    }

    fn persistent(&self) -> Option<&dyn Persistent> {
        Some(self)
    }

    fn persistent_mut(&mut self) -> Option<&mut dyn Persistent> {
        Some(self)
    }
}

impl Persistent for UserStateSync {
    fn schema(&self) -> &'static ComponentSchema {
        &SCHEMA
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "head" => FieldValue::Node(self.head),
            "leftHand" => FieldValue::Node(self.left_hand),
            "rightHand" => FieldValue::Node(self.right_hand),
            "scale" => FieldValue::Number(f64::from(self.scale)),
            _ => return None,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_field(&mut self, name: &str, value: FieldValue) -> PersistenceResult<()> {
        let mismatch = || SCHEMA.type_mismatch(name);
        match name {
            "head" => self.head = value.as_node().ok_or_else(mismatch)?,
            "leftHand" => self.left_hand = value.as_node().ok_or_else(mismatch)?,
            "rightHand" => self.right_hand = value.as_node().ok_or_else(mismatch)?,
            "scale" => self.scale = value.as_f64().ok_or_else(mismatch)? as f32,
            _ => return Err(SCHEMA.unknown_field(name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::RoomHub;
    use tandem_core::Parent;

    const DT: f32 = 1.0 / 60.0;

    fn peer(hub: &mut RoomHub) -> (Context, NetworkConnection) {
        let mut cx = Context::new();
        let connection = NetworkConnection::default();
        connection.connect(hub.connect());
        connection.install(&mut cx);
        connection.join_room("avatars");
        (cx, connection)
    }

    fn settle(hub: &mut RoomHub, peers: &mut [&mut Context], rounds: usize) {
        for _ in 0..rounds {
            hub.pump();
            for cx in peers.iter_mut() {
                cx.tick(DT);
            }
        }
    }

    fn state(time: f64) -> UserStateModel {
        UserStateModel {
            guid: "peer-1".into(),
            time,
            head_position: Vec3::new(0.0, 1.6, 0.0),
            head_rotation: Quaternion::IDENTITY,
            scale: 1.0,
            left_hand: Some(Pose::new(Vec3::new(-0.3, 1.2, 0.2), Quaternion::IDENTITY)),
            right_hand: None,
        }
    }

    #[test]
    fn test_hands_are_optional_on_the_wire() {
        let model = state(1_000.0);
        let decoded = UserStateModel::from_frame(&model.to_frame().unwrap()).unwrap();
        assert_eq!(decoded, model);
        assert!(decoded.right_hand.is_none());
    }

    #[test]
    fn test_freshness() {
        let model = state(10_000.0);
        assert!(model.is_fresh(12_000.0, 5_000.0));
        assert!(!model.is_fresh(15_001.0, 5_000.0));
    }

    #[test]
    fn test_owner_state_mirrored_on_peer() {
        let mut hub = RoomHub::new();
        let (mut a, a_conn) = peer(&mut hub);
        let (mut b, _b_conn) = peer(&mut hub);
        settle(&mut hub, &mut [&mut a, &mut b], 3);

        let a_head = a.create_node("head", Parent::Root).unwrap();
        a.scene_mut().set_world_position(a_head, Vec3::new(0.0, 1.6, 0.0));
        let a_sync = a.attach(a_head, UserStateSync { scale: 1.5, ..UserStateSync::new() }).unwrap();
        let b_root = b.create_node("avatars", Parent::Root).unwrap();
        let b_sync = b.attach(b_root, UserStateSync::new()).unwrap();
        settle(&mut hub, &mut [&mut a, &mut b], 8);

        let a_id = a_conn.connection_id().unwrap();
        let ownership = a.scene().component::<UserStateSync>(a_sync).unwrap().ownership().unwrap();
        assert!(ownership.has_ownership());
        assert_eq!(ownership.guid(), a_id);

        let sync = b.scene().component::<UserStateSync>(b_sync).unwrap();
        let remote = sync.remote(&a_id).unwrap();
        assert!((remote.scale - 1.5).abs() < f32::EPSILON);
        let node = remote.node;
        assert_eq!(b.scene().transform(node).unwrap().scale, Vec3::new(1.5, 1.5, 1.5));

        a_conn.leave_room();
        settle(&mut hub, &mut [&mut a, &mut b], 3);
        assert_eq!(b.scene().component::<UserStateSync>(b_sync).unwrap().remote_count(), 0);
        assert!(!b.scene().contains_node(node));
    }

    #[test]
    fn test_persistent_fields() {
        let mut sync = UserStateSync::new();
        sync.set_field("scale", FieldValue::Number(2.0)).unwrap();
        assert_eq!(sync.field("scale"), Some(FieldValue::Number(2.0)));
        assert_eq!(sync.field("leftHand"), Some(FieldValue::Node(None)));
        assert!(sync.set_field("head", FieldValue::Number(1.0)).is_err());
    }
}
