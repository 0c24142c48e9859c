//! Multi-peer scenarios through the in-process relay: pose sync under
//! ownership, contested claims, departures, room state replay, and the
//! per-user camera and avatar mirrors.

use serde_json::json;
use tandem_core::{AttachOptions, ComponentId, Context, NodeId, Parent};
use tandem_networking::{
    ListenerKey, NetworkConfig, NetworkConnection, OwnershipState, RoomHub, SyncConfig, SyncedCamera,
    SyncedTransform, TransformModel, UserStateSync,
};
use tandem_shared::{BinaryIdentifier, Quaternion, SendQueue, Vec3};

const DT: f32 = 1.0 / 60.0;

struct Peer {
    cx: Context,
    connection: NetworkConnection,
}

impl Peer {
    fn join(hub: &mut RoomHub, room: &str) -> Self {
        Self::join_with(hub, room, NetworkConfig::default())
    }

    fn join_with(hub: &mut RoomHub, room: &str, config: NetworkConfig) -> Self {
        let mut cx = Context::new();
        let connection = NetworkConnection::new(config);
        connection.connect(hub.connect());
        connection.install(&mut cx);
        connection.join_room(room);
        Self { cx, connection }
    }

    fn id(&self) -> String {
        self.connection.connection_id().expect("connected")
    }

    fn synced_crate(&mut self) -> (NodeId, ComponentId) {
        let node = self.cx.create_node("crate", Parent::Root).expect("node");
        let sync = self
            .cx
            .attach_with(node, SyncedTransform::new(), AttachOptions::new().guid("obj-1"))
            .expect("attach");
        (node, sync)
    }

    fn sync(&self, id: ComponentId) -> &SyncedTransform {
        self.cx.scene().component::<SyncedTransform>(id).expect("sync")
    }

    fn rig<B: tandem_core::Behaviour>(&mut self, at: Vec3, behaviour: B) -> (NodeId, ComponentId) {
        let node = self.cx.create_node("rig", Parent::Root).expect("node");
        self.cx.scene_mut().set_world_position(node, at);
        let id = self.cx.attach(node, behaviour).expect("attach");
        (node, id)
    }

    fn camera(&self, id: ComponentId) -> &SyncedCamera {
        self.cx.scene().component::<SyncedCamera>(id).expect("camera")
    }

    fn user_state(&self, id: ComponentId) -> &UserStateSync {
        self.cx.scene().component::<UserStateSync>(id).expect("user state")
    }

    fn position(&self, node: NodeId) -> Vec3 {
        self.cx.scene().world_position(node).expect("node")
    }
}

fn close(a: Vec3, b: Vec3) -> bool {
    a.distance(b) < 1e-3
}

fn settle(hub: &mut RoomHub, peers: &mut [&mut Peer], rounds: usize) {
    for _ in 0..rounds {
        hub.pump();
        for peer in peers.iter_mut() {
            peer.cx.tick(DT);
        }
    }
}

#[test]
fn owner_pose_reaches_peer() {
    let mut hub = RoomHub::new();
    let mut a = Peer::join(&mut hub, "lobby");
    let mut b = Peer::join(&mut hub, "lobby");
    settle(&mut hub, &mut [&mut a, &mut b], 3);

    let (a_node, a_sync) = a.synced_crate();
    let (b_node, b_sync) = b.synced_crate();
    settle(&mut hub, &mut [&mut a, &mut b], 2);

    assert!(a.sync(a_sync).request_ownership());
    settle(&mut hub, &mut [&mut a, &mut b], 3);
    assert!(a.sync(a_sync).has_ownership());

    let target = Vec3::new(1.0, 0.0, 0.0);
    a.cx.scene_mut().set_world_position(a_node, target);
    let mut rounds = 0;
    while b.sync(b_sync).target().map_or(true, |pose| !close(pose.position, target)) {
        assert!(rounds < 10, "pose never reached the peer");
        settle(&mut hub, &mut [&mut a, &mut b], 1);
        rounds += 1;
    }
    // First relayed frame: B eases toward the pose instead of snapping
    assert!(b.sync(b_sync).is_blending());
    let easing = b.position(b_node);
    assert!(easing.x > 0.0 && easing.x < 1.0, "not easing: {easing:?}");

    settle(&mut hub, &mut [&mut a, &mut b], 30);
    assert!(close(b.position(b_node), target));
    let b_ownership = b.sync(b_sync).ownership().expect("linked");
    assert!(!b_ownership.has_ownership());
    assert_eq!(b_ownership.owner(), Some(a.id()));

    // A pose from a peer that does not own the guid never moves the owner
    let rogue = TransformModel {
        guid: "obj-1".into(),
        position: Vec3::new(9.0, 9.0, 9.0),
        rotation: Quaternion::IDENTITY,
    };
    b.connection.send_model(&rogue).expect("encode");
    settle(&mut hub, &mut [&mut a, &mut b], 5);
    assert!(a.sync(a_sync).has_ownership());
    assert!(close(a.position(a_node), target));
}

#[test]
fn simultaneous_claims_converge() {
    let mut hub = RoomHub::new();
    let mut a = Peer::join(&mut hub, "lobby");
    let mut b = Peer::join(&mut hub, "lobby");
    settle(&mut hub, &mut [&mut a, &mut b], 3);
    let (_, a_sync) = a.synced_crate();
    let (_, b_sync) = b.synced_crate();
    settle(&mut hub, &mut [&mut a, &mut b], 2);

    assert!(a.sync(a_sync).request_ownership());
    assert!(b.sync(b_sync).request_ownership());
    settle(&mut hub, &mut [&mut a, &mut b], 4);

    // Equal sequence numbers: the greater connection id wins everywhere
    assert!(b.sync(b_sync).has_ownership());
    assert_eq!(
        a.sync(a_sync).ownership().expect("linked").state(),
        OwnershipState::OwnedRemote(b.id())
    );
}

#[test]
fn departed_owner_releases_claim() {
    let mut hub = RoomHub::new();
    let mut a = Peer::join(&mut hub, "lobby");
    let mut b = Peer::join(&mut hub, "lobby");
    settle(&mut hub, &mut [&mut a, &mut b], 3);
    let (_, a_sync) = a.synced_crate();
    let (_, b_sync) = b.synced_crate();
    settle(&mut hub, &mut [&mut a, &mut b], 2);
    assert!(a.sync(a_sync).request_ownership());
    settle(&mut hub, &mut [&mut a, &mut b], 3);
    assert!(b.sync(b_sync).ownership().expect("linked").is_owned_by_other());

    assert!(hub.disconnect(&a.id()));
    settle(&mut hub, &mut [&mut b], 2);
    assert_eq!(b.sync(b_sync).ownership().expect("linked").state(), OwnershipState::Unowned);
}

#[test]
fn disabling_owner_frees_claim() {
    let mut hub = RoomHub::new();
    let mut a = Peer::join(&mut hub, "lobby");
    let mut b = Peer::join(&mut hub, "lobby");
    settle(&mut hub, &mut [&mut a, &mut b], 3);
    let (_, a_sync) = a.synced_crate();
    let (_, b_sync) = b.synced_crate();
    settle(&mut hub, &mut [&mut a, &mut b], 2);
    assert!(a.sync(a_sync).request_ownership());
    settle(&mut hub, &mut [&mut a, &mut b], 3);

    assert!(a.cx.set_enabled(a_sync, false));
    settle(&mut hub, &mut [&mut a, &mut b], 2);
    assert_eq!(b.sync(b_sync).ownership().expect("linked").state(), OwnershipState::Unowned);
    assert!(a.sync(a_sync).ownership().is_none());
}

#[test]
fn destroyed_component_unregisters_listeners() {
    let mut hub = RoomHub::new();
    let mut a = Peer::join(&mut hub, "lobby");
    settle(&mut hub, &mut [&mut a], 2);

    let key = ListenerKey::Binary(BinaryIdentifier::SYNCED_TRANSFORM);
    let (node, _) = a.synced_crate();
    assert_eq!(a.connection.listener_count(&key), 1);

    assert!(a.cx.destroy_node(node));
    assert_eq!(a.connection.listener_count(&key), 0);
}

#[test]
fn late_joiner_receives_room_state() {
    let mut hub = RoomHub::new();
    let mut a = Peer::join(&mut hub, "lobby");
    settle(&mut hub, &mut [&mut a], 2);

    a.connection.send("color", json!({ "guid": "lamp", "value": "red" }), SendQueue::Queued);
    a.connection.send("cursor", json!({ "guid": "pointer", "dontSave": true }), SendQueue::Queued);
    settle(&mut hub, &mut [&mut a], 2);
    assert_eq!(hub.stored_state("lobby"), 1);

    let mut c = Peer::join(&mut hub, "lobby");
    settle(&mut hub, &mut [&mut a, &mut c], 3);
    assert_eq!(c.connection.try_get_state("lamp"), Some(json!({ "guid": "lamp", "value": "red" })));
    assert_eq!(c.connection.try_get_state("pointer"), None);
}

#[test]
fn remote_camera_mirrored_and_independent_of_local_rig() {
    let mut hub = RoomHub::new();
    let mut a = Peer::join(&mut hub, "lobby");
    let mut b = Peer::join(&mut hub, "lobby");
    settle(&mut hub, &mut [&mut a, &mut b], 3);

    let (a_rig, a_cam) = a.rig(Vec3::ZERO, SyncedCamera::new());
    let (b_rig, _) = b.rig(Vec3::new(5.0, 0.0, 0.0), SyncedCamera::new());
    settle(&mut hub, &mut [&mut a, &mut b], 30);

    let mirror = a.camera(a_cam).camera_of(&b.id()).expect("mirrored");
    assert!(a.cx.scene().roots().contains(&mirror));
    assert!(close(a.position(mirror), Vec3::new(5.0, 0.0, 0.0)));

    a.cx.scene_mut().set_world_position(a_rig, Vec3::new(0.0, 0.0, 100.0));
    settle(&mut hub, &mut [&mut a, &mut b], 10);
    assert!(close(a.position(mirror), Vec3::new(5.0, 0.0, 0.0)));

    b.cx.scene_mut().set_world_position(b_rig, Vec3::new(5.0, 0.0, -2.0));
    settle(&mut hub, &mut [&mut a, &mut b], 30);
    assert!(close(a.position(mirror), Vec3::new(5.0, 0.0, -2.0)));

    assert!(hub.disconnect(&b.id()));
    settle(&mut hub, &mut [&mut a], 2);
    assert_eq!(a.camera(a_cam).remote_count(), 0);
    assert!(!a.cx.scene().contains_node(mirror));
}

#[test]
fn silent_camera_times_out() {
    let config = NetworkConfig {
        sync: SyncConfig { remote_timeout_seconds: 0.5, keepalive_seconds: 0.25, ..SyncConfig::default() },
        ..NetworkConfig::default()
    };
    let mut hub = RoomHub::new();
    let mut a = Peer::join_with(&mut hub, "lobby", config);
    let mut b = Peer::join(&mut hub, "lobby");
    settle(&mut hub, &mut [&mut a, &mut b], 3);

    let (_, a_cam) = a.rig(Vec3::ZERO, SyncedCamera::new());
    let (_, b_cam) = b.rig(Vec3::Y, SyncedCamera::new());
    settle(&mut hub, &mut [&mut a, &mut b], 5);
    let mirror = a.camera(a_cam).camera_of(&b.id()).expect("mirrored");

    // B stays in the room but stops sending
    assert!(b.cx.set_enabled(b_cam, false));
    settle(&mut hub, &mut [&mut a, &mut b], 45);
    assert_eq!(a.camera(a_cam).remote_count(), 0);
    assert!(!a.cx.scene().contains_node(mirror));
    assert!(a.connection.user_is_in_room(&b.id()));
}

#[test]
fn remote_user_mirrored_until_departure() {
    let mut hub = RoomHub::new();
    let mut a = Peer::join(&mut hub, "lobby");
    let mut b = Peer::join(&mut hub, "lobby");
    settle(&mut hub, &mut [&mut a, &mut b], 3);

    let head = Vec3::new(0.0, 1.6, 0.0);
    let (_, a_user) = a.rig(head, UserStateSync::new());
    let (b_head, b_user) = b.rig(Vec3::new(3.0, 1.7, 0.0), UserStateSync::new());
    settle(&mut hub, &mut [&mut a, &mut b], 10);

    assert!(a.user_state(a_user).ownership().expect("claimed").has_ownership());
    let mirror = b.user_state(b_user).remote(&a.id()).expect("mirrored").node;
    assert!(b.cx.scene().roots().contains(&mirror));
    assert!(close(b.position(mirror), head));

    b.cx.scene_mut().set_world_position(b_head, Vec3::new(-40.0, 1.7, 0.0));
    settle(&mut hub, &mut [&mut a, &mut b], 10);
    assert!(close(b.position(mirror), head));

    assert!(hub.disconnect(&a.id()));
    settle(&mut hub, &mut [&mut b], 2);
    assert_eq!(b.user_state(b_user).remote_count(), 0);
    assert!(!b.cx.scene().contains_node(mirror));
}
