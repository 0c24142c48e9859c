//! # Room Demo
//!
//! Two peers share one crate through an in-process relay. Peer A claims
//! the crate and moves it in a circle; peer B mirrors it and follows A's
//! camera. Halfway through, B takes the crate over.
//!
//! ```bash
//! RUST_LOG=tandem_networking=debug cargo run --bin room_demo
//! ```

use tandem::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DT: f32 = 1.0 / 60.0;
const FRAMES: u32 = 240;
const CRATE_GUID: &str = "demo-crate";

struct Shared {
    peer: Peer,
    node: NodeId,
    sync: tandem::core::ComponentId,
    camera: tandem::core::ComponentId,
}

impl Shared {
    fn new(hub: &mut RoomHub) -> Option<Self> {
        let config = NetworkConfig { default_room: "demo".into(), ..NetworkConfig::default() };
        let mut peer = Peer::connect(hub, config);
        let node = peer.cx.create_node("crate", Parent::Root).ok()?;
        let sync = peer
            .cx
            .attach_with(node, SyncedTransform::new(), AttachOptions::new().guid(CRATE_GUID))?;
        let rig = peer.cx.create_node("rig", Parent::Root).ok()?;
        let camera = peer.cx.attach(rig, SyncedCamera::new())?;
        Some(Self { peer, node, sync, camera })
    }

    fn sync(&self) -> Option<&SyncedTransform> {
        self.peer.cx.scene().component::<SyncedTransform>(self.sync)
    }

    fn remote_cameras(&self) -> usize {
        self.peer
            .cx
            .scene()
            .component::<SyncedCamera>(self.camera)
            .map_or(0, SyncedCamera::remote_count)
    }

    fn position(&self) -> Vec3 {
        self.peer.cx.scene().world_position(self.node).unwrap_or(Vec3::ZERO)
    }
}

#[allow(clippy::cast_precision_loss)]
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut hub = RoomHub::new();
    let (Some(mut a), Some(mut b)) = (Shared::new(&mut hub), Shared::new(&mut hub)) else {
        tracing::error!("failed to build the demo scene");
        return;
    };

    for frame in 0..FRAMES {
        hub.pump();

        if frame == 10 {
            let claimed = a.sync().is_some_and(SyncedTransform::request_ownership);
            info!(claimed, "peer A claims the crate");
        }
        if frame == FRAMES / 2 {
            let claimed = b.sync().is_some_and(SyncedTransform::request_ownership);
            info!(claimed, "peer B takes the crate over");
        }

        let angle = frame as f32 * DT;
        for shared in [&mut a, &mut b] {
            if shared.sync().is_some_and(SyncedTransform::has_ownership) {
                let position = Vec3::new(angle.cos() * 2.0, 0.0, angle.sin() * 2.0);
                shared.peer.cx.scene_mut().set_world_position(shared.node, position);
            }
        }

        a.peer.tick(DT);
        b.peer.tick(DT);

        if frame % 30 == 0 {
            info!(
                frame,
                a = ?a.position(),
                b = ?b.position(),
                remote_cameras = b.remote_cameras(),
                peers = b.peer.connection.users_in_room().len(),
                "positions"
            );
        }
    }

    // Every other member of the room should be mirrored by now
    let expected = b.peer.connection.users_in_room().len().saturating_sub(1);
    if b.remote_cameras() != expected {
        tracing::warn!(expected, mirrored = b.remote_cameras(), "remote cameras missing");
    }

    let stats = hub.stats();
    info!(
        frames_in = stats.frames_in,
        frames_out = stats.frames_out,
        dropped = stats.frames_dropped,
        "relay totals"
    );
}
