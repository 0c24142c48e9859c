//! Ownership-gated pose sync of one node.
//!
//! The owner sends its world pose every few frames while it moves, and
//! again whenever a peer joins. Everyone else eases its copy of the node
//! toward the last pose received.

use super::{require_connection, set_world_pose, world_pose};
use crate::connection::{NetworkConnection, Subscription};
use crate::error::WireResult;
use crate::interpolation::{InterpolationMode, Pose, PoseInterpolator};
use crate::ownership::OwnershipModel;
use crate::wire::{required, BinaryModel, TableReader, TableWriter};
use crossbeam_channel::{unbounded, Receiver};
use tandem_core::{
    Behaviour, BehaviourError, ComponentKind, ComponentSchema, ComponentType, FieldDescriptor,
    FieldKind, FieldValue, HookContext, HookResult, PersistenceResult, Persistent,
};
use tandem_shared::constants::BLEND_SECONDS;
use tandem_shared::{BinaryIdentifier, Quaternion, RoomEvent, Vec3};
use tracing::{debug, trace};

/// Pose of a networked transform, `STRS` on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformModel {
    /// Guid of the synced component
    pub guid: String,
    /// World position
    pub position: Vec3,
    /// World rotation
    pub rotation: Quaternion,
}

impl TransformModel {
    const GUID: u8 = 0;
    const POSITION: u8 = 1;
    const ROTATION: u8 = 2;
}

impl BinaryModel for TransformModel {
    const IDENTIFIER: BinaryIdentifier = BinaryIdentifier::SYNCED_TRANSFORM;

    fn encode(&self, writer: &mut TableWriter) -> WireResult<()> {
        writer.write_str(Self::GUID, &self.guid)?;
        writer.write_vec3(Self::POSITION, self.position)?;
        writer.write_quaternion(Self::ROTATION, self.rotation)
    }

    fn decode(reader: &mut TableReader<'_>) -> WireResult<Self> {
        Ok(Self {
            guid: required(Self::GUID, reader.read_str(Self::GUID)?)?.to_owned(),
            position: required(Self::POSITION, reader.read_vec3(Self::POSITION)?)?,
            rotation: reader.read_quaternion(Self::ROTATION)?.unwrap_or(Quaternion::IDENTITY),
        })
    }
}

enum Inbound {
    Pose(TransformModel),
    Resend,
}

/// Room link held while the component is enabled.
struct Link {
    connection: NetworkConnection,
    guid: String,
    ownership: OwnershipModel,
    inbound: Receiver<Inbound>,
    send_interval: u64,
    position_threshold: f32,
    rotation_threshold: f32,
    _subscriptions: [Subscription; 2],
}

static SCHEMA: ComponentSchema = ComponentSchema::new(
    "SyncedTransform",
    &[
        FieldDescriptor::new("interpolate", FieldKind::Bool),
        FieldDescriptor::new("blendSeconds", FieldKind::Number),
    ],
);

/// Mirrors the world pose of its node to every peer in the room.
///
/// The component guid names the synced object, so peers attach it with the
/// same guid to the node they want linked.
pub struct SyncedTransform {
    /// Ease toward received poses instead of snapping.
    pub interpolate: bool,
    /// Blend window for received poses, in seconds.
    pub blend_seconds: f32,
    mode: InterpolationMode,
    interpolator: PoseInterpolator,
    last_sent: Option<Pose>,
    resend: bool,
    link: Option<Link>,
}

impl Default for SyncedTransform {
    fn default() -> Self {
        Self {
            interpolate: true,
            blend_seconds: BLEND_SECONDS,
            mode: InterpolationMode::default(),
            interpolator: PoseInterpolator::new(BLEND_SECONDS),
            last_sent: None,
            resend: false,
            link: None,
        }
    }
}

impl SyncedTransform {
    /// Creates a transform sync with default blending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `mode` for received poses.
    #[must_use]
    pub fn with_mode(mut self, mode: InterpolationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Ownership of the synced guid, while enabled.
    #[must_use]
    pub fn ownership(&self) -> Option<&OwnershipModel> {
        self.link.as_ref().map(|link| &link.ownership)
    }

    /// Claims the synced guid. Returns false when disabled or not in a room.
    pub fn request_ownership(&self) -> bool {
        self.ownership().is_some_and(OwnershipModel::request_ownership)
    }

    /// Returns true while the local peer owns the synced guid.
    #[must_use]
    pub fn has_ownership(&self) -> bool {
        self.ownership().is_some_and(OwnershipModel::has_ownership)
    }

    /// Releases the synced guid.
    pub fn free_ownership(&self) {
        if let Some(ownership) = self.ownership() {
            ownership.free_ownership();
        }
    }

    /// Last pose received from the owner.
    #[must_use]
    pub const fn target(&self) -> Option<Pose> {
        self.interpolator.target()
    }

    /// Returns true while easing toward a received pose.
    #[must_use]
    pub fn is_blending(&self) -> bool {
        self.interpolator.is_blending()
    }

    fn receive(&mut self, cx: &mut HookContext<'_>, model: TransformModel) {
        let node = cx.node();
        let target = Pose::new(model.position, model.rotation);
        if self.interpolate {
            let current = world_pose(cx, node).unwrap_or(target);
            self.interpolator.set_target(current, target);
        } else {
            set_world_pose(cx, node, target);
        }
    }

    fn send_if_due(&mut self, cx: &HookContext<'_>) -> HookResult {
        let Some(link) = &self.link else {
            return Ok(());
        };
        let Some(pose) = world_pose(cx, cx.node()) else {
            return Ok(());
        };
        let due = cx.time().frame() % link.send_interval == 0;
        let moved = self
            .last_sent
            .map_or(true, |last| pose.moved_from(&last, link.position_threshold, link.rotation_threshold));
        if !(self.resend || (due && moved)) {
            return Ok(());
        }
        let model = TransformModel { guid: link.guid.clone(), position: pose.position, rotation: pose.rotation };
        link.connection.send_model(&model).map_err(|err| BehaviourError::Other(Box::new(err)))?;
        trace!(guid = %link.guid, resend = self.resend, "pose sent");
        self.last_sent = Some(pose);
        self.resend = false;
        Ok(())
    }
}

impl ComponentKind for SyncedTransform {
    const TYPE: &'static ComponentType = &ComponentType::new("SyncedTransform");
}

impl Behaviour for SyncedTransform {
    fn component_type(&self) -> &'static ComponentType {
        Self::TYPE
    }

    fn on_enable(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        let connection = require_connection(cx)?;
        let guid = cx
            .guid()
            .map(|guid| guid.as_str().to_owned())
            .ok_or_else(|| BehaviourError::msg("synced transform has no guid"))?;
        let config = connection.config().sync;

        let (tx, rx) = unbounded();
        let poses = tx.clone();
        let own = guid.clone();
        let pose_listener = connection.subscribe_binary::<TransformModel, _>(move |_, model| {
            if model.guid == own {
                // The receiver only goes away together with this listener
                let _ = poses.send(Inbound::Pose(model));
            }
            Ok(())
        });
        let join_listener = connection.on_room_event(RoomEvent::UserJoinedRoom, move |_, _| {
            let _ = tx.send(Inbound::Resend);
            Ok(())
        });

        self.interpolator = PoseInterpolator::new(self.blend_seconds);
        self.interpolator.set_mode(self.mode);
        self.last_sent = None;
        self.link = Some(Link {
            ownership: OwnershipModel::new(&connection, guid.clone()),
            connection,
            guid,
            inbound: rx,
            send_interval: u64::from(config.send_interval_frames.max(1)),
            position_threshold: config.position_threshold,
            rotation_threshold: config.rotation_threshold,
            _subscriptions: [pose_listener, join_listener],
        });
        Ok(())
    }

    fn on_disable(&mut self, _cx: &mut HookContext<'_>) -> HookResult {
        if let Some(link) = self.link.take() {
            if link.ownership.has_ownership() {
                link.ownership.free_ownership();
            }
            debug!(guid = %link.guid, "synced transform unlinked");
        }
        self.interpolator.clear();
        Ok(())
    }

    fn update(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        let Some(link) = &self.link else {
            return Ok(());
        };
        let owned = link.ownership.has_ownership();
        let inbound: Vec<Inbound> = link.inbound.try_iter().collect();
        for message in inbound {
            match message {
                Inbound::Resend => self.resend = true,
                Inbound::Pose(model) if !owned => self.receive(cx, model),
                Inbound::Pose(_) => trace!("pose for an owned transform ignored"),
            }
        }

        if owned {
            self.interpolator.clear();
            return self.send_if_due(cx);
        }
        self.last_sent = None;
        self.resend = false;
        if let Some(pose) = self.interpolator.update(cx.time().delta_time()) {
            let node = cx.node();
            set_world_pose(cx, node, pose);
        }
        Ok(())
    }

    fn persistent(&self) -> Option<&dyn Persistent> {
        Some(self)
    }

    fn persistent_mut(&mut self) -> Option<&mut dyn Persistent> {
        Some(self)
    }
}

impl Persistent for SyncedTransform {
    fn schema(&self) -> &'static ComponentSchema {
        &SCHEMA
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "interpolate" => FieldValue::Bool(self.interpolate),
            "blendSeconds" => FieldValue::Number(f64::from(self.blend_seconds)),
            _ => return None,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_field(&mut self, name: &str, value: FieldValue) -> PersistenceResult<()> {
        let mismatch = || SCHEMA.type_mismatch(name);
        match name {
            "interpolate" => self.interpolate = value.as_bool().ok_or_else(mismatch)?,
            "blendSeconds" => self.blend_seconds = value.as_f64().ok_or_else(mismatch)? as f32,
            _ => return Err(SCHEMA.unknown_field(name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{AttachOptions, Context, Parent};

    #[test]
    fn test_model_frame_layout() {
        let model = TransformModel {
            guid: "obj-1".into(),
            position: Vec3::new(1.0, 0.0, 0.0),
            rotation: Quaternion::IDENTITY,
        };
        let frame = model.to_frame().unwrap();
        assert_eq!(&frame[..4], b"STRS");
        assert_eq!(TransformModel::from_frame(&frame).unwrap(), model);
    }

    #[test]
    fn test_decode_requires_position() {
        let mut writer = TableWriter::new(BinaryIdentifier::SYNCED_TRANSFORM);
        writer.write_str(TransformModel::GUID, "obj-1").unwrap();
        let frame = writer.finish();
        assert_eq!(
            TransformModel::from_frame(&frame),
            Err(crate::error::WireError::MissingField(TransformModel::POSITION))
        );
    }

    #[test]
    fn test_enable_without_connection_stays_unlinked() {
        let mut cx = Context::new();
        let node = cx.create_node("crate", Parent::Root).unwrap();
        let id = cx.attach_with(node, SyncedTransform::new(), AttachOptions::new().guid("obj-1")).unwrap();
        let sync = cx.scene().component::<SyncedTransform>(id).unwrap();
        assert!(sync.ownership().is_none());
        assert!(!sync.request_ownership());
    }

    #[test]
    fn test_persistent_fields() {
        let mut sync = SyncedTransform::new();
        sync.set_field("interpolate", FieldValue::Bool(false)).unwrap();
        sync.set_field("blendSeconds", FieldValue::Number(0.5)).unwrap();
        assert_eq!(sync.field("interpolate"), Some(FieldValue::Bool(false)));
        assert_eq!(sync.field("blendSeconds"), Some(FieldValue::Number(0.5)));
        assert!(sync.set_field("blendSeconds", FieldValue::Bool(true)).is_err());
        assert!(sync.field("speed").is_none());
    }
}
