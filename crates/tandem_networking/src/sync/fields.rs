//! Keyed sync of a sibling component's persistent fields.
//!
//! Each changed field travels as its own message under the sibling's type
//! name, with guid `<componentGuid>/<field>`. The relay stores the last
//! value of every field as room state, so a late joiner starts from the
//! current values.

use super::require_connection;
use crate::connection::{NetworkConnection, Subscription};
use crossbeam_channel::{unbounded, Receiver};
use serde_json::{json, Value};
use std::collections::HashMap;
use tandem_core::{
    Behaviour, BehaviourError, ComponentId, ComponentKind, ComponentSchema, ComponentType, Context,
    FieldDescriptor, FieldKind, FieldValue, HookContext, HookResult, PersistenceResult, Persistent,
};
use tandem_shared::SendQueue;
use tracing::{debug, trace, warn};

/// JSON form of a synced field. References are never synced.
fn to_json(value: &FieldValue) -> Option<Value> {
    match value {
        FieldValue::Bool(v) => Some(Value::Bool(*v)),
        FieldValue::Number(v) => serde_json::Number::from_f64(*v).map(Value::Number),
        FieldValue::Integer(v) => Some(Value::from(*v)),
        FieldValue::String(v) => Some(Value::String(v.clone())),
        FieldValue::Vec3(v) => serde_json::to_value(v).ok(),
        FieldValue::Quaternion(v) => serde_json::to_value(v).ok(),
        FieldValue::Node(_) | FieldValue::Asset(_) => None,
    }
}

fn from_json(kind: FieldKind, value: &Value) -> Option<FieldValue> {
    Some(match kind {
        FieldKind::Bool => FieldValue::Bool(value.as_bool()?),
        FieldKind::Number => FieldValue::Number(value.as_f64()?),
        FieldKind::Integer => FieldValue::Integer(value.as_i64()?),
        FieldKind::String => FieldValue::String(value.as_str()?.to_owned()),
        FieldKind::Vec3 => FieldValue::Vec3(serde_json::from_value(value.clone()).ok()?),
        FieldKind::Quaternion => FieldValue::Quaternion(serde_json::from_value(value.clone()).ok()?),
        FieldKind::NodeRef | FieldKind::AssetRef(_) => return None,
    })
}

const fn is_syncable(kind: FieldKind) -> bool {
    !matches!(kind, FieldKind::NodeRef | FieldKind::AssetRef(_))
}

struct Link {
    connection: NetworkConnection,
    target: ComponentId,
    key: String,
    guid: String,
    inbound: Receiver<(String, Value)>,
    _subscription: Subscription,
}

impl Link {
    fn field_guid(&self, field: &str) -> String {
        format!("{}/{field}", self.guid)
    }
}

static SCHEMA: ComponentSchema =
    ComponentSchema::new("FieldSync", &[FieldDescriptor::new("component", FieldKind::String)]);

/// Syncs the persistent fields of a sibling component, last write wins.
///
/// The sibling is found by type name on the same node and must carry a
/// guid, which peers share to link their copies.
#[derive(Default)]
pub struct FieldSync {
    /// Type name of the synced sibling
    pub component: String,
    known: HashMap<&'static str, FieldValue>,
    link: Option<Link>,
}

impl FieldSync {
    /// Syncs the sibling of type `component`.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self { component: component.into(), ..Self::default() }
    }

    /// Synced sibling, while enabled.
    #[must_use]
    pub fn target(&self) -> Option<ComponentId> {
        self.link.as_ref().map(|link| link.target)
    }

    fn find_target(&self, cx: &HookContext<'_>) -> Option<ComponentId> {
        let scene = cx.scene();
        scene.node(cx.node())?.components().iter().copied().find(|&id| {
            id != cx.component() && scene.component_type(id).is_some_and(|ty| ty.name() == self.component)
        })
    }

    /// Writes `value` into the target and records it as known, so the
    /// change is not sent back out.
    fn apply(&mut self, cx: &mut Context, target: ComponentId, field: &str, value: &Value) {
        let Some(persistent) = cx.scene_mut().behaviour_mut(target).and_then(|b| b.persistent_mut()) else {
            return;
        };
        let schema = persistent.schema();
        let Some(descriptor) = schema.field(field).filter(|d| is_syncable(d.kind)) else {
            trace!(component = schema.type_name, field, "unsynced field ignored");
            return;
        };
        let Some(decoded) = from_json(descriptor.kind, value) else {
            warn!(component = schema.type_name, field, "synced field of the wrong shape ignored");
            return;
        };
        match persistent.set_field(descriptor.name, decoded.clone()) {
            Ok(()) => {
                self.known.insert(descriptor.name, decoded);
            }
            Err(err) => warn!(%err, "failed to apply synced field"),
        }
    }
}

impl ComponentKind for FieldSync {
    const TYPE: &'static ComponentType = &ComponentType::new("FieldSync");
}

impl Behaviour for FieldSync {
    fn component_type(&self) -> &'static ComponentType {
        Self::TYPE
    }

    fn on_enable(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        let connection = require_connection(cx)?;
        let target = self
            .find_target(cx)
            .ok_or_else(|| BehaviourError::msg(format!("no {} to sync on this node", self.component)))?;
        let guid = cx
            .scene()
            .component_guid(target)
            .map(|guid| guid.as_str().to_owned())
            .ok_or_else(|| BehaviourError::msg(format!("synced {} has no guid", self.component)))?;
        let schema = cx
            .scene()
            .behaviour(target)
            .and_then(|b| b.persistent())
            .map(|p| p.schema())
            .ok_or_else(|| BehaviourError::msg(format!("{} has no persistent fields", self.component)))?;

        let (tx, rx) = unbounded();
        let prefix = format!("{guid}/");
        let subscription = connection.subscribe(&self.component, move |_, data| {
            let field = data
                .get("guid")
                .and_then(Value::as_str)
                .and_then(|g| g.strip_prefix(prefix.as_str()));
            if let (Some(field), Some(value)) = (field, data.get("value")) {
                let _ = tx.send((field.to_owned(), value.clone()));
            }
            Ok(())
        });

        let link = Link {
            connection,
            target,
            key: self.component.clone(),
            guid,
            inbound: rx,
            _subscription: subscription,
        };

        self.known.clear();
        if let Some(current) = cx.scene().behaviour(target).and_then(|b| b.persistent()) {
            for descriptor in schema.fields.iter().filter(|d| is_syncable(d.kind)) {
                if let Some(value) = current.field(descriptor.name) {
                    self.known.insert(descriptor.name, value);
                }
            }
        }
        for descriptor in schema.fields.iter().filter(|d| is_syncable(d.kind)) {
            let stored = link.connection.try_get_state(&link.field_guid(descriptor.name));
            if let Some(value) = stored.as_ref().and_then(|state| state.get("value")) {
                self.apply(cx, target, descriptor.name, value);
            }
        }
        debug!(component = %self.component, guid = %link.guid, "field sync linked");
        self.link = Some(link);
        Ok(())
    }

    fn on_disable(&mut self, _cx: &mut HookContext<'_>) -> HookResult {
        self.link = None;
        Ok(())
    }

    fn early_update(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        let Some(link) = &self.link else {
            return Ok(());
        };
        let target = link.target;
        let inbound: Vec<(String, Value)> = link.inbound.try_iter().collect();
        for (field, value) in inbound {
            self.apply(cx, target, &field, &value);
        }
        Ok(())
    }

    fn on_after_render(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        let Some(link) = &self.link else {
            return Ok(());
        };
        let Some(current) = cx.scene().behaviour(link.target).and_then(|b| b.persistent()) else {
            return Ok(());
        };
        for descriptor in current.schema().fields.iter().filter(|d| is_syncable(d.kind)) {
            let Some(value) = current.field(descriptor.name) else {
                continue;
            };
            if self.known.get(descriptor.name) == Some(&value) {
                continue;
            }
            if let Some(encoded) = to_json(&value) {
                let payload = json!({
                    "guid": link.field_guid(descriptor.name),
                    "field": descriptor.name,
                    "value": encoded,
                });
                link.connection.send(link.key.clone(), payload, SendQueue::Immediate);
                trace!(field = descriptor.name, "field change sent");
            }
            self.known.insert(descriptor.name, value);
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

impl Persistent for FieldSync {
    fn schema(&self) -> &'static ComponentSchema {
        &SCHEMA
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        (name == "component").then(|| FieldValue::String(self.component.clone()))
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> PersistenceResult<()> {
        if name != "component" {
            return Err(SCHEMA.unknown_field(name));
        }
        self.component = value.as_str().ok_or_else(|| SCHEMA.type_mismatch(name))?.to_owned();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::RoomHub;
    use tandem_core::{AttachOptions, NodeId, Parent};
    use tandem_shared::Vec3;

    const DT: f32 = 1.0 / 60.0;

    static LAMP: ComponentSchema = ComponentSchema::new(
        "Lamp",
        &[
            FieldDescriptor::new("intensity", FieldKind::Number),
            FieldDescriptor::new("label", FieldKind::String),
            FieldDescriptor::new("offset", FieldKind::Vec3),
            FieldDescriptor::new("anchor", FieldKind::NodeRef),
        ],
    );

    struct Lamp {
        intensity: f64,
        label: String,
        offset: Vec3,
        anchor: Option<NodeId>,
    }

    impl Default for Lamp {
        fn default() -> Self {
            Self { intensity: 1.0, label: "lamp".into(), offset: Vec3::ZERO, anchor: None }
        }
    }

    impl ComponentKind for Lamp {
        const TYPE: &'static ComponentType = &ComponentType::new("Lamp");
    }

    impl Behaviour for Lamp {
        fn component_type(&self) -> &'static ComponentType {
            Self::TYPE
        }

        fn persistent(&self) -> Option<&dyn Persistent> {
            Some(self)
        }

        fn persistent_mut(&mut self) -> Option<&mut dyn Persistent> {
            Some(self)
        }
    }

    impl Persistent for Lamp {
        fn schema(&self) -> &'static ComponentSchema {
            &LAMP
        }

        fn field(&self, name: &str) -> Option<FieldValue> {
            Some(match name {
                "intensity" => FieldValue::Number(self.intensity),
                "label" => FieldValue::String(self.label.clone()),
                "offset" => FieldValue::Vec3(self.offset),
                "anchor" => FieldValue::Node(self.anchor),
                _ => return None,
            })
        }

        fn set_field(&mut self, name: &str, value: FieldValue) -> PersistenceResult<()> {
            let mismatch = || LAMP.type_mismatch(name);
            match name {
                "intensity" => self.intensity = value.as_f64().ok_or_else(mismatch)?,
                "label" => self.label = value.as_str().ok_or_else(mismatch)?.to_owned(),
                "offset" => self.offset = value.as_vec3().ok_or_else(mismatch)?,
                "anchor" => self.anchor = value.as_node().ok_or_else(mismatch)?,
                _ => return Err(LAMP.unknown_field(name)),
            }
            Ok(())
        }
    }

    fn peer(hub: &mut RoomHub) -> (Context, NetworkConnection) {
        let mut cx = Context::new();
        let connection = NetworkConnection::default();
        connection.connect(hub.connect());
        connection.install(&mut cx);
        connection.join_room("lamps");
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

    fn lamp(cx: &mut Context) -> ComponentId {
        let node = cx.create_node("lamp", Parent::Root).unwrap();
        let id = cx.attach_with(node, Lamp::default(), AttachOptions::new().guid("lamp-1")).unwrap();
        cx.attach(node, FieldSync::new("Lamp")).unwrap();
        id
    }

    #[test]
    fn test_json_conversion_skips_references() {
        let value = FieldValue::Vec3(Vec3::new(1.0, 2.0, 3.0));
        let encoded = to_json(&value).unwrap();
        assert_eq!(from_json(FieldKind::Vec3, &encoded), Some(value));
        assert_eq!(to_json(&FieldValue::Node(None)), None);
        assert_eq!(from_json(FieldKind::Bool, &json!(3)), None);
    }

    #[test]
    fn test_changes_reach_peer() {
        let mut hub = RoomHub::new();
        let (mut a, _a_conn) = peer(&mut hub);
        let (mut b, _b_conn) = peer(&mut hub);
        settle(&mut hub, &mut [&mut a, &mut b], 3);
        let a_lamp = lamp(&mut a);
        let b_lamp = lamp(&mut b);
        settle(&mut hub, &mut [&mut a, &mut b], 2);

        {
            let lamp = a.scene_mut().component_mut::<Lamp>(a_lamp).unwrap();
            lamp.intensity = 3.5;
            lamp.label = "desk".into();
        }
        settle(&mut hub, &mut [&mut a, &mut b], 3);

        let remote = b.scene().component::<Lamp>(b_lamp).unwrap();
        assert!((remote.intensity - 3.5).abs() < f64::EPSILON);
        assert_eq!(remote.label, "desk");
    }

    #[test]
    fn test_late_joiner_starts_from_room_state() {
        let mut hub = RoomHub::new();
        let (mut a, _a_conn) = peer(&mut hub);
        settle(&mut hub, &mut [&mut a], 2);
        let a_lamp = lamp(&mut a);
        settle(&mut hub, &mut [&mut a], 1);
        a.scene_mut().component_mut::<Lamp>(a_lamp).unwrap().intensity = 0.25;
        settle(&mut hub, &mut [&mut a], 2);

        let (mut c, _c_conn) = peer(&mut hub);
        settle(&mut hub, &mut [&mut a, &mut c], 3);
        let c_lamp = lamp(&mut c);
        let late = c.scene().component::<Lamp>(c_lamp).unwrap();
        assert!((late.intensity - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_sibling_leaves_sync_unlinked() {
        let mut cx = Context::new();
        NetworkConnection::default().install(&mut cx);
        let node = cx.create_node("empty", Parent::Root).unwrap();
        let id = cx.attach(node, FieldSync::new("Lamp")).unwrap();
        assert!(cx.scene().component::<FieldSync>(id).unwrap().target().is_none());
    }
}
