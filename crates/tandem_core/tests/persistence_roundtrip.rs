//! Integration tests for saving and loading node trees through the
//! component persistence format.

use serde_json::json;
use tandem_core::persistence::{AssetKind, AssetRef};
use tandem_core::{
    export_nodes, import_document, instantiate, AttachOptions, Behaviour, ComponentKind,
    ComponentSchema, ComponentType, Context, FieldDescriptor, FieldKind, FieldValue, NodeId,
    Parent, PersistenceError, PersistenceResult, Persistent, SceneDocument, TypeStore,
};
use tandem_shared::{Quaternion, Transform, Vec3, COMPONENTS_EXTENSION};

#[derive(Clone, Debug, PartialEq)]
struct Turret {
    armed: bool,
    range: f64,
    ammo: i64,
    label: String,
    aim: Vec3,
    rest: Quaternion,
    target: Option<NodeId>,
    mesh: Option<AssetRef>,
}

impl Default for Turret {
    fn default() -> Self {
        Self {
            armed: false,
            range: 1.0,
            ammo: 0,
            label: String::new(),
            aim: Vec3::ZERO,
            rest: Quaternion::IDENTITY,
            target: None,
            mesh: None,
        }
    }
}

static TURRET_SCHEMA: ComponentSchema = ComponentSchema::new(
    "Turret",
    &[
        FieldDescriptor::new("armed", FieldKind::Bool),
        FieldDescriptor::new("range", FieldKind::Number),
        FieldDescriptor::new("ammo", FieldKind::Integer),
        FieldDescriptor::new("label", FieldKind::String),
        FieldDescriptor::new("aim", FieldKind::Vec3),
        FieldDescriptor::new("rest", FieldKind::Quaternion),
        FieldDescriptor::new("target", FieldKind::NodeRef),
        FieldDescriptor::new("mesh", FieldKind::AssetRef(AssetKind::Mesh)),
    ],
);

impl ComponentKind for Turret {
    const TYPE: &'static ComponentType = &ComponentType::new("Turret");
}

impl Behaviour for Turret {
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

impl Persistent for Turret {
    fn schema(&self) -> &'static ComponentSchema {
        &TURRET_SCHEMA
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "armed" => FieldValue::Bool(self.armed),
            "range" => FieldValue::Number(self.range),
            "ammo" => FieldValue::Integer(self.ammo),
            "label" => FieldValue::String(self.label.clone()),
            "aim" => FieldValue::Vec3(self.aim),
            "rest" => FieldValue::Quaternion(self.rest),
            "target" => FieldValue::Node(self.target),
            "mesh" => FieldValue::Asset(self.mesh),
            _ => return None,
        })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> PersistenceResult<()> {
        let mismatch = || TURRET_SCHEMA.type_mismatch(name);
        match name {
            "armed" => self.armed = value.as_bool().ok_or_else(mismatch)?,
            "range" => self.range = value.as_f64().ok_or_else(mismatch)?,
            "ammo" => self.ammo = value.as_i64().ok_or_else(mismatch)?,
            "label" => self.label = value.as_str().ok_or_else(mismatch)?.to_owned(),
            "aim" => self.aim = value.as_vec3().ok_or_else(mismatch)?,
            "rest" => self.rest = value.as_quaternion().ok_or_else(mismatch)?,
            "target" => self.target = value.as_node().ok_or_else(mismatch)?,
            "mesh" => self.mesh = value.as_asset().ok_or_else(mismatch)?,
            _ => return Err(TURRET_SCHEMA.unknown_field(name)),
        }
        Ok(())
    }
}

fn store() -> TypeStore {
    let mut store = TypeStore::new();
    store.register::<Turret>();
    store
}

fn build_source(cx: &mut Context) -> (NodeId, NodeId) {
    let base = cx.create_node("base", Parent::Root).unwrap();
    let barrel = cx.create_node("barrel", Parent::Node(base)).unwrap();
    cx.scene_mut().set_transform(
        barrel,
        Transform::new(Vec3::new(0.0, 1.5, 0.0), Quaternion::from_axis_angle(Vec3::X, 0.3), Vec3::ONE),
    );
    cx.attach_with(
        base,
        Turret {
            armed: true,
            range: 42.5,
            ammo: 12,
            label: "north".into(),
            aim: Vec3::new(0.0, 0.0, -1.0),
            rest: Quaternion::from_axis_angle(Vec3::Y, 1.0),
            target: Some(barrel),
            mesh: Some(AssetRef::new(AssetKind::Mesh, 2)),
        },
        AttachOptions::new().guid("turret-guid").enabled(false),
    );
    cx.set_active(barrel, false);
    (base, barrel)
}

#[test]
fn test_round_trip_preserves_every_field_kind() {
    let mut source = Context::new();
    let (base, _) = build_source(&mut source);

    let mut document = SceneDocument::new();
    let roots = export_nodes(source.scene(), &[base], &mut document).unwrap();
    assert_eq!(roots, vec![0]);
    assert_eq!(document.meshes.len(), 3);

    let record = &document.nodes[0].extensions[COMPONENTS_EXTENSION]["builtin_components"][0];
    assert_eq!(record["target"], json!("/nodes/1"));
    assert_eq!(record["mesh"], json!("/meshes/2"));
    assert_eq!(record["aim"], json!({ "x": 0.0, "y": 0.0, "z": -1.0 }));

    // Through JSON text, the way a file would travel
    let text = document.to_json().unwrap();
    let document = SceneDocument::from_json(&text).unwrap();

    let mut target = Context::new();
    let imported = import_document(&mut target, &document, &store(), Parent::Root).unwrap();
    let (new_base, new_barrel) = (imported.nodes[0], imported.nodes[1]);

    let id = imported.components[0][0].unwrap();
    let loaded = target.scene().component::<Turret>(id).unwrap().clone();
    let original = source.scene().get::<Turret>(base).and_then(|c| source.scene().component::<Turret>(c)).unwrap();

    assert_eq!(loaded.target, Some(new_barrel));
    assert_eq!(Turret { target: None, ..loaded.clone() }, Turret { target: None, ..original.clone() });
    assert!(!target.scene().is_enabled(id));
    assert_eq!(target.scene().component_guid(id).unwrap(), "turret-guid");

    let barrel = target.scene().node(new_barrel).unwrap();
    assert!(!barrel.active_self());
    assert_eq!(barrel.parent(), Some(new_base));
    assert!(barrel.transform().position.distance(Vec3::new(0.0, 1.5, 0.0)) < 1e-6);
    assert_eq!(
        target.scene().node(new_base).unwrap().guid(),
        source.scene().node(base).unwrap().guid()
    );
}

#[test]
fn test_import_under_parent_awakes_after_references_resolve() {
    let mut source = Context::new();
    let (base, _) = build_source(&mut source);
    let mut document = SceneDocument::new();
    export_nodes(source.scene(), &[base], &mut document).unwrap();

    let mut target = Context::new();
    let holder = target.create_node("holder", Parent::Root).unwrap();
    let imported = import_document(&mut target, &document, &store(), Parent::Node(holder)).unwrap();
    assert_eq!(target.scene().node(holder).unwrap().children(), imported.roots.as_slice());
    assert!(target.scene().node(imported.roots[0]).unwrap().is_in_scene());
}

#[test]
fn test_import_into_stale_parent_fails() {
    let mut cx = Context::new();
    let holder = cx.create_node("holder", Parent::Root).unwrap();
    cx.destroy_node(holder);
    let err = import_document(&mut cx, &SceneDocument::new(), &store(), Parent::Node(holder)).unwrap_err();
    assert!(matches!(err, PersistenceError::Scene(_)));
}

#[test]
fn test_instantiate_is_deterministic_per_seed() {
    let mut first = Context::new();
    let (base, _) = build_source(&mut first);
    let clone_a = instantiate(&mut first, &store(), base, Parent::Root, Some(99)).unwrap();

    let clone_b = instantiate(&mut first, &store(), base, Parent::Root, Some(99)).unwrap();
    assert_eq!(first.scene().node(clone_a).unwrap().guid(), first.scene().node(clone_b).unwrap().guid());

    let turret = first.scene().get_in_children::<Turret>(clone_a, true).unwrap();
    let expected = tandem_core::Guid::from("turret-guid").derive(99);
    assert_eq!(first.scene().component_guid(turret), Some(&expected));
    let barrel = first.scene().node(clone_a).unwrap().children()[0];
    assert_eq!(first.scene().component::<Turret>(turret).unwrap().target, Some(barrel));
}
