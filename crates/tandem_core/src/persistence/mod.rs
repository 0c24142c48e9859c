//! # Component Persistence
//!
//! Saves node trees with their components into a [`SceneDocument`] and
//! rebuilds them from one.
//!
//! ## Loading
//!
//! 1. Validate the node table and decode every component record
//! 2. Create all nodes detached and link children
//! 3. Create components through the [`TypeStore`] and set plain fields
//! 4. Resolve `"/nodes/<i>"` references once every node exists
//! 5. Link the roots into the scene: Awake and Enable fire here
//!
//! Field-level problems (unknown field, wrong JSON type, out-of-range
//! reference) are logged and the field keeps its default. Structural
//! problems and malformed reference paths fail the whole load and leave
//! the scene unchanged.

mod document;
mod schema;
mod type_store;

pub use document::{AssetInfo, ComponentRecord, NodeDocument, NodeExtras, SceneDocument};
pub use schema::{
    AssetKind, AssetRef, ComponentSchema, FieldDescriptor, FieldKind, FieldValue, Persistent,
};
pub use type_store::{ComponentFactory, TypeStore};

use crate::component::LifecycleState;
use crate::context::Context;
use crate::error::{PersistenceError, PersistenceResult, SceneError};
use crate::lifecycle::AttachOptions;
use crate::scene::{ComponentId, Guid, NodeId, Parent, Scene};
use document::{decode_field, encode_field, DecodeFailure, DecodedField};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// What [`import_document`] created.
#[derive(Clone, Debug, Default)]
pub struct ImportedScene {
    /// Node handles by document index. Nodes outside every root are
    /// discarded and their handles are stale.
    pub nodes: Vec<NodeId>,
    /// Top-level nodes in document order
    pub roots: Vec<NodeId>,
    /// Components by document node index and record index. `None` for
    /// records of unknown types.
    pub components: Vec<Vec<Option<ComponentId>>>,
}

/// A node reference that points outside the exported subtrees.
struct ExternalRef {
    node: usize,
    record: usize,
    field: &'static str,
    target: NodeId,
}

struct Export {
    roots: Vec<usize>,
    external: Vec<ExternalRef>,
}

/// Appends `roots` and their subtrees to `document` in pre-order.
///
/// Returns the document indices of the exported roots. Node references to
/// nodes outside the exported subtrees are written as null.
pub fn export_nodes(
    scene: &Scene,
    roots: &[NodeId],
    document: &mut SceneDocument,
) -> PersistenceResult<Vec<usize>> {
    export_inner(scene, roots, document).map(|export| export.roots)
}

fn export_inner(scene: &Scene, roots: &[NodeId], document: &mut SceneDocument) -> PersistenceResult<Export> {
    // Roots nested under another exported root are already covered
    let roots: Vec<NodeId> = roots
        .iter()
        .copied()
        .filter(|&root| {
            if !scene.contains_node(root) {
                warn!(node = ?root, "export of unknown or destroyed node skipped");
                return false;
            }
            !roots.iter().any(|&other| other != root && scene.is_ancestor_of(other, root))
        })
        .collect();

    let base = document.nodes.len();
    let order: Vec<NodeId> = roots.iter().flat_map(|&root| scene.descendants(root)).collect();
    let index_of: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, &id)| (id, base + i)).collect();

    let mut external = Vec::new();
    for (position, &id) in order.iter().enumerate() {
        let Some(node) = scene.node(id) else {
            continue;
        };
        let mut doc_node = NodeDocument {
            name: node.name().to_owned(),
            children: node.children().iter().filter_map(|c| index_of.get(c).copied()).collect(),
            extras: NodeExtras {
                guid: Some(node.guid().to_string()),
                active: node.active_self(),
            },
            ..NodeDocument::default()
        };
        doc_node.set_transform(node.transform());

        let mut records = Vec::new();
        for &component in node.components() {
            let Some(entry) = scene.entry(component) else {
                continue;
            };
            if entry.state == LifecycleState::Destroyed || entry.pending_destroy {
                continue;
            }
            let Some(behaviour) = entry.behaviour.as_deref() else {
                warn!(?component, "component is executing a hook, not exported");
                continue;
            };

            let mut fields = Map::new();
            if let Some(persistent) = behaviour.persistent() {
                let schema = persistent.schema();
                for descriptor in schema.fields {
                    let Some(value) = persistent.field(descriptor.name) else {
                        continue;
                    };
                    if !value.matches(descriptor.kind) {
                        warn!(component = schema.type_name, field = descriptor.name, "field value does not match its schema");
                        continue;
                    }
                    match &value {
                        FieldValue::Node(Some(target)) if !index_of.contains_key(target) => {
                            external.push(ExternalRef {
                                node: base + position,
                                record: records.len(),
                                field: descriptor.name,
                                target: *target,
                            });
                        }
                        FieldValue::Asset(Some(asset)) => {
                            let slots = document.assets_mut(asset.kind);
                            if slots.len() <= asset.index {
                                slots.resize(asset.index + 1, Value::Null);
                            }
                        }
                        _ => {}
                    }
                    let encoded = encode_field(&value, |n| index_of.get(&n).copied())?;
                    fields.insert(descriptor.name.to_owned(), encoded);
                }
            }
            records.push(ComponentRecord {
                type_name: entry.type_info.name().to_owned(),
                guid: Some(entry.guid.to_string()),
                enabled: entry.enabled,
                fields,
            });
        }
        doc_node.set_components(records)?;
        document.nodes.push(doc_node);
    }

    let root_indices: Vec<usize> = roots.iter().filter_map(|r| index_of.get(r).copied()).collect();
    document.roots.extend(&root_indices);
    debug!(nodes = order.len(), roots = root_indices.len(), "exported node trees");
    Ok(Export { roots: root_indices, external })
}

struct PlannedComponent<'a> {
    type_name: &'a str,
    guid: Option<&'a str>,
    enabled: bool,
    values: Vec<(&'a str, FieldValue)>,
    node_refs: Vec<(&'a str, Option<usize>)>,
}

/// Builds the nodes of `document` under `parent`.
///
/// Every root is linked last, so Awake runs with all fields and references
/// already in place.
pub fn import_document(
    cx: &mut Context,
    document: &SceneDocument,
    store: &TypeStore,
    parent: Parent,
) -> PersistenceResult<ImportedScene> {
    if let Parent::Node(parent_id) = parent {
        if !cx.scene().contains_node(parent_id) {
            return Err(SceneError::UnknownNode(parent_id).into());
        }
    }
    let roots = document.effective_roots()?;
    let plans = plan_components(document, store)?;

    let mut imported = ImportedScene::default();
    for doc_node in &document.nodes {
        let guid = doc_node.extras.guid.as_deref().map_or_else(Guid::new_v4, Guid::from);
        let id = cx.create_node_with_guid(doc_node.name.clone(), guid, Parent::Detached)?;
        cx.scene_mut().set_transform(id, doc_node.transform());
        cx.scene_mut().set_active_self(id, doc_node.extras.active);
        imported.nodes.push(id);
    }

    if let Err(error) = link_children(cx, document, &imported.nodes) {
        discard(cx, &imported.nodes);
        return Err(error);
    }

    let mut pending_refs = Vec::new();
    for (index, node_plans) in plans.into_iter().enumerate() {
        let node = imported.nodes[index];
        let mut created = Vec::with_capacity(node_plans.len());
        for plan in node_plans {
            let Some(plan) = plan else {
                created.push(None);
                continue;
            };
            let id = create_component(cx, store, node, &plan);
            if let Some(id) = id {
                pending_refs.extend(plan.node_refs.into_iter().map(|(field, target)| (id, field, target)));
            }
            created.push(id);
        }
        imported.components.push(created);
    }

    for (component, field, target) in pending_refs {
        let value = FieldValue::Node(target.map(|i| imported.nodes[i]));
        set_component_field(cx, component, field, value);
    }

    for (index, &id) in imported.nodes.iter().enumerate() {
        let parentless = cx.scene().node(id).is_some_and(|n| n.parent().is_none());
        if parentless && !roots.contains(&index) {
            debug!(index, "node outside every root discarded");
            cx.destroy_node(id);
        }
    }
    for &root in &roots {
        let id = imported.nodes[root];
        if let Err(error) = cx.set_parent(id, parent) {
            discard(cx, &imported.nodes);
            return Err(error.into());
        }
        imported.roots.push(id);
    }
    debug!(nodes = imported.nodes.len(), roots = imported.roots.len(), "imported scene document");
    Ok(imported)
}

/// Clones `source` and its subtree through the persistence format.
///
/// Guids of the copies derive from the originals and `seed`, so the same
/// seed on two peers yields the same identities. References between nodes
/// of the subtree point at the copies; references to nodes outside it are
/// kept as they are.
pub fn instantiate(
    cx: &mut Context,
    store: &TypeStore,
    source: NodeId,
    parent: Parent,
    seed: Option<u64>,
) -> PersistenceResult<NodeId> {
    if !cx.scene().contains_node(source) {
        return Err(SceneError::UnknownNode(source).into());
    }
    let mut document = SceneDocument::new();
    let export = export_inner(cx.scene(), &[source], &mut document)?;

    let seed = seed.unwrap_or_else(|| uuid::Uuid::new_v4().as_u64_pair().0);
    let derive = |guid: &str| Guid::from(guid).derive(seed).to_string();
    for node in &mut document.nodes {
        node.extras.guid = node.extras.guid.as_deref().map(derive);
        let mut records = node.components()?;
        for record in &mut records {
            record.guid = record.guid.as_deref().map(derive);
        }
        node.set_components(records)?;
    }

    let imported = import_document(cx, &document, store, Parent::Detached)?;
    for reference in export.external {
        let component = imported
            .components
            .get(reference.node)
            .and_then(|records| records.get(reference.record))
            .copied()
            .flatten();
        if let Some(component) = component {
            let target = cx.scene().contains_node(reference.target).then_some(reference.target);
            set_component_field(cx, component, reference.field, FieldValue::Node(target));
        }
    }

    let root = imported
        .roots
        .first()
        .copied()
        .ok_or_else(|| PersistenceError::MalformedDocument("instantiated tree has no root".into()))?;
    if let Err(error) = cx.set_parent(root, parent) {
        cx.destroy_node(root);
        return Err(error.into());
    }
    debug!(?source, clone = ?root, seed, "instantiated node tree");
    Ok(root)
}

fn plan_components<'a>(
    document: &'a SceneDocument,
    store: &TypeStore,
) -> PersistenceResult<Vec<Vec<Option<PlannedComponent<'a>>>>> {
    let node_count = document.nodes.len();
    let mut plans = Vec::with_capacity(node_count);
    for (index, doc_node) in document.nodes.iter().enumerate() {
        let records = doc_node.extensions.get(tandem_shared::COMPONENTS_EXTENSION);
        let records: Vec<&'a Map<String, Value>> = match records {
            Some(Value::Object(extension)) => match extension.get("builtin_components") {
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
                Some(_) => {
                    return Err(PersistenceError::MalformedDocument(format!(
                        "node {index}: builtin_components is not an array"
                    )))
                }
                None => Vec::new(),
            },
            Some(_) => {
                return Err(PersistenceError::MalformedDocument(format!(
                    "node {index}: components extension is not an object"
                )))
            }
            None => Vec::new(),
        };

        let mut node_plans = Vec::with_capacity(records.len());
        for record in records {
            node_plans.push(plan_record(document, store, record, node_count)?);
        }
        plans.push(node_plans);
    }
    Ok(plans)
}

fn plan_record<'a>(
    document: &SceneDocument,
    store: &TypeStore,
    record: &'a Map<String, Value>,
    node_count: usize,
) -> PersistenceResult<Option<PlannedComponent<'a>>> {
    let Some(type_name) = record.get("name").and_then(Value::as_str) else {
        return Err(PersistenceError::MalformedDocument("component record without a type name".into()));
    };
    if !store.contains(type_name) {
        warn!(component = type_name, "unknown component type, record skipped");
        return Ok(None);
    }
    let mut plan = PlannedComponent {
        type_name,
        guid: record.get("guid").and_then(Value::as_str),
        enabled: record.get("enabled").and_then(Value::as_bool).unwrap_or(true),
        values: Vec::new(),
        node_refs: Vec::new(),
    };
    let schema = store.schema(type_name);
    for (field, value) in record {
        if matches!(field.as_str(), "name" | "guid" | "enabled") {
            continue;
        }
        let Some(descriptor) = schema.and_then(|s| s.field(field)) else {
            warn!(component = type_name, field = field.as_str(), "unknown field ignored");
            continue;
        };
        match decode_field(document, descriptor.kind, value) {
            Ok(DecodedField::Value(value)) => plan.values.push((field.as_str(), value)),
            Ok(DecodedField::Node(Some(target))) if target >= node_count => {
                warn!(component = type_name, field = field.as_str(), target, "node reference out of range, left unset");
                plan.node_refs.push((field.as_str(), None));
            }
            Ok(DecodedField::Node(target)) => plan.node_refs.push((field.as_str(), target)),
            Err(DecodeFailure::Type) => {
                warn!(component = type_name, field = field.as_str(), expected = descriptor.kind.name(), "field has the wrong type, default kept");
            }
            Err(DecodeFailure::Path(error)) => return Err(error),
        }
    }
    Ok(Some(plan))
}

fn link_children(cx: &mut Context, document: &SceneDocument, nodes: &[NodeId]) -> PersistenceResult<()> {
    for (index, doc_node) in document.nodes.iter().enumerate() {
        for &child in &doc_node.children {
            cx.set_parent(nodes[child], Parent::Node(nodes[index]))?;
        }
    }
    Ok(())
}

fn create_component(
    cx: &mut Context,
    store: &TypeStore,
    node: NodeId,
    plan: &PlannedComponent<'_>,
) -> Option<ComponentId> {
    let mut behaviour = match store.create(plan.type_name) {
        Ok(behaviour) => behaviour,
        Err(error) => {
            warn!(%error, "component record skipped");
            return None;
        }
    };
    match behaviour.persistent_mut() {
        Some(persistent) => {
            for (field, value) in &plan.values {
                if let Err(error) = persistent.set_field(field, value.clone()) {
                    warn!(%error, "field not applied");
                }
            }
        }
        None if !plan.values.is_empty() => {
            warn!(component = plan.type_name, "fields given for a component without a schema");
        }
        None => {}
    }
    let mut options = AttachOptions::new().enabled(plan.enabled);
    if let Some(guid) = plan.guid {
        options = options.guid(guid);
    }
    cx.attach_boxed(node, behaviour, options)
}

fn set_component_field(cx: &mut Context, component: ComponentId, field: &str, value: FieldValue) {
    let persistent = cx
        .scene_mut()
        .behaviour_mut(component)
        .and_then(|behaviour| behaviour.persistent_mut());
    match persistent {
        Some(persistent) => {
            if let Err(error) = persistent.set_field(field, value) {
                warn!(%error, "reference not applied");
            }
        }
        None => warn!(?component, field, "reference target component has no schema"),
    }
}

/// Destroys partially imported nodes.
fn discard(cx: &mut Context, nodes: &[NodeId]) {
    for &node in nodes {
        if cx.scene().contains_node(node) {
            cx.destroy_node(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Behaviour, ComponentKind, ComponentType};
    use serde_json::json;
    use tandem_shared::Vec3;

    #[derive(Default)]
    struct Follower {
        target: Option<NodeId>,
        offset: Vec3,
    }

    static FOLLOWER_SCHEMA: ComponentSchema = ComponentSchema::new(
        "Follower",
        &[
            FieldDescriptor::new("target", FieldKind::NodeRef),
            FieldDescriptor::new("offset", FieldKind::Vec3),
        ],
    );

    impl ComponentKind for Follower {
        const TYPE: &'static ComponentType = &ComponentType::new("Follower");
    }

    impl Behaviour for Follower {
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

    impl Persistent for Follower {
        fn schema(&self) -> &'static ComponentSchema {
            &FOLLOWER_SCHEMA
        }
        fn field(&self, name: &str) -> Option<FieldValue> {
            match name {
                "target" => Some(FieldValue::Node(self.target)),
                "offset" => Some(FieldValue::Vec3(self.offset)),
                _ => None,
            }
        }
        fn set_field(&mut self, name: &str, value: FieldValue) -> PersistenceResult<()> {
            match name {
                "target" => self.target = value.as_node().ok_or_else(|| FOLLOWER_SCHEMA.type_mismatch(name))?,
                "offset" => self.offset = value.as_vec3().ok_or_else(|| FOLLOWER_SCHEMA.type_mismatch(name))?,
                _ => return Err(FOLLOWER_SCHEMA.unknown_field(name)),
            }
            Ok(())
        }
    }

    fn store() -> TypeStore {
        let mut store = TypeStore::new();
        store.register::<Follower>();
        store
    }

    #[test]
    fn test_malformed_path_fails_without_side_effects() {
        let mut cx = Context::new();
        let document: SceneDocument = serde_json::from_value(json!({
            "nodes": [{
                "name": "a",
                "extensions": { "TANDEM_components": { "builtin_components": [
                    { "name": "Follower", "target": "nodes/0" }
                ]}}
            }]
        }))
        .unwrap();
        let err = import_document(&mut cx, &document, &store(), Parent::Root).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidReference(_)));
        assert_eq!(cx.scene().node_count(), 0);
    }

    #[test]
    fn test_unknown_type_and_field_are_skipped() {
        let mut cx = Context::new();
        let document: SceneDocument = serde_json::from_value(json!({
            "nodes": [{
                "name": "a",
                "extensions": { "TANDEM_components": { "builtin_components": [
                    { "name": "Mystery" },
                    { "name": "Follower", "wobble": 3, "offset": { "x": 1.0, "y": 2.0, "z": 3.0 }, "target": "/nodes/9" }
                ]}}
            }]
        }))
        .unwrap();
        let imported = import_document(&mut cx, &document, &store(), Parent::Root).unwrap();
        assert_eq!(imported.components[0][0], None);
        let follower = imported.components[0][1].unwrap();
        let follower = cx.scene().component::<Follower>(follower).unwrap();
        assert_eq!(follower.offset, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(follower.target, None);
    }

    #[test]
    fn test_instantiate_keeps_external_references() {
        let mut cx = Context::new();
        let anchor = cx.create_node("anchor", Parent::Root).unwrap();
        let prefab = cx.create_node("prefab", Parent::Root).unwrap();
        let child = cx.create_node("child", Parent::Node(prefab)).unwrap();
        cx.attach(prefab, Follower { target: Some(anchor), offset: Vec3::ZERO });
        cx.attach(child, Follower { target: Some(prefab), offset: Vec3::Y });

        let clone = instantiate(&mut cx, &store(), prefab, Parent::Root, Some(7)).unwrap();
        let clone_child = cx.scene().node(clone).unwrap().children()[0];

        let outer = cx.scene().get::<Follower>(clone).unwrap();
        assert_eq!(cx.scene().component::<Follower>(outer).unwrap().target, Some(anchor));
        let inner = cx.scene().get::<Follower>(clone_child).unwrap();
        assert_eq!(cx.scene().component::<Follower>(inner).unwrap().target, Some(clone));

        let original_guid = cx.scene().node(prefab).unwrap().guid().clone();
        assert_eq!(cx.scene().node(clone).unwrap().guid(), &original_guid.derive(7));
    }
}
