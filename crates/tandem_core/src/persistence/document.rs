//! # Scene Documents
//!
//! JSON interchange document in the shape of a glTF file: flat node array
//! with child indices, plus asset arrays that reference fields point into.
//! Components live under a reserved node extension:
//!
//! ```json
//! {
//!   "name": "door",
//!   "children": [4],
//!   "extras": { "guid": "9b1f..." },
//!   "extensions": {
//!     "TANDEM_components": {
//!       "builtin_components": [
//!         { "name": "Hinge", "guid": "a03c...", "enabled": true, "target": "/nodes/4" }
//!       ]
//!     }
//!   }
//! }
//! ```

use super::schema::{AssetKind, AssetRef, FieldKind, FieldValue};
use crate::error::{PersistenceError, PersistenceResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tandem_shared::{Quaternion, Transform, Vec3, COMPONENTS_EXTENSION};

/// Document header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Format version
    pub version: String,
    /// Producing tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
}

impl Default for AssetInfo {
    fn default() -> Self {
        Self {
            version: "2.0".to_owned(),
            generator: Some(concat!("tandem ", env!("CARGO_PKG_VERSION")).to_owned()),
        }
    }
}

/// A scene interchange document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDocument {
    /// Header
    #[serde(default)]
    pub asset: AssetInfo,
    /// Indices of the top-level nodes
    #[serde(default, rename = "scene")]
    pub roots: Vec<usize>,
    /// All nodes, parents and children alike
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
    /// Opaque mesh entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meshes: Vec<Value>,
    /// Opaque material entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<Value>,
    /// Opaque texture entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub textures: Vec<Value>,
}

impl SceneDocument {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a document from JSON text.
    pub fn from_json(text: &str) -> PersistenceResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Writes the document as pretty-printed JSON.
    pub fn to_json(&self) -> PersistenceResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The asset array of the given kind.
    #[must_use]
    pub fn assets(&self, kind: AssetKind) -> &[Value] {
        match kind {
            AssetKind::Mesh => &self.meshes,
            AssetKind::Material => &self.materials,
            AssetKind::Texture => &self.textures,
        }
    }

    pub(crate) fn assets_mut(&mut self, kind: AssetKind) -> &mut Vec<Value> {
        match kind {
            AssetKind::Mesh => &mut self.meshes,
            AssetKind::Material => &mut self.materials,
            AssetKind::Texture => &mut self.textures,
        }
    }

    /// Top-level nodes: the explicit root list, or every parentless node
    /// when the list is empty.
    pub(crate) fn effective_roots(&self) -> PersistenceResult<Vec<usize>> {
        let mut parent_of = vec![None; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            for &child in &node.children {
                let slot = parent_of.get_mut(child).ok_or_else(|| {
                    PersistenceError::MalformedDocument(format!("node {index} has out-of-range child {child}"))
                })?;
                if slot.is_some() || child == index {
                    return Err(PersistenceError::MalformedDocument(format!(
                        "node {child} has more than one parent"
                    )));
                }
                *slot = Some(index);
            }
        }
        let roots = if self.roots.is_empty() {
            (0..self.nodes.len()).filter(|&i| parent_of[i].is_none()).collect()
        } else {
            self.roots.clone()
        };
        for &root in &roots {
            match parent_of.get(root) {
                Some(None) => {}
                Some(Some(_)) => {
                    return Err(PersistenceError::MalformedDocument(format!(
                        "root node {root} also has a parent"
                    )))
                }
                None => {
                    return Err(PersistenceError::MalformedDocument(format!(
                        "root index {root} is out of range"
                    )))
                }
            }
        }
        Ok(roots)
    }
}

/// Node-level custom data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeExtras {
    /// Persistent identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    /// The node's own active flag
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Default for NodeExtras {
    fn default() -> Self {
        Self { guid: None, active: true }
    }
}

/// One node of a document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Child node indices, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<usize>,
    /// Local position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<[f32; 3]>,
    /// Local rotation `[x, y, z, w]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<[f32; 4]>,
    /// Local scale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<[f32; 3]>,
    /// Identity and active flag
    #[serde(default)]
    pub extras: NodeExtras,
    /// Extension payloads by extension name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

impl NodeDocument {
    /// Local transform, identity for missing parts.
    #[must_use]
    pub fn transform(&self) -> Transform {
        Transform::new(
            self.translation.map_or(Vec3::ZERO, Vec3::from_array),
            self.rotation.map_or(Quaternion::IDENTITY, Quaternion::from_array),
            self.scale.map_or(Vec3::ONE, Vec3::from_array),
        )
    }

    /// Stores a local transform, omitting identity parts.
    pub fn set_transform(&mut self, transform: &Transform) {
        self.translation = (transform.position != Vec3::ZERO).then(|| transform.position.to_array());
        self.rotation = (transform.rotation != Quaternion::IDENTITY).then(|| transform.rotation.to_array());
        self.scale = (transform.scale != Vec3::ONE).then(|| transform.scale.to_array());
    }

    /// Component records of this node.
    pub fn components(&self) -> PersistenceResult<Vec<ComponentRecord>> {
        match self.extensions.get(COMPONENTS_EXTENSION) {
            Some(value) => {
                let extension: ComponentsExtension = serde_json::from_value(value.clone())?;
                Ok(extension.builtin_components)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Replaces the component records of this node.
    pub fn set_components(&mut self, records: Vec<ComponentRecord>) -> PersistenceResult<()> {
        if records.is_empty() {
            self.extensions.remove(COMPONENTS_EXTENSION);
            return Ok(());
        }
        let value = serde_json::to_value(ComponentsExtension { builtin_components: records })?;
        self.extensions.insert(COMPONENTS_EXTENSION.to_owned(), value);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct ComponentsExtension {
    #[serde(default)]
    builtin_components: Vec<ComponentRecord>,
}

/// One serialized component: type discriminator, identity, enabled flag
/// and the field map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    /// Type discriminator
    #[serde(rename = "name")]
    pub type_name: String,
    /// Persistent identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    /// The component's own `enabled` flag
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Field values by name
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

const fn default_true() -> bool {
    true
}

/// A field decoded from a document, before node references are resolved.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum DecodedField {
    Value(FieldValue),
    /// Index into the document's node array
    Node(Option<usize>),
}

/// Parses `"/<array>/<index>"`.
pub(crate) fn parse_path(path: &str) -> PersistenceResult<(&str, usize)> {
    let invalid = || PersistenceError::InvalidReference(path.to_owned());
    let rest = path.strip_prefix('/').ok_or_else(invalid)?;
    let (array, index) = rest.split_once('/').ok_or_else(invalid)?;
    let index = index.parse::<usize>().map_err(|_| invalid())?;
    Ok((array, index))
}

pub(crate) fn format_path(array: &str, index: usize) -> String {
    format!("/{array}/{index}")
}

/// Encodes a field value. `node_index` maps a node handle to its document
/// index; unmapped nodes are written as null.
pub(crate) fn encode_field(
    value: &FieldValue,
    node_index: impl Fn(crate::scene::NodeId) -> Option<usize>,
) -> PersistenceResult<Value> {
    Ok(match value {
        FieldValue::Bool(v) => Value::Bool(*v),
        FieldValue::Number(v) => serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number),
        FieldValue::Integer(v) => Value::from(*v),
        FieldValue::String(v) => Value::String(v.clone()),
        FieldValue::Vec3(v) => serde_json::to_value(v)?,
        FieldValue::Quaternion(v) => serde_json::to_value(v)?,
        FieldValue::Node(node) => match node.and_then(node_index) {
            Some(index) => Value::String(format_path("nodes", index)),
            None => Value::Null,
        },
        FieldValue::Asset(asset) => match asset {
            Some(asset) => Value::String(format_path(asset.kind.array_name(), asset.index)),
            None => Value::Null,
        },
    })
}

/// Decodes a field value of the declared kind.
///
/// Asset references are checked against the document; an out-of-range
/// index decodes as an unset reference. Node indices are checked by the
/// importer once the node table exists.
pub(crate) fn decode_field(
    document: &SceneDocument,
    kind: FieldKind,
    value: &Value,
) -> Result<DecodedField, DecodeFailure> {
    let decoded = match kind {
        FieldKind::Bool => FieldValue::Bool(value.as_bool().ok_or(DecodeFailure::Type)?),
        FieldKind::Number => FieldValue::Number(value.as_f64().ok_or(DecodeFailure::Type)?),
        FieldKind::Integer => FieldValue::Integer(value.as_i64().ok_or(DecodeFailure::Type)?),
        FieldKind::String => FieldValue::String(value.as_str().ok_or(DecodeFailure::Type)?.to_owned()),
        FieldKind::Vec3 => {
            FieldValue::Vec3(serde_json::from_value(value.clone()).map_err(|_| DecodeFailure::Type)?)
        }
        FieldKind::Quaternion => {
            FieldValue::Quaternion(serde_json::from_value(value.clone()).map_err(|_| DecodeFailure::Type)?)
        }
        FieldKind::NodeRef => {
            let Some(path) = reference(value)? else {
                return Ok(DecodedField::Node(None));
            };
            let (array, index) = parse_path(path).map_err(DecodeFailure::Path)?;
            if array != "nodes" {
                return Err(DecodeFailure::Path(PersistenceError::InvalidReference(path.to_owned())));
            }
            return Ok(DecodedField::Node(Some(index)));
        }
        FieldKind::AssetRef(asset_kind) => {
            let Some(path) = reference(value)? else {
                return Ok(DecodedField::Value(FieldValue::Asset(None)));
            };
            let (array, index) = parse_path(path).map_err(DecodeFailure::Path)?;
            if array != asset_kind.array_name() {
                return Err(DecodeFailure::Path(PersistenceError::InvalidReference(path.to_owned())));
            }
            if index >= document.assets(asset_kind).len() {
                tracing::warn!(path, "asset reference out of range, left unset");
                FieldValue::Asset(None)
            } else {
                FieldValue::Asset(Some(AssetRef::new(asset_kind, index)))
            }
        }
    };
    Ok(DecodedField::Value(decoded))
}

fn reference(value: &Value) -> Result<Option<&str>, DecodeFailure> {
    match value {
        Value::Null => Ok(None),
        Value::String(path) => Ok(Some(path)),
        _ => Err(DecodeFailure::Type),
    }
}

/// Why a field could not be decoded.
#[derive(Debug)]
pub(crate) enum DecodeFailure {
    /// JSON value of the wrong shape; the field keeps its default.
    Type,
    /// Malformed reference path; fails the whole import.
    Path(PersistenceError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_path() {
        assert_eq!(parse_path("/nodes/3").unwrap(), ("nodes", 3));
        assert!(parse_path("nodes/3").is_err());
        assert!(parse_path("/nodes/x").is_err());
        assert!(parse_path("/nodes").is_err());
    }

    #[test]
    fn test_component_records_live_under_extension() {
        let mut node = NodeDocument::default();
        let mut fields = Map::new();
        fields.insert("speed".into(), json!(2.5));
        node.set_components(vec![ComponentRecord {
            type_name: "Spinner".into(),
            guid: Some("g".into()),
            enabled: false,
            fields,
        }])
        .unwrap();

        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(
            value["extensions"][COMPONENTS_EXTENSION]["builtin_components"][0],
            json!({ "name": "Spinner", "guid": "g", "enabled": false, "speed": 2.5 })
        );
        let records = node.components().unwrap();
        assert_eq!(records[0].fields["speed"], json!(2.5));
    }

    #[test]
    fn test_decode_asset_out_of_range_is_unset() {
        let mut doc = SceneDocument::new();
        doc.meshes.push(json!({ "name": "cube" }));
        let kind = FieldKind::AssetRef(AssetKind::Mesh);

        let hit = decode_field(&doc, kind, &json!("/meshes/0")).unwrap();
        assert_eq!(hit, DecodedField::Value(FieldValue::Asset(Some(AssetRef::new(AssetKind::Mesh, 0)))));
        let miss = decode_field(&doc, kind, &json!("/meshes/7")).unwrap();
        assert_eq!(miss, DecodedField::Value(FieldValue::Asset(None)));
        assert!(matches!(
            decode_field(&doc, kind, &json!("/textures/0")),
            Err(DecodeFailure::Path(_))
        ));
        assert!(matches!(decode_field(&doc, kind, &json!(4)), Err(DecodeFailure::Type)));
    }

    #[test]
    fn test_effective_roots_rejects_shared_children() {
        let mut doc = SceneDocument::new();
        doc.nodes = vec![
            NodeDocument { children: vec![2], ..Default::default() },
            NodeDocument { children: vec![2], ..Default::default() },
            NodeDocument::default(),
        ];
        assert!(matches!(doc.effective_roots(), Err(PersistenceError::MalformedDocument(_))));

        doc.nodes[1].children.clear();
        assert_eq!(doc.effective_roots().unwrap(), vec![0, 1]);
    }
}
