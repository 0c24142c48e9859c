//! # Field Schemas
//!
//! Each persistent component type declares a static table of field
//! descriptors. The serializer walks the table; the component only maps
//! field names to values.
//!
//! ```rust,ignore
//! static SPINNER_SCHEMA: ComponentSchema = ComponentSchema::new(
//!     "Spinner",
//!     &[
//!         FieldDescriptor::new("speed", FieldKind::Number),
//!         FieldDescriptor::new("target", FieldKind::NodeRef),
//!     ],
//! );
//! ```

use crate::error::{PersistenceError, PersistenceResult};
use crate::scene::NodeId;
use tandem_shared::{Quaternion, Vec3};

/// Asset arrays a reference field can point into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// `/meshes/<i>`
    Mesh,
    /// `/materials/<i>`
    Material,
    /// `/textures/<i>`
    Texture,
}

impl AssetKind {
    /// Name of the document array.
    #[must_use]
    pub const fn array_name(self) -> &'static str {
        match self {
            Self::Mesh => "meshes",
            Self::Material => "materials",
            Self::Texture => "textures",
        }
    }
}

/// Handle to an entry of a document asset array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AssetRef {
    /// Which array
    pub kind: AssetKind,
    /// Index into the array
    pub index: usize,
}

impl AssetRef {
    /// Creates an asset handle.
    #[must_use]
    pub const fn new(kind: AssetKind, index: usize) -> Self {
        Self { kind, index }
    }
}

/// Declared type of a persistent field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// JSON boolean
    Bool,
    /// JSON number, stored as `f64`
    Number,
    /// JSON integer
    Integer,
    /// JSON string
    String,
    /// `{x, y, z}`
    Vec3,
    /// `{x, y, z, w}`
    Quaternion,
    /// `"/nodes/<i>"` or null
    NodeRef,
    /// `"/<array>/<i>"` or null
    AssetRef(AssetKind),
}

impl FieldKind {
    /// Human-readable kind name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "a boolean",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::String => "a string",
            Self::Vec3 => "a vector {x, y, z}",
            Self::Quaternion => "a quaternion {x, y, z, w}",
            Self::NodeRef => "a node reference",
            Self::AssetRef(AssetKind::Mesh) => "a mesh reference",
            Self::AssetRef(AssetKind::Material) => "a material reference",
            Self::AssetRef(AssetKind::Texture) => "a texture reference",
        }
    }
}

/// One persistent field of a component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name in the component record
    pub name: &'static str,
    /// Declared kind
    pub kind: FieldKind,
}

impl FieldDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Static field table of a component type.
#[derive(Debug)]
pub struct ComponentSchema {
    /// Type discriminator written to the record
    pub type_name: &'static str,
    /// Persistent fields in serialization order
    pub fields: &'static [FieldDescriptor],
}

impl ComponentSchema {
    /// Creates a schema.
    #[must_use]
    pub const fn new(type_name: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self { type_name, fields }
    }

    /// Looks up a field descriptor by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Error for a field this schema does not declare.
    #[must_use]
    pub fn unknown_field(&self, field: &str) -> PersistenceError {
        PersistenceError::UnknownField {
            component: self.type_name.to_owned(),
            field: field.to_owned(),
        }
    }

    /// Error for a value that does not match the declared kind of `field`.
    #[must_use]
    pub fn type_mismatch(&self, field: &str) -> PersistenceError {
        match self.field(field) {
            Some(descriptor) => PersistenceError::FieldType {
                component: self.type_name.to_owned(),
                field: field.to_owned(),
                expected: descriptor.kind.name(),
            },
            None => self.unknown_field(field),
        }
    }
}

/// A decoded field value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Boolean
    Bool(bool),
    /// Floating point number
    Number(f64),
    /// Integer
    Integer(i64),
    /// String
    String(String),
    /// Vector
    Vec3(Vec3),
    /// Rotation
    Quaternion(Quaternion),
    /// Node reference, `None` when unset
    Node(Option<NodeId>),
    /// Asset reference, `None` when unset
    Asset(Option<AssetRef>),
}

impl FieldValue {
    /// Returns true if the value can be stored in a field of `kind`.
    #[must_use]
    pub fn matches(&self, kind: FieldKind) -> bool {
        match (self, kind) {
            (Self::Bool(_), FieldKind::Bool)
            | (Self::Number(_) | Self::Integer(_), FieldKind::Number)
            | (Self::Integer(_), FieldKind::Integer)
            | (Self::String(_), FieldKind::String)
            | (Self::Vec3(_), FieldKind::Vec3)
            | (Self::Quaternion(_), FieldKind::Quaternion)
            | (Self::Node(_), FieldKind::NodeRef) => true,
            (Self::Asset(None), FieldKind::AssetRef(_)) => true,
            (Self::Asset(Some(asset)), FieldKind::AssetRef(kind)) => asset.kind == kind,
            _ => false,
        }
    }

    /// Boolean payload
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric payload; integers widen to `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer payload
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Vector payload
    #[must_use]
    pub const fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Self::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    /// Rotation payload
    #[must_use]
    pub const fn as_quaternion(&self) -> Option<Quaternion> {
        match self {
            Self::Quaternion(v) => Some(*v),
            _ => None,
        }
    }

    /// Node reference payload. `Some(None)` is an unset reference.
    #[must_use]
    pub const fn as_node(&self) -> Option<Option<NodeId>> {
        match self {
            Self::Node(v) => Some(*v),
            _ => None,
        }
    }

    /// Asset reference payload. `Some(None)` is an unset reference.
    #[must_use]
    pub const fn as_asset(&self) -> Option<Option<AssetRef>> {
        match self {
            Self::Asset(v) => Some(*v),
            _ => None,
        }
    }
}

/// Field access for components with a static schema.
///
/// `field` returns `None` only for names the schema does not declare.
pub trait Persistent {
    /// Static field table of this type.
    fn schema(&self) -> &'static ComponentSchema;

    /// Current value of a field.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Overwrites a field.
    fn set_field(&mut self, name: &str, value: FieldValue) -> PersistenceResult<()>;
}
