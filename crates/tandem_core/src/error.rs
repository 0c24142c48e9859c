//! # Core Error Types
//!
//! Usage errors inside the runtime are logged and swallowed at the boundary
//! where they happen. The types here cover what escapes a public entry
//! point: hook failures (caught by the lifecycle manager), programmer
//! contract violations, persistence and configuration failures.

use crate::scene::{ComponentId, NodeId};
use thiserror::Error;

/// Failure raised by a lifecycle hook, frame callback or coroutine.
///
/// The lifecycle manager catches these per component and logs them; they
/// never stop other components from running.
#[derive(Error, Debug)]
pub enum BehaviourError {
    /// Free-form failure.
    #[error("{0}")]
    Message(String),

    /// A required sibling component is missing.
    #[error("missing required component: {0}")]
    MissingComponent(&'static str),

    /// A required context resource is missing.
    #[error("missing required resource: {0}")]
    MissingResource(&'static str),

    /// Wrapped error from another subsystem.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + 'static>),
}

impl BehaviourError {
    /// Creates a free-form hook error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Result of a lifecycle hook.
pub type HookResult = Result<(), BehaviourError>;

/// Contract violations on scene structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// The node id is stale or was never issued.
    #[error("unknown or destroyed node {0:?}")]
    UnknownNode(NodeId),

    /// The component id is stale or was never issued.
    #[error("unknown or destroyed component {0:?}")]
    UnknownComponent(ComponentId),

    /// Reparenting would make a node its own ancestor.
    #[error("cannot parent {node:?} under its descendant {parent:?}")]
    CyclicParent {
        /// Node being moved
        node: NodeId,
        /// Requested parent
        parent: NodeId,
    },
}

/// Result type for scene structure operations.
pub type SceneResult<T> = Result<T, SceneError>;

/// Failures while writing or reading the component persistence format.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// No factory is registered for a component type name.
    #[error("no factory registered for component type `{0}`")]
    UnknownType(String),

    /// A component does not declare the field being set.
    #[error("component `{component}` has no field `{field}`")]
    UnknownField {
        /// Component type name
        component: String,
        /// Field name
        field: String,
    },

    /// A field value does not match its declared kind.
    #[error("field `{field}` of `{component}` expects {expected}")]
    FieldType {
        /// Component type name
        component: String,
        /// Field name
        field: String,
        /// Declared kind
        expected: &'static str,
    },

    /// A reference path is not of the form `/<array>/<index>`.
    #[error("malformed reference path `{0}`")]
    InvalidReference(String),

    /// The document tree is inconsistent.
    #[error("malformed scene document: {0}")]
    MalformedDocument(String),

    /// Scene structure failure while building the imported tree.
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
