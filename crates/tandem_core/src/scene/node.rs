//! # Scene Nodes
//!
//! A node carries a local transform, an ordered child list and an ordered
//! component list. Parent and child links are arena handles, so the tree has
//! bidirectional navigation without reference cycles.

use super::ids::{ComponentId, Guid, NodeId};
use tandem_shared::Transform;

/// A scene-graph tree node.
#[derive(Debug)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) guid: Guid,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) components: Vec<ComponentId>,
    pub(crate) transform: Transform,
    pub(crate) active_self: bool,
    /// Cached: `active_self` of this node and every ancestor.
    pub(crate) active_in_hierarchy: bool,
    /// Cached: the node is reachable from a scene root.
    pub(crate) in_scene: bool,
}

impl Node {
    pub(crate) fn new(name: String, guid: Guid) -> Self {
        Self {
            name,
            guid,
            parent: None,
            children: Vec::new(),
            components: Vec::new(),
            transform: Transform::IDENTITY,
            active_self: true,
            active_in_hierarchy: true,
            in_scene: false,
        }
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Persistent identity
    #[must_use]
    pub fn guid(&self) -> &Guid {
        &self.guid
    }

    /// Parent node, `None` for roots and detached nodes.
    #[must_use]
    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in order
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Attached components in attach order
    #[must_use]
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    /// Local transform relative to the parent
    #[must_use]
    pub const fn transform(&self) -> &Transform {
        &self.transform
    }

    /// The node's own active flag
    #[must_use]
    pub const fn active_self(&self) -> bool {
        self.active_self
    }

    /// True iff this node and all its ancestors are active.
    #[must_use]
    pub const fn active_in_hierarchy(&self) -> bool {
        self.active_in_hierarchy
    }

    /// True if the node hangs under a scene root.
    #[must_use]
    pub const fn is_in_scene(&self) -> bool {
        self.in_scene
    }
}
