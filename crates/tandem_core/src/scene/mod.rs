//! # Scene Graph
//!
//! Arena storage for nodes and components. The scene owns the data; the
//! [`Context`](crate::Context) owns the scene and drives lifecycle hooks on
//! top of the structural operations defined here.
//!
//! ## Layout
//!
//! - Nodes and components live in generational arenas
//! - Parent/child links are [`NodeId`] handles (the child does not own its parent)
//! - Each node lists its components in attach order
//! - A node is *in the scene* when it hangs under one of [`Scene::roots`]

mod ids;
mod node;
mod registry;
mod transform;

pub use ids::{ArenaId, ComponentId, Guid, NodeId};
pub use node::Node;

use crate::arena::Arena;
use crate::component::{Behaviour, ComponentType, LifecycleState};
use crate::error::{SceneError, SceneResult};
use crate::lifecycle::Hook;

/// Storage record of one component.
pub(crate) struct ComponentEntry {
    pub(crate) guid: Guid,
    pub(crate) type_info: &'static ComponentType,
    pub(crate) node: Option<NodeId>,
    pub(crate) enabled: bool,
    pub(crate) state: LifecycleState,
    pub(crate) started: bool,
    /// `None` while one of the behaviour's hooks is executing.
    pub(crate) behaviour: Option<Box<dyn Behaviour>>,
    /// Destroy was requested while a hook was executing.
    pub(crate) pending_destroy: bool,
    /// Lifecycle hooks requested while a hook was executing.
    pub(crate) deferred: Vec<Hook>,
}

impl ComponentEntry {
    pub(crate) fn new(
        guid: Guid,
        behaviour: Box<dyn Behaviour>,
        node: Option<NodeId>,
        enabled: bool,
    ) -> Self {
        Self {
            guid,
            type_info: behaviour.component_type(),
            node,
            enabled,
            state: LifecycleState::Unattached,
            started: false,
            behaviour: Some(behaviour),
            pending_destroy: false,
            deferred: Vec::new(),
        }
    }
}

/// Where a node is linked to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parent {
    /// Top level of the scene
    Root,
    /// Child of another node
    Node(NodeId),
    /// Outside the scene: components do not awake or run
    Detached,
}

/// The scene graph: nodes, components and the root list.
#[derive(Default)]
pub struct Scene {
    pub(crate) nodes: Arena<NodeId, Node>,
    pub(crate) components: Arena<ComponentId, ComponentEntry>,
    pub(crate) roots: Vec<NodeId>,
}

impl Scene {
    /// Creates an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes (in the scene or detached)
    #[must_use]
    pub const fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live components
    #[must_use]
    pub const fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Top-level nodes in order
    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Gets a node by handle.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Returns true if the handle refers to a live node.
    #[must_use]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    /// Renames a node.
    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.name = name.into();
        true
    }

    /// Finds a live node by persistent guid.
    #[must_use]
    pub fn find_node_by_guid(&self, guid: &str) -> Option<NodeId> {
        self.nodes.iter().find(|(_, node)| node.guid == *guid).map(|(id, _)| id)
    }

    /// Finds a live node by name, scene nodes in traversal order.
    #[must_use]
    pub fn find_node_by_name(&self, name: &str) -> Option<NodeId> {
        self.iter_dfs().find(|&id| self.nodes.get(id).is_some_and(|n| n.name == name))
    }

    /// Depth-first, pre-order traversal of every node under the roots.
    pub fn iter_dfs(&self) -> impl Iterator<Item = NodeId> + '_ {
        Descendants {
            scene: self,
            stack: self.roots.iter().rev().copied().collect(),
        }
    }

    /// Depth-first, pre-order traversal of `root` and its descendants.
    pub fn descendants(&self, root: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let stack = if self.nodes.contains(root) { vec![root] } else { Vec::new() };
        Descendants { scene: self, stack }
    }

    /// Returns true if `ancestor` is `node` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id).and_then(|n| n.parent);
        }
        false
    }

    // =========================================================================
    // Structure (no lifecycle hooks; the context reconciles afterwards)
    // =========================================================================

    /// Creates a detached node.
    pub(crate) fn spawn_node(&mut self, name: String, guid: Guid) -> NodeId {
        self.nodes.insert(Node::new(name, guid))
    }

    /// Moves `node` under `parent`, appending it to the end of the child list.
    ///
    /// Returns the components of the moved subtree in traversal order.
    pub(crate) fn link(&mut self, node: NodeId, parent: Parent) -> SceneResult<Vec<ComponentId>> {
        if !self.nodes.contains(node) {
            return Err(SceneError::UnknownNode(node));
        }
        if let Parent::Node(parent_id) = parent {
            if !self.nodes.contains(parent_id) {
                return Err(SceneError::UnknownNode(parent_id));
            }
            if self.is_ancestor_of(node, parent_id) {
                return Err(SceneError::CyclicParent { node, parent: parent_id });
            }
        }

        self.unlink(node);
        match parent {
            Parent::Root => self.roots.push(node),
            Parent::Node(parent_id) => {
                if let Some(p) = self.nodes.get_mut(parent_id) {
                    p.children.push(node);
                }
                if let Some(n) = self.nodes.get_mut(node) {
                    n.parent = Some(parent_id);
                }
            }
            Parent::Detached => {}
        }
        Ok(self.refresh_subtree(node))
    }

    /// Removes `node` from its parent's child list or from the roots.
    fn unlink(&mut self, node: NodeId) {
        let Some(old_parent) = self.nodes.get_mut(node).map(|n| n.parent.take()) else {
            return;
        };
        match old_parent {
            Some(parent_id) => {
                if let Some(p) = self.nodes.get_mut(parent_id) {
                    p.children.retain(|&c| c != node);
                }
            }
            None => self.roots.retain(|&r| r != node),
        }
    }

    /// Sets `active_self`, returning the components whose hierarchy state may
    /// have changed.
    pub(crate) fn set_active_self(&mut self, node: NodeId, active: bool) -> Option<Vec<ComponentId>> {
        let n = self.nodes.get_mut(node)?;
        if n.active_self == active {
            return Some(Vec::new());
        }
        n.active_self = active;
        Some(self.refresh_subtree(node))
    }

    /// Recomputes the cached `active_in_hierarchy` and `in_scene` flags of
    /// `root` and all its descendants in one pass.
    fn refresh_subtree(&mut self, root: NodeId) -> Vec<ComponentId> {
        let (parent_active, parent_in_scene) = match self.nodes.get(root).and_then(|n| n.parent) {
            Some(parent) => self
                .nodes
                .get(parent)
                .map_or((true, false), |p| (p.active_in_hierarchy, p.in_scene)),
            None => (true, self.roots.contains(&root)),
        };

        let mut affected = Vec::new();
        let mut stack = vec![(root, parent_active, parent_in_scene)];
        while let Some((id, parent_active, in_scene)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            node.active_in_hierarchy = parent_active && node.active_self;
            node.in_scene = in_scene;
            affected.extend_from_slice(&node.components);
            let active = node.active_in_hierarchy;
            for &child in node.children.iter().rev() {
                stack.push((child, active, in_scene));
            }
        }
        affected
    }

    /// Unlinks and frees a node record. Children must already be gone.
    pub(crate) fn remove_node(&mut self, node: NodeId) -> Option<Node> {
        self.unlink(node);
        self.nodes.remove(node)
    }

    pub(crate) fn insert_component(&mut self, entry: ComponentEntry) -> ComponentId {
        self.components.insert(entry)
    }

    pub(crate) fn entry(&self, id: ComponentId) -> Option<&ComponentEntry> {
        self.components.get(id)
    }

    pub(crate) fn entry_mut(&mut self, id: ComponentId) -> Option<&mut ComponentEntry> {
        self.components.get_mut(id)
    }

    /// Appends `component` to `node`'s list.
    pub(crate) fn push_component(&mut self, node: NodeId, component: ComponentId) -> bool {
        let Some(n) = self.nodes.get_mut(node) else {
            return false;
        };
        n.components.push(component);
        true
    }

    /// Removes exactly one occurrence of `component` from `node`'s list.
    pub(crate) fn remove_from_node(&mut self, node: NodeId, component: ComponentId) -> bool {
        let Some(n) = self.nodes.get_mut(node) else {
            return false;
        };
        match n.components.iter().position(|&c| c == component) {
            Some(index) => {
                n.components.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether a component should currently be enabled.
    pub(crate) fn should_be_enabled(&self, id: ComponentId) -> bool {
        let Some(entry) = self.components.get(id) else {
            return false;
        };
        if !entry.enabled || entry.pending_destroy || entry.state == LifecycleState::Destroyed {
            return false;
        }
        entry
            .node
            .and_then(|n| self.nodes.get(n))
            .is_some_and(|n| n.in_scene && n.active_in_hierarchy)
    }

    /// Whether a component belongs to an initialized tree.
    pub(crate) fn is_in_scene(&self, id: ComponentId) -> bool {
        self.components
            .get(id)
            .and_then(|e| e.node)
            .and_then(|n| self.nodes.get(n))
            .is_some_and(|n| n.in_scene)
    }
}

/// Depth-first iterator over a subtree.
struct Descendants<'a> {
    scene: &'a Scene,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        // Push children in reverse order so they're visited left-to-right
        if let Some(node) = self.scene.nodes.get(id) {
            self.stack.extend(node.children.iter().rev().copied());
        }
        Some(id)
    }
}
