//! # Component Registry Queries
//!
//! Type lookups over node component lists. A query for type `K` matches
//! components whose descriptor is `K` or derives from `K`. Within a single
//! node, exact matches are preferred over derived ones.
//!
//! Attach, detach and destroy live on [`Context`](crate::Context) because
//! they fire lifecycle hooks.

use super::{ComponentId, Guid, NodeId, Scene};
use crate::component::{Behaviour, ComponentKind, ComponentType, LifecycleState};
use tracing::warn;

impl Scene {
    // =========================================================================
    // Per-component accessors
    // =========================================================================

    /// Returns true if the handle refers to a live component.
    #[must_use]
    pub fn contains_component(&self, id: ComponentId) -> bool {
        self.components.contains(id)
    }

    /// Node the component is attached to.
    #[must_use]
    pub fn component_node(&self, id: ComponentId) -> Option<NodeId> {
        self.components.get(id).and_then(|e| e.node)
    }

    /// Persistent identity of a component.
    #[must_use]
    pub fn component_guid(&self, id: ComponentId) -> Option<&Guid> {
        self.components.get(id).map(|e| &e.guid)
    }

    /// Type descriptor of a component.
    #[must_use]
    pub fn component_type(&self, id: ComponentId) -> Option<&'static ComponentType> {
        self.components.get(id).map(|e| e.type_info)
    }

    /// Lifecycle state of a component. Destroyed components report `None`.
    #[must_use]
    pub fn lifecycle_state(&self, id: ComponentId) -> Option<LifecycleState> {
        self.components.get(id).map(|e| e.state)
    }

    /// The component's own `enabled` flag.
    #[must_use]
    pub fn is_enabled(&self, id: ComponentId) -> bool {
        self.components.get(id).is_some_and(|e| e.enabled)
    }

    /// True while the component receives per-frame hooks.
    #[must_use]
    pub fn is_active_and_enabled(&self, id: ComponentId) -> bool {
        self.components.get(id).is_some_and(|e| e.state == LifecycleState::Enabled)
    }

    /// Finds a live component by persistent guid.
    #[must_use]
    pub fn find_component_by_guid(&self, guid: &str) -> Option<ComponentId> {
        self.components
            .iter()
            .find(|(_, entry)| entry.guid == *guid)
            .map(|(id, _)| id)
    }

    /// Borrows a behaviour.
    ///
    /// Returns `None` for destroyed components and while one of the
    /// component's own hooks is executing.
    #[must_use]
    pub fn behaviour(&self, id: ComponentId) -> Option<&dyn Behaviour> {
        self.components.get(id)?.behaviour.as_deref()
    }

    /// Mutably borrows a behaviour. See [`Scene::behaviour`].
    pub fn behaviour_mut(&mut self, id: ComponentId) -> Option<&mut (dyn Behaviour + 'static)> {
        self.components.get_mut(id)?.behaviour.as_deref_mut()
    }

    /// Borrows a behaviour as its concrete type.
    #[must_use]
    pub fn component<T: Behaviour>(&self, id: ComponentId) -> Option<&T> {
        self.behaviour(id)?.downcast_ref::<T>()
    }

    /// Mutably borrows a behaviour as its concrete type.
    pub fn component_mut<T: Behaviour>(&mut self, id: ComponentId) -> Option<&mut T> {
        self.behaviour_mut(id)?.downcast_mut::<T>()
    }

    // =========================================================================
    // Registry queries
    // =========================================================================

    /// First component on `node` matching `K`.
    #[must_use]
    pub fn get<K: ComponentKind>(&self, node: NodeId) -> Option<ComponentId> {
        self.get_by_type(node, K::TYPE)
    }

    /// First component on `node` matching `ty`: exact type first, then
    /// derived types.
    #[must_use]
    pub fn get_by_type(&self, node: NodeId, ty: &ComponentType) -> Option<ComponentId> {
        let n = self.live_node(node, "get")?;
        self.first_match(&n.components, ty, true)
    }

    /// All components on `node` matching `K`, in attach order.
    #[must_use]
    pub fn get_all<K: ComponentKind>(&self, node: NodeId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        if let Some(n) = self.live_node(node, "get_all") {
            self.collect_matches(&n.components, K::TYPE, true, &mut out);
        }
        out
    }

    /// Nearest component matching `K` on `node` or its descendants.
    ///
    /// `node` itself is searched first, then children depth-first. Unless
    /// `include_inactive` is set, disabled components and inactive nodes
    /// are skipped.
    #[must_use]
    pub fn get_in_children<K: ComponentKind>(
        &self,
        node: NodeId,
        include_inactive: bool,
    ) -> Option<ComponentId> {
        self.live_node(node, "get_in_children")?;
        self.search_descendants(node, include_inactive)
            .find_map(|n| self.first_match(&self.nodes.get(n)?.components, K::TYPE, include_inactive))
    }

    /// Every component matching `K` on `node` and its descendants, in
    /// traversal order.
    #[must_use]
    pub fn get_all_in_children<K: ComponentKind>(
        &self,
        node: NodeId,
        include_inactive: bool,
    ) -> Vec<ComponentId> {
        let mut out = Vec::new();
        if self.live_node(node, "get_all_in_children").is_none() {
            return out;
        }
        for n in self.search_descendants(node, include_inactive) {
            if let Some(n) = self.nodes.get(n) {
                self.collect_matches(&n.components, K::TYPE, include_inactive, &mut out);
            }
        }
        out
    }

    /// Nearest component matching `K` on `node` or its ancestors.
    ///
    /// `node` itself always takes precedence, then the parent chain upward.
    #[must_use]
    pub fn get_in_parent<K: ComponentKind>(&self, node: NodeId) -> Option<ComponentId> {
        self.live_node(node, "get_in_parent")?;
        self.ancestors(node)
            .find_map(|n| self.first_match(&self.nodes.get(n)?.components, K::TYPE, true))
    }

    /// Every component matching `K` on `node` and its ancestors, nearest first.
    #[must_use]
    pub fn get_all_in_parent<K: ComponentKind>(&self, node: NodeId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        if self.live_node(node, "get_all_in_parent").is_none() {
            return out;
        }
        for n in self.ancestors(node) {
            if let Some(n) = self.nodes.get(n) {
                self.collect_matches(&n.components, K::TYPE, true, &mut out);
            }
        }
        out
    }

    /// First component matching `K` anywhere in the scene, in traversal order.
    #[must_use]
    pub fn find_object_of_type<K: ComponentKind>(&self, include_inactive: bool) -> Option<ComponentId> {
        self.iter_dfs().find_map(|n| {
            let node = self.nodes.get(n)?;
            if !include_inactive && !node.active_in_hierarchy {
                return None;
            }
            self.first_match(&node.components, K::TYPE, include_inactive)
        })
    }

    /// Every component matching `K` in the scene, in traversal order.
    #[must_use]
    pub fn find_objects_of_type<K: ComponentKind>(&self, include_inactive: bool) -> Vec<ComponentId> {
        let mut out = Vec::new();
        for n in self.iter_dfs() {
            let Some(node) = self.nodes.get(n) else {
                continue;
            };
            if include_inactive || node.active_in_hierarchy {
                self.collect_matches(&node.components, K::TYPE, include_inactive, &mut out);
            }
        }
        out
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn live_node(&self, node: NodeId, op: &str) -> Option<&super::Node> {
        let found = self.nodes.get(node);
        if found.is_none() {
            warn!(?node, op, "registry query on unknown or destroyed node");
        }
        found
    }

    fn is_visible(&self, id: ComponentId, include_inactive: bool) -> bool {
        let Some(entry) = self.components.get(id) else {
            return false;
        };
        if entry.state == LifecycleState::Destroyed || entry.pending_destroy {
            return false;
        }
        include_inactive || entry.enabled
    }

    fn first_match(
        &self,
        list: &[ComponentId],
        ty: &ComponentType,
        include_inactive: bool,
    ) -> Option<ComponentId> {
        let candidates = || {
            list.iter()
                .copied()
                .filter(move |&id| self.is_visible(id, include_inactive))
                .filter_map(|id| Some((id, self.components.get(id)?.type_info)))
        };
        // Exact type pass, then supertype pass
        candidates()
            .find(|(_, t)| t.is(ty))
            .or_else(|| candidates().find(|(_, t)| t.is_a(ty)))
            .map(|(id, _)| id)
    }

    fn collect_matches(
        &self,
        list: &[ComponentId],
        ty: &ComponentType,
        include_inactive: bool,
        out: &mut Vec<ComponentId>,
    ) {
        out.extend(list.iter().copied().filter(|&id| {
            self.is_visible(id, include_inactive)
                && self.components.get(id).is_some_and(|e| e.type_info.is_a(ty))
        }));
    }

    /// Subtree traversal that prunes inactive branches unless asked not to.
    fn search_descendants<'a>(
        &'a self,
        root: NodeId,
        include_inactive: bool,
    ) -> impl Iterator<Item = NodeId> + 'a {
        let mut stack = vec![root];
        std::iter::from_fn(move || loop {
            let id = stack.pop()?;
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if !include_inactive && !node.active_in_hierarchy {
                continue;
            }
            stack.extend(node.children.iter().rev().copied());
            return Some(id);
        })
    }

    /// `node` followed by its ancestors, nearest first.
    fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), move |&id| self.nodes.get(id).and_then(|n| n.parent))
    }
}
