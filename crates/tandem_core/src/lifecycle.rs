//! # Lifecycle Manager
//!
//! Drives the per-component state machine:
//!
//! ```text
//! Unattached -> Awake (once) -> Enabled <-> Disabled -> Destroyed
//! ```
//!
//! - Awake fires once, the first time the component sits on a node that is
//!   part of the scene, regardless of its `enabled` flag.
//! - Enable/Disable fire when `enabled && active_in_hierarchy` changes.
//!   Disable only ever follows an Enable.
//! - Destroy fires Disable (if enabled), then `on_destroy` (if awake), then
//!   releases the behaviour. It is idempotent.
//!
//! While a hook runs, the behaviour box is taken out of the arena. Lifecycle
//! transitions requested for that component in the meantime are deferred
//! until the hook returns, so no hook ever re-enters its own component.

use crate::component::{Behaviour, ComponentKind, LifecycleState};
use crate::context::{Context, HookContext};
use crate::scene::{ComponentEntry, ComponentId, Guid, NodeId};
use crate::scheduler::FrameEvent;
use tracing::{debug, trace, warn};

/// A hook the lifecycle manager or scheduler can invoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Hook {
    Awake,
    OnEnable,
    OnDisable,
    Start,
    OnDestroy,
    Frame(FrameEvent),
}

impl Hook {
    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Awake => "awake",
            Self::OnEnable => "on_enable",
            Self::OnDisable => "on_disable",
            Self::Start => "start",
            Self::OnDestroy => "on_destroy",
            Self::Frame(FrameEvent::PreUpdate) => "early_update",
            Self::Frame(FrameEvent::Update) => "update",
            Self::Frame(FrameEvent::LateUpdate) => "late_update",
            Self::Frame(FrameEvent::PreRender) => "on_before_render",
            Self::Frame(FrameEvent::PostRender) => "on_after_render",
        }
    }

    /// Transition hooks are queued when the component is busy. Frame hooks
    /// are simply skipped.
    const fn is_transition(self) -> bool {
        matches!(self, Self::Awake | Self::OnEnable | Self::OnDisable | Self::OnDestroy)
    }

    fn call(self, behaviour: &mut dyn Behaviour, cx: &mut HookContext<'_>) -> crate::error::HookResult {
        match self {
            Self::Awake => behaviour.awake(cx),
            Self::OnEnable => behaviour.on_enable(cx),
            Self::OnDisable => behaviour.on_disable(cx),
            Self::Start => behaviour.start(cx),
            Self::OnDestroy => behaviour.on_destroy(cx),
            Self::Frame(FrameEvent::PreUpdate) => behaviour.early_update(cx),
            Self::Frame(FrameEvent::Update) => behaviour.update(cx),
            Self::Frame(FrameEvent::LateUpdate) => behaviour.late_update(cx),
            Self::Frame(FrameEvent::PreRender) => behaviour.on_before_render(cx),
            Self::Frame(FrameEvent::PostRender) => behaviour.on_after_render(cx),
        }
    }
}

/// Options for [`Context::attach_with`].
#[derive(Clone, Debug)]
pub struct AttachOptions {
    guid: Option<Guid>,
    enabled: bool,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self { guid: None, enabled: true }
    }
}

impl AttachOptions {
    /// Enabled component with a fresh guid.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a known persistent identity instead of a fresh one.
    #[must_use]
    pub fn guid(mut self, guid: impl Into<Guid>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    /// Initial value of the component's `enabled` flag.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Context {
    // =========================================================================
    // Registry mutations
    // =========================================================================

    /// Attaches a behaviour to `node`.
    ///
    /// Returns `None` (with a warning) if the node is unknown or destroyed.
    /// If the node is in the scene, Awake fires right away, followed by
    /// Enable when the node is active.
    pub fn attach<B: Behaviour>(&mut self, node: NodeId, behaviour: B) -> Option<ComponentId> {
        self.attach_boxed(node, Box::new(behaviour), AttachOptions::default())
    }

    /// Attaches a behaviour with explicit options.
    pub fn attach_with<B: Behaviour>(
        &mut self,
        node: NodeId,
        behaviour: B,
        options: AttachOptions,
    ) -> Option<ComponentId> {
        self.attach_boxed(node, Box::new(behaviour), options)
    }

    /// Attaches an already boxed behaviour.
    pub fn attach_boxed(
        &mut self,
        node: NodeId,
        behaviour: Box<dyn Behaviour>,
        options: AttachOptions,
    ) -> Option<ComponentId> {
        if !self.scene.contains_node(node) {
            warn!(
                ?node,
                component = behaviour.component_type().name(),
                "attach to unknown or destroyed node"
            );
            return None;
        }
        let guid = options.guid.unwrap_or_else(Guid::new_v4);
        let entry = ComponentEntry::new(guid, behaviour, Some(node), options.enabled);
        let id = self.scene.insert_component(entry);
        self.scene.push_component(node, id);
        trace!(?id, ?node, "component attached");
        self.reconcile_all(&[id]);
        Some(id)
    }

    /// Returns the first component of type `B` on `node`, attaching a
    /// default one if there is none.
    pub fn get_or_attach<B>(&mut self, node: NodeId) -> Option<ComponentId>
    where
        B: Behaviour + ComponentKind + Default,
    {
        match self.scene.get::<B>(node) {
            Some(id) => Some(id),
            None => self.attach(node, B::default()),
        }
    }

    /// Removes `component` from `node`, clearing its back-reference.
    ///
    /// Fires Disable if the component was enabled. The component stays alive
    /// and can be re-attached with [`Context::move_component`]. Detaching a
    /// component that is not on `node` is a no-op.
    pub fn detach(&mut self, node: NodeId, component: ComponentId) -> bool {
        let Some(entry) = self.scene.entry_mut(component) else {
            warn!(?component, "detach of unknown or destroyed component");
            return false;
        };
        if entry.state == LifecycleState::Destroyed {
            warn!(?component, "detach of destroyed component");
            return false;
        }
        if entry.node != Some(node) {
            debug!(?component, ?node, "detach: component is not on this node");
            return false;
        }
        entry.node = None;
        self.scene.remove_from_node(node, component);
        self.update_enabled_state(component);
        true
    }

    /// Moves a component to another node without re-firing Awake.
    ///
    /// Works for attached and detached components alike. Enable/Disable
    /// fire if the effective state differs between the two nodes.
    pub fn move_component(&mut self, component: ComponentId, target: NodeId) -> bool {
        if !self.scene.contains_node(target) {
            warn!(?component, ?target, "move_component to unknown or destroyed node");
            return false;
        }
        let Some(entry) = self.scene.entry_mut(component) else {
            warn!(?component, "move_component of unknown or destroyed component");
            return false;
        };
        if entry.state == LifecycleState::Destroyed {
            return false;
        }
        if entry.node == Some(target) {
            return true;
        }
        let previous = entry.node.replace(target);
        if let Some(previous) = previous {
            self.scene.remove_from_node(previous, component);
        }
        self.scene.push_component(target, component);
        self.reconcile_all(&[component]);
        true
    }

    /// Sets a component's own `enabled` flag.
    pub fn set_enabled(&mut self, component: ComponentId, enabled: bool) -> bool {
        let Some(entry) = self.scene.entry_mut(component) else {
            warn!(?component, enabled, "set_enabled on unknown or destroyed component");
            return false;
        };
        if entry.state == LifecycleState::Destroyed {
            warn!(?component, enabled, "set_enabled on destroyed component");
            return false;
        }
        entry.enabled = enabled;
        self.update_enabled_state(component);
        true
    }

    /// Destroys a component.
    ///
    /// Returns false (with a warning) for components that are already gone.
    /// When called from one of the component's own hooks, the destroy
    /// completes right after that hook returns.
    pub fn destroy_component(&mut self, component: ComponentId) -> bool {
        let Some(entry) = self.scene.entry_mut(component) else {
            warn!(?component, "destroy of unknown or destroyed component");
            return false;
        };
        if entry.state == LifecycleState::Destroyed || entry.pending_destroy {
            return false;
        }
        if entry.behaviour.is_none() {
            entry.pending_destroy = true;
            return true;
        }
        self.finalize_destroy(component);
        true
    }

    /// Destroys a node, its descendants and every component on them.
    pub fn destroy_node(&mut self, node: NodeId) -> bool {
        if !self.scene.contains_node(node) {
            warn!(?node, "destroy of unknown or destroyed node");
            return false;
        }
        let subtree: Vec<NodeId> = self.scene.descendants(node).collect();
        for &id in &subtree {
            let components = self.scene.node(id).map(|n| n.components().to_vec()).unwrap_or_default();
            for component in components {
                self.destroy_component(component);
            }
        }
        // Children first. Anything a destroy hook added meanwhile goes too.
        for &id in subtree.iter().rev() {
            let Some(n) = self.scene.node(id) else {
                continue;
            };
            let (children, components) = (n.children().to_vec(), n.components().to_vec());
            for child in children {
                self.destroy_node(child);
            }
            for component in components {
                self.destroy_component(component);
            }
            self.scene.remove_node(id);
        }
        debug!(?node, nodes = subtree.len(), "node destroyed");
        true
    }

    // =========================================================================
    // State machine
    // =========================================================================

    /// Awakes every in-scene component that has not been awoken yet, then
    /// brings all of them to their effective enabled state.
    pub(crate) fn reconcile_all(&mut self, affected: &[ComponentId]) {
        for &id in affected {
            let Some(entry) = self.scene.entry_mut(id) else {
                continue;
            };
            if entry.state != LifecycleState::Unattached || entry.pending_destroy {
                continue;
            }
            if !self.scene.is_in_scene(id) {
                continue;
            }
            if let Some(entry) = self.scene.entry_mut(id) {
                entry.state = LifecycleState::Awake;
            }
            self.invoke(id, Hook::Awake);
        }
        self.reconcile_enabled(affected);
    }

    /// Fires Enable/Disable for components whose effective state changed.
    pub(crate) fn reconcile_enabled(&mut self, affected: &[ComponentId]) {
        for &id in affected {
            self.update_enabled_state(id);
        }
    }

    fn update_enabled_state(&mut self, id: ComponentId) {
        let Some(entry) = self.scene.entry(id) else {
            return;
        };
        // Never-awoken and destroyed components have nothing to toggle
        if !entry.state.is_awake() {
            return;
        }
        let is_enabled = entry.state == LifecycleState::Enabled;
        let should_enable = self.scene.should_be_enabled(id);
        if should_enable == is_enabled {
            return;
        }
        if let Some(entry) = self.scene.entry_mut(id) {
            entry.state = if should_enable { LifecycleState::Enabled } else { LifecycleState::Disabled };
        }
        if should_enable {
            self.scheduler.enable(id);
            self.invoke(id, Hook::OnEnable);
        } else {
            self.scheduler.disable(id);
            self.invoke(id, Hook::OnDisable);
        }
    }

    fn finalize_destroy(&mut self, id: ComponentId) {
        let Some(entry) = self.scene.entry_mut(id) else {
            return;
        };
        let previous = entry.state;
        entry.state = LifecycleState::Destroyed;
        entry.pending_destroy = false;
        let node = entry.node;

        if let Some(node) = node {
            self.scene.remove_from_node(node, id);
        }
        self.scheduler.disable(id);
        if previous == LifecycleState::Enabled {
            self.invoke(id, Hook::OnDisable);
        }
        if previous.is_awake() {
            self.invoke(id, Hook::OnDestroy);
        }
        self.cancel_coroutines_of(id);
        self.scene.components.remove(id);
        trace!(?id, "component destroyed");
    }

    /// Runs one hook with the behaviour taken out of the arena.
    pub(crate) fn invoke(&mut self, id: ComponentId, hook: Hook) {
        let Some(entry) = self.scene.entry_mut(id) else {
            return;
        };
        let Some(mut behaviour) = entry.behaviour.take() else {
            if hook.is_transition() {
                entry.deferred.push(hook);
            }
            return;
        };
        let node = entry.node.unwrap_or(NodeId::NULL);
        let type_name = entry.type_info.name();

        let result = {
            let mut cx = HookContext::new(self, id, node);
            hook.call(behaviour.as_mut(), &mut cx)
        };
        if let Err(error) = result {
            let guid = self.scene.component_guid(id).map_or("", |g| g.as_str());
            self.report_error(hook.name(), &format!("{type_name} {guid}"), &error);
        }

        let Some(entry) = self.scene.entry_mut(id) else {
            return;
        };
        entry.behaviour = Some(behaviour);
        while let Some(next) = self.next_deferred(id) {
            self.invoke(id, next);
        }
        let destroy_now = self
            .scene
            .entry(id)
            .is_some_and(|e| e.pending_destroy && e.state != LifecycleState::Destroyed);
        if destroy_now {
            self.finalize_destroy(id);
        }
    }

    fn next_deferred(&mut self, id: ComponentId) -> Option<Hook> {
        let entry = self.scene.entry_mut(id)?;
        if entry.deferred.is_empty() {
            None
        } else {
            Some(entry.deferred.remove(0))
        }
    }
}
