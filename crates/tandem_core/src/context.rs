//! # Runtime Context
//!
//! The explicit root object of one runtime session: scene, scheduler, clock
//! and resources. Every API that needs "the current scene" takes a context,
//! so several sessions can run side by side (two peers in one test, for
//! example).
//!
//! ```text
//! Context
//! ├── Scene      nodes + components
//! ├── Scheduler  frame callbacks, enabled behaviours, coroutines
//! ├── Time       frame clock
//! └── Resources  services (network connection, type store, ...)
//! ```

use crate::config::RuntimeConfig;
use crate::error::{BehaviourError, SceneError, SceneResult};
use crate::resources::Resources;
use crate::scene::{ComponentId, Guid, NodeId, Parent, Scene};
use crate::scheduler::{Coroutine, CoroutineId, FrameEvent, Scheduler};
use crate::time::{FrameStats, Time};
use std::ops::{Deref, DerefMut};
use std::time::Instant;
use tracing::{debug, error, trace};

/// One runtime session.
pub struct Context {
    pub(crate) scene: Scene,
    pub(crate) scheduler: Scheduler,
    time: Time,
    resources: Resources,
    config: RuntimeConfig,
}

impl Context {
    /// Creates a context with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Creates a context with the given configuration.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            scene: Scene::new(),
            scheduler: Scheduler::default(),
            time: Time::default(),
            resources: Resources::default(),
            config,
        }
    }

    /// The scene graph
    #[must_use]
    pub const fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Mutable scene access for transforms and behaviour state.
    ///
    /// Structural changes that fire lifecycle hooks go through the context.
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    /// Scheduling state
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The frame clock
    #[must_use]
    pub const fn time(&self) -> &Time {
        &self.time
    }

    /// Runtime configuration
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Resource map
    #[must_use]
    pub const fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Mutable resource map
    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    /// Shorthand for `resources().get::<T>()`.
    #[must_use]
    pub fn resource<T: 'static>(&self) -> Option<&T> {
        self.resources.get::<T>()
    }

    /// Shorthand for `resources_mut().insert(value)`.
    pub fn insert_resource<T: 'static>(&mut self, value: T) -> Option<T> {
        self.resources.insert(value)
    }

    // =========================================================================
    // Frame loop
    // =========================================================================

    /// Advances the clock by `delta_seconds` (clamped) and runs every frame
    /// event once, in order.
    pub fn tick(&mut self, delta_seconds: f32) -> FrameStats {
        let started = Instant::now();
        let delta = if delta_seconds.is_finite() {
            delta_seconds.clamp(0.0, self.config.max_delta_time)
        } else {
            0.0
        };
        self.time.advance(delta);

        for event in FrameEvent::ORDER {
            self.run_event(event);
        }

        let stats = FrameStats {
            frame: self.time.frame(),
            total_us: u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            behaviours: self.scheduler.behaviour_count(),
            coroutines: self.scheduler.coroutine_count(),
        };
        trace!(?stats, "frame complete");
        stats
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Creates a node under `parent`.
    pub fn create_node(&mut self, name: impl Into<String>, parent: Parent) -> SceneResult<NodeId> {
        self.create_node_with_guid(name, Guid::new_v4(), parent)
    }

    /// Creates a node with a known persistent identity.
    pub fn create_node_with_guid(
        &mut self,
        name: impl Into<String>,
        guid: Guid,
        parent: Parent,
    ) -> SceneResult<NodeId> {
        if let Parent::Node(parent_id) = parent {
            if !self.scene.contains_node(parent_id) {
                return Err(SceneError::UnknownNode(parent_id));
            }
        }
        let id = self.scene.spawn_node(name.into(), guid);
        let affected = self.scene.link(id, parent)?;
        self.reconcile_all(&affected);
        Ok(id)
    }

    /// Moves a node (and its subtree) under a new parent.
    ///
    /// Components entering the scene for the first time are awoken; every
    /// component whose effective state changes is enabled or disabled.
    pub fn set_parent(&mut self, node: NodeId, parent: Parent) -> SceneResult<()> {
        let affected = self.scene.link(node, parent)?;
        self.reconcile_all(&affected);
        Ok(())
    }

    /// Sets a node's own active flag and propagates the change to its subtree.
    pub fn set_active(&mut self, node: NodeId, active: bool) -> bool {
        match self.scene.set_active_self(node, active) {
            Some(affected) => {
                self.reconcile_enabled(&affected);
                true
            }
            None => {
                tracing::warn!(?node, active, "set_active on unknown or destroyed node");
                false
            }
        }
    }

    pub(crate) fn report_error(&self, kind: &str, subject: &str, error: &BehaviourError) {
        if self.config.log_hook_errors {
            error!(kind, subject, %error, "caught failure");
        } else {
            debug!(kind, subject, %error, "caught failure");
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// The context handed to lifecycle hooks.
///
/// Dereferences to [`Context`]; additionally knows which component is running.
pub struct HookContext<'a> {
    context: &'a mut Context,
    component: ComponentId,
    node: NodeId,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(context: &'a mut Context, component: ComponentId, node: NodeId) -> Self {
        Self { context, component, node }
    }

    /// The component whose hook is running.
    #[must_use]
    pub const fn component(&self) -> ComponentId {
        self.component
    }

    /// Node the component is attached to, [`NodeId::NULL`] if detached.
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Persistent identity of the running component.
    #[must_use]
    pub fn guid(&self) -> Option<&Guid> {
        self.context.scene.component_guid(self.component)
    }

    /// Starts a coroutine owned by the running component, resumed on Update.
    pub fn start_coroutine(&mut self, routine: impl Coroutine + 'static) -> CoroutineId {
        self.start_coroutine_on(FrameEvent::Update, routine)
    }

    /// Starts a coroutine owned by the running component, resumed on `event`.
    pub fn start_coroutine_on(&mut self, event: FrameEvent, routine: impl Coroutine + 'static) -> CoroutineId {
        let owner = Some(self.component);
        self.context.start_coroutine(owner, event, routine)
    }
}

impl Deref for HookContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.context
    }
}

impl DerefMut for HookContext<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.context
    }
}
