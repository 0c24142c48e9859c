//! # Components
//!
//! A component is a boxed [`Behaviour`] attached to a scene node. The
//! lifecycle manager drives its hooks; the frame scheduler drives its
//! per-frame methods.
//!
//! ## Type Queries
//!
//! Every behaviour exposes a static [`ComponentType`] descriptor. A
//! descriptor may name a base descriptor, forming an inheritance chain.
//! Registry queries match a component whose chain contains the requested
//! type, so asking for an abstract base finds every concrete subtype.
//!
//! ```rust,ignore
//! pub enum Renderer {}
//! impl ComponentKind for Renderer {
//!     const TYPE: &'static ComponentType = &ComponentType::new("Renderer");
//! }
//!
//! impl ComponentKind for MeshRenderer {
//!     const TYPE: &'static ComponentType =
//!         &ComponentType::with_base("MeshRenderer", Renderer::TYPE);
//! }
//! ```

use crate::context::HookContext;
use crate::error::HookResult;
use crate::persistence::Persistent;
use std::any::Any;
use std::fmt;

/// Static type descriptor of a component.
pub struct ComponentType {
    name: &'static str,
    base: Option<&'static ComponentType>,
}

impl ComponentType {
    /// Root descriptor with no base type.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name, base: None }
    }

    /// Descriptor deriving from `base`.
    #[must_use]
    pub const fn with_base(name: &'static str, base: &'static ComponentType) -> Self {
        Self { name, base: Some(base) }
    }

    /// Type name, also used as the persistence discriminator.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Direct base type
    #[inline]
    #[must_use]
    pub const fn base(&self) -> Option<&'static ComponentType> {
        self.base
    }

    /// Returns true if this is exactly `other`.
    #[inline]
    #[must_use]
    pub fn is(&self, other: &ComponentType) -> bool {
        self.name == other.name
    }

    /// Returns true if `other` is this type or any of its bases.
    #[must_use]
    pub fn is_a(&self, other: &ComponentType) -> bool {
        if self.is(other) {
            return true;
        }
        let mut current = self.base;
        while let Some(ty) = current {
            if ty.is(other) {
                return true;
            }
            current = ty.base;
        }
        false
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        let mut current = self.base;
        while let Some(ty) = current {
            write!(f, " : {}", ty.name)?;
            current = ty.base;
        }
        Ok(())
    }
}

/// Compile-time link from a Rust type to its descriptor.
///
/// Implemented by concrete behaviours and by uninhabited marker types that
/// stand for abstract bases.
pub trait ComponentKind: 'static {
    /// Descriptor of this type
    const TYPE: &'static ComponentType;
}

/// Where a component is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Created but never attached to a node in the scene.
    Unattached,
    /// Awake has fired; the component has not been enabled yet.
    Awake,
    /// Enable fired last. Receives per-frame hooks.
    Enabled,
    /// Disable fired last.
    Disabled,
    /// Terminal.
    Destroyed,
}

impl LifecycleState {
    /// Returns true once Awake has fired.
    #[inline]
    #[must_use]
    pub const fn is_awake(self) -> bool {
        matches!(self, Self::Awake | Self::Enabled | Self::Disabled)
    }
}

/// Upcast helper so `dyn Behaviour` can be downcast to its concrete type.
pub trait AsAny: Any {
    /// Borrows as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Borrows as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Behaviour attached to a node.
///
/// All hooks default to no-ops. Errors returned from a hook are caught and
/// logged by the lifecycle manager; they never stop other components.
#[allow(unused_variables)]
pub trait Behaviour: AsAny {
    /// Descriptor used for type queries and persistence.
    fn component_type(&self) -> &'static ComponentType;

    /// Fires once, on first attach to a node in the scene, before any enable.
    fn awake(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        Ok(())
    }

    /// Fires when `enabled && active_in_hierarchy` becomes true.
    fn on_enable(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        Ok(())
    }

    /// Fires when `enabled && active_in_hierarchy` becomes false.
    fn on_disable(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        Ok(())
    }

    /// Fires once, before the first update after the component is enabled.
    fn start(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        Ok(())
    }

    /// Fires once, after the final disable.
    fn on_destroy(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        Ok(())
    }

    /// `PreUpdate` frame event.
    fn early_update(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        Ok(())
    }

    /// `Update` frame event.
    fn update(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        Ok(())
    }

    /// `LateUpdate` frame event.
    fn late_update(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        Ok(())
    }

    /// `PreRender` frame event.
    fn on_before_render(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        Ok(())
    }

    /// `PostRender` frame event.
    fn on_after_render(&mut self, cx: &mut HookContext<'_>) -> HookResult {
        Ok(())
    }

    /// Persistent field access, for components with a schema.
    fn persistent(&self) -> Option<&dyn Persistent> {
        None
    }

    /// Mutable persistent field access, for components with a schema.
    fn persistent_mut(&mut self) -> Option<&mut dyn Persistent> {
        None
    }
}

impl dyn Behaviour {
    /// Downcasts to a concrete behaviour.
    #[must_use]
    pub fn downcast_ref<T: Behaviour>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Downcasts mutably to a concrete behaviour.
    pub fn downcast_mut<T: Behaviour>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}
