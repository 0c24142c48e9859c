//! Type name to factory lookup used when loading component records.

use super::schema::ComponentSchema;
use crate::component::{Behaviour, ComponentKind};
use crate::error::{PersistenceError, PersistenceResult};
use std::collections::HashMap;
use tracing::debug;

/// Creates a behaviour in its default state.
pub type ComponentFactory = fn() -> Box<dyn Behaviour>;

#[derive(Clone, Copy)]
struct TypeEntry {
    factory: ComponentFactory,
    schema: Option<&'static ComponentSchema>,
}

/// Registry of component types that can be created from a document.
#[derive(Default, Clone)]
pub struct TypeStore {
    types: HashMap<&'static str, TypeEntry>,
}

impl TypeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under its descriptor name.
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: Behaviour + ComponentKind + Default,
    {
        fn create<T: Behaviour + Default>() -> Box<dyn Behaviour> {
            Box::new(T::default())
        }
        let schema = T::default().persistent().map(|p| p.schema());
        self.insert(T::TYPE.name(), create::<T>, schema)
    }

    /// Registers a factory under an explicit name.
    pub fn register_factory(&mut self, name: &'static str, factory: ComponentFactory) -> &mut Self {
        let schema = factory().persistent().map(|p| p.schema());
        self.insert(name, factory, schema)
    }

    fn insert(
        &mut self,
        name: &'static str,
        factory: ComponentFactory,
        schema: Option<&'static ComponentSchema>,
    ) -> &mut Self {
        if self.types.insert(name, TypeEntry { factory, schema }).is_some() {
            debug!(name, "component type registered twice, last registration wins");
        }
        self
    }

    /// Returns true if a factory exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Number of registered types
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Field schema of a registered type, if it has persistent fields.
    #[must_use]
    pub fn schema(&self, name: &str) -> Option<&'static ComponentSchema> {
        self.types.get(name).and_then(|t| t.schema)
    }

    /// Creates a default instance of `name`.
    pub fn create(&self, name: &str) -> PersistenceResult<Box<dyn Behaviour>> {
        self.types
            .get(name)
            .map(|t| (t.factory)())
            .ok_or_else(|| PersistenceError::UnknownType(name.to_owned()))
    }
}

impl std::fmt::Debug for TypeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.types.keys().collect();
        names.sort_unstable();
        f.debug_struct("TypeStore").field("types", &names).finish()
    }
}
