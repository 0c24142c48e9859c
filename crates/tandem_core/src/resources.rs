//! # Context Resources
//!
//! Type-keyed services stored on a [`Context`](crate::Context), such as the
//! network connection. Components look services up through the context they
//! are handed instead of through process-wide globals.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Type-keyed resource map. One value per type.
#[derive(Default)]
pub struct Resources {
    values: HashMap<TypeId, Box<dyn Any>>,
}

impl Resources {
    /// Stores a resource, returning the previous value of the same type.
    pub fn insert<T: 'static>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Borrows a resource.
    #[must_use]
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values.get(&TypeId::of::<T>())?.downcast_ref::<T>()
    }

    /// Mutably borrows a resource.
    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.values.get_mut(&TypeId::of::<T>())?.downcast_mut::<T>()
    }

    /// Removes a resource.
    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Returns true if a resource of type `T` is stored.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut resources = Resources::default();
        assert_eq!(resources.insert(5u32), None);
        assert_eq!(resources.insert(7u32), Some(5));
        resources.insert(String::from("room"));

        assert_eq!(resources.get::<u32>(), Some(&7));
        *resources.get_mut::<String>().unwrap() += "-x";
        assert_eq!(resources.get::<String>().map(String::as_str), Some("room-x"));

        assert_eq!(resources.remove::<u32>(), Some(7));
        assert!(!resources.contains::<u32>());
    }
}
