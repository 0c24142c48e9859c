//! # Generational Arena
//!
//! Slot storage for nodes and components. Freed slots are recycled through a
//! free list; each reuse bumps the slot generation so stale handles are
//! detected instead of aliasing a new value.

use crate::scene::ArenaId;
use std::marker::PhantomData;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Growable generational arena keyed by handle type `I`.
pub struct Arena<I, T> {
    slots: Vec<Slot<T>>,
    /// Free list of slot indices for reuse.
    free_indices: Vec<u32>,
    len: usize,
    _marker: PhantomData<I>,
}

impl<I: ArenaId, T> Arena<I, T> {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_indices: Vec::new(),
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Number of live values
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no value is stored.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores a value, returning its handle.
    pub fn insert(&mut self, value: T) -> I {
        self.len += 1;
        if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            // Increment generation to invalidate old references
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            return I::from_parts(index, slot.generation);
        }

        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot { generation: 0, value: Some(value) });
        I::from_parts(index, 0)
    }

    /// Removes a value. Returns `None` for stale or unknown handles.
    pub fn remove(&mut self, id: I) -> Option<T> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let value = slot.value.take()?;
        self.len -= 1;
        self.free_indices.push(id.index());
        Some(value)
    }

    /// Returns true if the handle refers to a live value.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Gets a value by handle.
    #[inline]
    #[must_use]
    pub fn get(&self, id: I) -> Option<&T> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    /// Gets a value mutably by handle.
    #[inline]
    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    /// Iterates live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let value = slot.value.as_ref()?;
            let index = u32::try_from(index).ok()?;
            Some((I::from_parts(index, slot.generation), value))
        })
    }
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}
