//! # Identity
//!
//! Runtime handles are generational indices into the scene arenas:
//! - Lower 32 bits: slot index
//! - Upper 32 bits: generation counter for detecting stale references
//!
//! [`Guid`] is the persistent identity that survives save/load and is shared
//! between network peers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Handle types stored in an [`Arena`](crate::arena::Arena).
pub trait ArenaId: Copy + Eq {
    /// Builds a handle from its parts.
    fn from_parts(index: u32, generation: u32) -> Self;
    /// Slot index
    fn index(self) -> u32;
    /// Generation of the slot when the handle was issued
    fn generation(self) -> u32;
}

macro_rules! generational_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Null/invalid handle.
            pub const NULL: Self = Self(u64::MAX);

            /// Creates a handle from index and generation.
            #[inline]
            #[must_use]
            pub const fn new(index: u32, generation: u32) -> Self {
                Self(((generation as u64) << 32) | (index as u64))
            }

            /// Returns the index portion of the handle.
            #[inline]
            #[must_use]
            pub const fn index(self) -> u32 {
                self.0 as u32
            }

            /// Returns the generation portion of the handle.
            #[inline]
            #[must_use]
            pub const fn generation(self) -> u32 {
                (self.0 >> 32) as u32
            }

            /// Checks if this handle is null/invalid.
            #[inline]
            #[must_use]
            pub const fn is_null(self) -> bool {
                self.0 == u64::MAX
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NULL
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_null() {
                    write!(f, "{}(null)", stringify!($name))
                } else {
                    write!(f, "{}({}v{})", stringify!($name), self.index(), self.generation())
                }
            }
        }

        impl ArenaId for $name {
            fn from_parts(index: u32, generation: u32) -> Self {
                Self::new(index, generation)
            }

            fn index(self) -> u32 {
                $name::index(self)
            }

            fn generation(self) -> u32 {
                $name::generation(self)
            }
        }
    };
}

generational_id!(
    /// Handle to a scene node.
    NodeId
);

generational_id!(
    /// Handle to an attached or detached component.
    ComponentId
);

/// Persistent identity of a node or component.
///
/// Stable across save/load and identical on every peer that loaded the same
/// document, which is what makes it usable as a network target.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    /// Generates a random guid.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Derives a deterministic guid from this one and a seed.
    ///
    /// Peers deriving with the same seed get the same result, so instantiating
    /// a prefab with a shared seed yields matching network identities.
    #[must_use]
    pub fn derive(&self, seed: u64) -> Self {
        let name = format!("{}:{seed}", self.0);
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string())
    }

    /// Guid text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.0)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Guid {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Guid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl PartialEq<str> for Guid {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Guid {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        let id = NodeId::new(12345, 67890);
        assert_eq!(id.index(), 12345);
        assert_eq!(id.generation(), 67890);
        assert!(!id.is_null());
        assert!(ComponentId::NULL.is_null());
        assert_eq!(ComponentId::default(), ComponentId::NULL);
    }

    #[test]
    fn test_guid_derive_is_deterministic() {
        let base = Guid::from("prefab-root");
        assert_eq!(base.derive(7), base.derive(7));
        assert_ne!(base.derive(7), base.derive(8));
        assert_ne!(Guid::new_v4(), Guid::new_v4());
    }
}
