//! Reference table handles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of low bits holding the slot index.
pub const INDEX_BITS: u32 = 20;

/// Mask selecting the slot index.
pub const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;

/// Largest generation value before wrapping.
pub const GENERATION_MASK: u32 = (1 << (32 - INDEX_BITS)) - 1;

/// Integer handle standing in for a host value on the guest side.
///
/// Layout: `generation << 20 | index`. Index `0` is the absent handle and
/// indices `1..=4` are permanent sentinels for `undefined`, `null`, `true`
/// and `false`. A dropped slot gets a new generation before it is reused, so
/// a stale handle never resolves to someone else's value (until the 12-bit
/// generation wraps around).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u32);

impl Handle {
    /// The absent handle (the guest's `None`).
    pub const NONE: Self = Self(0);
    /// Sentinel for `undefined`.
    pub const UNDEFINED: Self = Self(1);
    /// Sentinel for `null`.
    pub const NULL: Self = Self(2);
    /// Sentinel for `true`.
    pub const TRUE: Self = Self(3);
    /// Sentinel for `false`.
    pub const FALSE: Self = Self(4);
    /// First index available for dynamic allocation.
    pub const FIRST_DYNAMIC: u32 = 5;

    /// Build a handle from a slot index and generation.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation & GENERATION_MASK) << INDEX_BITS) | (index & INDEX_MASK))
    }

    /// Reinterpret a raw ABI value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw ABI value passed to the guest.
    #[must_use]
    pub const fn as_raw(&self) -> u32 {
        self.0
    }

    /// Slot index.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// Slot generation.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.0 >> INDEX_BITS
    }

    /// Check if this is the absent handle.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Check if this is one of the permanent sentinels.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.0 >= Self::UNDEFINED.0 && self.0 <= Self::FALSE.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => write!(f, "ref(none)"),
            Self::UNDEFINED => write!(f, "ref(undefined)"),
            Self::NULL => write!(f, "ref(null)"),
            Self::TRUE => write!(f, "ref(true)"),
            Self::FALSE => write!(f, "ref(false)"),
            _ => write!(f, "ref({}@{})", self.index(), self.generation()),
        }
    }
}

impl From<u32> for Handle {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Handle> for u32 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_index_and_generation() {
        let handle = Handle::new(7, 3);
        assert_eq!(handle.index(), 7);
        assert_eq!(handle.generation(), 3);
        assert_eq!(Handle::from_raw(handle.as_raw()), handle);
    }

    #[test]
    fn generation_wraps() {
        let handle = Handle::new(9, GENERATION_MASK + 1);
        assert_eq!(handle.generation(), 0);
        assert_eq!(handle.index(), 9);
    }

    #[test]
    fn sentinels() {
        assert!(Handle::NONE.is_none());
        assert!(!Handle::NONE.is_sentinel());
        assert!(Handle::UNDEFINED.is_sentinel());
        assert!(Handle::FALSE.is_sentinel());
        assert!(!Handle::new(Handle::FIRST_DYNAMIC, 0).is_sentinel());
        assert_eq!(Handle::TRUE.to_string(), "ref(true)");
        assert_eq!(Handle::new(12, 2).to_string(), "ref(12@2)");
    }
}
