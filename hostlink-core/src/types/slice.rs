//! Pointers into guest linear memory.

use crate::error::{HostlinkError, Result};
use std::fmt;

/// A `(pointer, length)` pair inside guest linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WasmSlice {
    /// Offset within linear memory.
    pub ptr: u32,
    /// Length in bytes (or elements, for handle arrays).
    pub len: u32,
}

impl WasmSlice {
    /// Create a new slice.
    pub const fn new(ptr: u32, len: u32) -> Self {
        Self { ptr, len }
    }

    /// The absent slice, written for `None` results.
    pub const fn null() -> Self {
        Self { ptr: 0, len: 0 }
    }

    /// Check if this is the absent slice.
    pub const fn is_null(&self) -> bool {
        self.ptr == 0 && self.len == 0
    }

    /// Byte range covered, as `usize` bounds.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.ptr as usize..self.ptr as usize + self.len as usize
    }
}

impl fmt::Display for WasmSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}+{}", self.ptr, self.len)
    }
}

/// Convert a host length into a guest `u32` length.
pub fn guest_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| HostlinkError::EncodeOverflow { len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_basics() {
        let slice = WasmSlice::new(100, 50);
        assert_eq!(slice.range(), 100..150);
        assert!(!slice.is_null());
        assert!(WasmSlice::null().is_null());
        assert_eq!(slice.to_string(), "0x64+50");
    }

    #[test]
    fn guest_len_overflow() {
        assert_eq!(guest_len(12).unwrap(), 12);
        assert!(guest_len(u32::MAX as usize + 1).is_err());
    }
}
