//! Generation-checked reference table.
//!
//! Maps [`Handle`]s handed to the guest onto [`HostValue`]s. Slots are
//! recycled through a free list; every release bumps the slot generation so
//! that a handle kept past its release resolves to
//! [`HostlinkError::StaleHandle`] instead of whatever reused the slot.

use crate::error::{HostlinkError, Result};
use crate::types::{GENERATION_MASK, Handle, INDEX_MASK};
use crate::value::{HostFunction, HostValue};
use std::collections::HashSet;
use std::sync::Arc;

/// Default number of dynamic slots.
pub const DEFAULT_CAPACITY: u32 = 1 << 16;

/// Largest capacity representable by the handle layout.
pub const MAX_CAPACITY: u32 = INDEX_MASK - Handle::FIRST_DYNAMIC + 1;

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    value: Option<HostValue>,
}

/// Slot table holding every host value the guest can name.
#[derive(Debug)]
pub struct RefTable {
    /// Indexed by handle index; entries below `FIRST_DYNAMIC` stay empty.
    slots: Vec<Slot>,
    free: Vec<u32>,
    capacity: u32,
    live: usize,
}

impl Default for RefTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RefTable {
    /// Create a table with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a table holding at most `capacity` dynamic values.
    pub fn with_capacity(capacity: u32) -> Self {
        let mut slots = Vec::with_capacity(Handle::FIRST_DYNAMIC as usize + 64);
        slots.resize_with(Handle::FIRST_DYNAMIC as usize, Slot::default);
        Self {
            slots,
            free: Vec::new(),
            capacity: capacity.clamp(1, MAX_CAPACITY),
            live: 0,
        }
    }

    /// Maximum number of dynamic values.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of live dynamic values.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check if no dynamic value is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Store a value and return its handle.
    ///
    /// `undefined`, `null` and booleans map onto their permanent sentinels.
    pub fn alloc(&mut self, value: HostValue) -> Result<Handle> {
        match value {
            HostValue::Undefined => return Ok(Handle::UNDEFINED),
            HostValue::Null => return Ok(Handle::NULL),
            HostValue::Bool(true) => return Ok(Handle::TRUE),
            HostValue::Bool(false) => return Ok(Handle::FALSE),
            _ => {}
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.live as u32 >= self.capacity {
                    return Err(HostlinkError::TableFull {
                        capacity: self.capacity,
                    });
                }
                let index = self.slots.len() as u32;
                self.slots.push(Slot::default());
                if index.is_power_of_two() {
                    tracing::debug!(slots = index + 1, "Reference table grew");
                }
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.live += 1;
        Ok(Handle::new(index, slot.generation))
    }

    /// Resolve a handle.
    pub fn get(&self, handle: Handle) -> Result<HostValue> {
        match handle {
            Handle::UNDEFINED => Ok(HostValue::Undefined),
            Handle::NULL => Ok(HostValue::Null),
            Handle::TRUE => Ok(HostValue::Bool(true)),
            Handle::FALSE => Ok(HostValue::Bool(false)),
            _ => self
                .slot(handle)
                .and_then(|slot| slot.value.clone())
                .ok_or(HostlinkError::StaleHandle { handle }),
        }
    }

    /// Resolve a handle where `0` means "absent".
    pub fn get_optional(&self, handle: Handle) -> Result<Option<HostValue>> {
        if handle.is_none() {
            Ok(None)
        } else {
            self.get(handle).map(Some)
        }
    }

    /// Whether the handle currently resolves.
    pub fn contains(&self, handle: Handle) -> bool {
        handle.is_sentinel() || self.slot(handle).is_some_and(|slot| slot.value.is_some())
    }

    /// Allocate a second handle to the same value.
    pub fn clone_handle(&mut self, handle: Handle) -> Result<Handle> {
        let value = self.get(handle)?;
        self.alloc(value)
    }

    /// Release a handle. Releasing a sentinel is a no-op.
    pub fn drop(&mut self, handle: Handle) -> Result<()> {
        self.take(handle).map(|_| ())
    }

    /// Release a handle and return its value.
    pub fn take(&mut self, handle: Handle) -> Result<HostValue> {
        if handle.is_sentinel() {
            return self.get(handle);
        }
        let index = handle.index() as usize;
        let value = match self.slots.get_mut(index) {
            Some(slot)
                if index >= Handle::FIRST_DYNAMIC as usize
                    && slot.generation == handle.generation()
                    && slot.value.is_some() =>
            {
                slot.generation = (slot.generation + 1) & GENERATION_MASK;
                slot.value.take()
            }
            _ => None,
        };
        let value = value.ok_or(HostlinkError::StaleHandle { handle })?;
        self.live -= 1;
        self.free.push(handle.index());
        Ok(value)
    }

    /// Resolve every handle, then release them all.
    ///
    /// The caller takes ownership of the values; none of the handles resolve
    /// afterwards. If any handle is invalid (or repeated) the table is left
    /// unchanged and the first offending handle is reported.
    pub fn take_many(&mut self, handles: &[Handle]) -> Result<Vec<HostValue>> {
        let mut seen = HashSet::with_capacity(handles.len());
        for &handle in handles {
            if !self.contains(handle) || (!handle.is_sentinel() && !seen.insert(handle)) {
                return Err(HostlinkError::StaleHandle { handle });
            }
        }
        handles.iter().map(|&handle| self.take(handle)).collect()
    }

    /// Resolve a handle that must hold a string.
    pub fn get_string(&self, handle: Handle) -> Result<Arc<str>> {
        match self.get(handle)? {
            HostValue::String(s) => Ok(s),
            other => Err(HostlinkError::TypeMismatch {
                handle,
                expected: "string",
                found: other.kind(),
            }),
        }
    }

    /// Resolve a handle that must hold a function.
    pub fn get_function(&self, handle: Handle) -> Result<HostFunction> {
        match self.get(handle)? {
            HostValue::Function(f) => Ok(f),
            other => Err(HostlinkError::TypeMismatch {
                handle,
                expected: "function",
                found: other.kind(),
            }),
        }
    }

    /// Release every dynamic value.
    pub fn clear(&mut self) {
        for (index, slot) in self
            .slots
            .iter_mut()
            .enumerate()
            .skip(Handle::FIRST_DYNAMIC as usize)
        {
            if slot.value.take().is_some() {
                slot.generation = (slot.generation + 1) & GENERATION_MASK;
                self.free.push(index as u32);
            }
        }
        self.live = 0;
    }

    fn slot(&self, handle: Handle) -> Option<&Slot> {
        if handle.index() < Handle::FIRST_DYNAMIC {
            return None;
        }
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
    }
}
