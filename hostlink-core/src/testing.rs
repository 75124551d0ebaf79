//! Test doubles for code that talks to guest memory.
//!
//! [`MockGuest`] is a growable byte buffer with a bump allocator. Growth
//! reallocates the backing buffer, so it also exercises the view cache's
//! relocation handling the way `memory.grow` does in a real engine.

use crate::error::{HostlinkError, Result};
use crate::memory::{GuestAlloc, LinearMemory, check_range};

/// Growth granularity, one wasm page.
pub const PAGE_SIZE: usize = 64 * 1024;

/// One allocator call, as recorded by [`MockGuest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocCall {
    /// `malloc(size, align)`.
    Malloc {
        /// Requested size.
        size: u32,
        /// Requested alignment.
        align: u32,
    },
    /// `realloc(ptr, old_size, new_size, align)`.
    Realloc {
        /// Original pointer.
        ptr: u32,
        /// Original size.
        old_size: u32,
        /// New size.
        new_size: u32,
    },
}

/// Simulated guest: linear memory plus a bump allocator.
#[derive(Debug)]
pub struct MockGuest {
    bytes: Vec<u8>,
    next: u32,
    realloc: bool,
    limit: usize,
    calls: Vec<AllocCall>,
}

impl Default for MockGuest {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGuest {
    /// One page of memory, realloc supported, no size limit.
    pub fn new() -> Self {
        Self {
            bytes: vec![0; PAGE_SIZE],
            next: 8,
            realloc: true,
            limit: usize::MAX,
            calls: Vec::new(),
        }
    }

    /// Disable `realloc`.
    pub fn without_realloc(mut self) -> Self {
        self.realloc = false;
        self
    }

    /// Fail allocations that would grow memory past `bytes`.
    pub fn with_limit(mut self, bytes: usize) -> Self {
        self.limit = bytes;
        self
    }

    /// Allocator calls made so far.
    pub fn calls(&self) -> &[AllocCall] {
        &self.calls
    }

    /// Current memory size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Read back `len` bytes at `ptr`.
    pub fn read(&self, ptr: u32, len: u32) -> Result<&[u8]> {
        let range = check_range(ptr, len as usize, self.bytes.len())?;
        Ok(&self.bytes[range])
    }

    fn bump(&mut self, size: u32, align: u32) -> Result<u32> {
        let align = align.max(1);
        let start = self.next.div_ceil(align) * align;
        let end = start as usize + size as usize;
        if end > self.limit {
            return Err(HostlinkError::GuestAlloc {
                requested: size as u64,
                cause: "mock memory limit reached".to_string(),
            });
        }
        if end > self.bytes.len() {
            let pages = end.div_ceil(PAGE_SIZE);
            // Fresh buffer so the base address changes, as after memory.grow.
            let mut grown = vec![0; pages * PAGE_SIZE];
            grown[..self.bytes.len()].copy_from_slice(&self.bytes);
            self.bytes = grown;
        }
        self.next = end as u32;
        Ok(start)
    }
}

impl LinearMemory for MockGuest {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl GuestAlloc for MockGuest {
    fn malloc(&mut self, size: u32, align: u32) -> Result<u32> {
        self.calls.push(AllocCall::Malloc { size, align });
        self.bump(size, align)
    }

    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32> {
        self.calls.push(AllocCall::Realloc {
            ptr,
            old_size,
            new_size,
        });
        if !self.realloc {
            return Err(HostlinkError::GuestAlloc {
                requested: new_size as u64,
                cause: "realloc not supported".to_string(),
            });
        }
        if new_size <= old_size {
            return Ok(ptr);
        }
        let new_ptr = self.bump(new_size, align)?;
        let keep = old_size.min(new_size) as usize;
        self.bytes
            .copy_within(ptr as usize..ptr as usize + keep, new_ptr as usize);
        Ok(new_ptr)
    }

    fn supports_realloc(&self) -> bool {
        self.realloc
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
