//! Views over guest linear memory.
//!
//! Linear memory can grow, and growth may move it. Views are therefore never
//! kept across guest calls: [`ViewCache`] remembers the identity of the
//! buffer it last handed out and refreshes when that identity changes. The
//! views themselves borrow the memory, so the borrow checker rules out
//! reading through a view after the guest had a chance to grow it.

use crate::error::{HostlinkError, Result};
use std::ops::Range;

/// Identity of a linear memory buffer: base address plus byte length.
///
/// Changes whenever memory is relocated or grown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    /// Address of the first byte.
    pub base: usize,
    /// Size in bytes.
    pub len: usize,
}

impl BufferId {
    /// Identity of a byte slice.
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            base: bytes.as_ptr() as usize,
            len: bytes.len(),
        }
    }
}

/// A guest linear memory.
pub trait LinearMemory {
    /// Current bytes.
    fn bytes(&self) -> &[u8];

    /// Current bytes, writable.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Current buffer identity.
    fn buffer_id(&self) -> BufferId {
        BufferId::of(self.bytes())
    }
}

impl LinearMemory for [u8] {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl LinearMemory for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

/// Guest-side allocator used to place host data in linear memory.
pub trait GuestAlloc {
    /// Allocate `size` bytes aligned to `align`.
    fn malloc(&mut self, size: u32, align: u32) -> Result<u32>;

    /// Resize an allocation, possibly moving it.
    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32>;

    /// Whether `realloc` is available. Without it, encoders size exactly up
    /// front instead of shrinking afterwards.
    fn supports_realloc(&self) -> bool {
        true
    }

    /// Linear memory as it is now (after any growth caused by allocation).
    fn memory_mut(&mut self) -> &mut [u8];
}

/// Validate `offset..offset + len` against a memory of `size` bytes.
pub fn check_range(offset: u32, len: usize, size: usize) -> Result<Range<usize>> {
    let start = offset as usize;
    start
        .checked_add(len)
        .filter(|&end| end <= size)
        .map(|end| start..end)
        .ok_or(HostlinkError::OutOfBounds {
            offset: offset as u64,
            len: len as u64,
            size: size as u64,
        })
}

/// Byte-level view over linear memory.
#[derive(Debug)]
pub struct ByteView<B> {
    bytes: B,
}

impl<B: AsRef<[u8]>> ByteView<B> {
    /// Wrap a byte buffer.
    pub fn new(bytes: B) -> Self {
        Self { bytes }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.as_ref().len()
    }

    /// Check if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow `len` bytes at `ptr`.
    pub fn slice(&self, ptr: u32, len: u32) -> Result<&[u8]> {
        let range = check_range(ptr, len as usize, self.len())?;
        Ok(&self.bytes.as_ref()[range])
    }

    /// Read `count` little-endian `u32` words starting at `ptr`.
    pub fn read_u32s(&self, ptr: u32, count: u32) -> Result<Vec<u32>> {
        let bytes = self.slice_words(ptr, count)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect())
    }

    fn slice_words(&self, ptr: u32, count: u32) -> Result<&[u8]> {
        let len = (count as usize)
            .checked_mul(4)
            .ok_or(HostlinkError::EncodeOverflow {
                len: count as usize,
            })?;
        let range = check_range(ptr, len, self.len())?;
        Ok(&self.bytes.as_ref()[range])
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> ByteView<B> {
    /// Copy `data` to `ptr`.
    pub fn write(&mut self, ptr: u32, data: &[u8]) -> Result<()> {
        let range = check_range(ptr, data.len(), self.len())?;
        self.bytes.as_mut()[range].copy_from_slice(data);
        Ok(())
    }

    /// Borrow `len` bytes at `ptr` mutably.
    pub fn slice_mut(&mut self, ptr: u32, len: u32) -> Result<&mut [u8]> {
        let range = check_range(ptr, len as usize, self.len())?;
        Ok(&mut self.bytes.as_mut()[range])
    }

    /// Write little-endian `u32` words starting at `ptr`.
    pub fn write_u32s(&mut self, ptr: u32, words: &[u32]) -> Result<()> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.write(ptr, &bytes)
    }
}

/// Structured little-endian view over linear memory.
#[derive(Debug)]
pub struct DataView<B> {
    bytes: B,
}

macro_rules! data_view_accessors {
    ($($get:ident, $set:ident, $ty:ty;)*) => {
        impl<B: AsRef<[u8]>> DataView<B> {
            $(
                #[doc = concat!("Read a little-endian `", stringify!($ty), "` at `offset`.")]
                pub fn $get(&self, offset: u32) -> Result<$ty> {
                    let range = check_range(offset, size_of::<$ty>(), self.len())?;
                    let mut raw = [0u8; size_of::<$ty>()];
                    raw.copy_from_slice(&self.bytes.as_ref()[range]);
                    Ok(<$ty>::from_le_bytes(raw))
                }
            )*
        }

        impl<B: AsRef<[u8]> + AsMut<[u8]>> DataView<B> {
            $(
                #[doc = concat!("Write a little-endian `", stringify!($ty), "` at `offset`.")]
                pub fn $set(&mut self, offset: u32, value: $ty) -> Result<()> {
                    let range = check_range(offset, size_of::<$ty>(), self.len())?;
                    self.bytes.as_mut()[range].copy_from_slice(&value.to_le_bytes());
                    Ok(())
                }
            )*
        }
    };
}

data_view_accessors! {
    get_i32, set_i32, i32;
    get_u32, set_u32, u32;
    get_i64, set_i64, i64;
    get_f64, set_f64, f64;
}

impl<B: AsRef<[u8]>> DataView<B> {
    /// Wrap a byte buffer.
    pub fn new(bytes: B) -> Self {
        Self { bytes }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.as_ref().len()
    }

    /// Check if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tracks the buffer behind the byte and data views handed out so far.
#[derive(Debug, Default)]
pub struct ViewCache {
    bytes: Option<BufferId>,
    data: Option<BufferId>,
    refreshes: u64,
}

impl ViewCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte view over the current memory.
    pub fn byte_view<'m, M: LinearMemory + ?Sized>(&mut self, memory: &'m M) -> ByteView<&'m [u8]> {
        Self::refresh(&mut self.bytes, &mut self.refreshes, memory.buffer_id(), "byte");
        ByteView::new(memory.bytes())
    }

    /// Writable byte view over the current memory.
    pub fn byte_view_mut<'m, M: LinearMemory + ?Sized>(
        &mut self,
        memory: &'m mut M,
    ) -> ByteView<&'m mut [u8]> {
        Self::refresh(&mut self.bytes, &mut self.refreshes, memory.buffer_id(), "byte");
        ByteView::new(memory.bytes_mut())
    }

    /// Data view over the current memory.
    pub fn data_view<'m, M: LinearMemory + ?Sized>(&mut self, memory: &'m M) -> DataView<&'m [u8]> {
        Self::refresh(&mut self.data, &mut self.refreshes, memory.buffer_id(), "data");
        DataView::new(memory.bytes())
    }

    /// Writable data view over the current memory.
    pub fn data_view_mut<'m, M: LinearMemory + ?Sized>(
        &mut self,
        memory: &'m mut M,
    ) -> DataView<&'m mut [u8]> {
        Self::refresh(&mut self.data, &mut self.refreshes, memory.buffer_id(), "data");
        DataView::new(memory.bytes_mut())
    }

    /// Forget cached buffers; the next view request refreshes.
    pub fn invalidate(&mut self) {
        self.bytes = None;
        self.data = None;
    }

    /// How many times a view was rebuilt.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes
    }

    fn refresh(cached: &mut Option<BufferId>, refreshes: &mut u64, current: BufferId, kind: &str) {
        let stale = match cached {
            None => true,
            Some(id) => id.len == 0 || *id != current,
        };
        if stale {
            if let Some(previous) = cached {
                if previous.len != current.len {
                    tracing::debug!(
                        view = kind,
                        old_len = previous.len,
                        new_len = current.len,
                        "Guest memory grew, refreshing view"
                    );
                }
            }
            *cached = Some(current);
            *refreshes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_view_bounds() {
        let mut memory = vec![0u8; 16];
        let mut cache = ViewCache::new();

        let mut view = cache.byte_view_mut(&mut memory);
        view.write(4, b"abcd").unwrap();
        assert!(view.write(14, b"abcd").is_err());

        let view = cache.byte_view(&memory);
        assert_eq!(view.slice(4, 4).unwrap(), b"abcd");
        assert!(matches!(
            view.slice(12, 8),
            Err(HostlinkError::OutOfBounds { offset: 12, len: 8, size: 16 })
        ));
        assert!(view.slice(u32::MAX, 2).is_err());
    }

    #[test]
    fn data_view_little_endian() {
        let mut memory = vec![0u8; 32];
        let mut cache = ViewCache::new();
        let mut view = cache.data_view_mut(&mut memory);
        view.set_i32(0, -2).unwrap();
        view.set_u32(4, 0xdead_beef).unwrap();
        view.set_f64(8, 1.5).unwrap();
        view.set_i64(16, -7).unwrap();

        assert_eq!(&memory[4..8], &[0xef, 0xbe, 0xad, 0xde]);
        let view = cache.data_view(&memory);
        assert_eq!(view.get_i32(0).unwrap(), -2);
        assert_eq!(view.get_f64(8).unwrap(), 1.5);
        assert_eq!(view.get_i64(16).unwrap(), -7);
        assert!(view.get_f64(28).is_err());
    }

    #[test]
    fn u32_words() {
        let mut memory = vec![0u8; 16];
        let mut view = ByteView::new(&mut memory[..]);
        view.write_u32s(0, &[5, 6, 7]).unwrap();
        assert_eq!(view.read_u32s(0, 3).unwrap(), vec![5, 6, 7]);
        assert!(view.read_u32s(8, 3).is_err());
    }

    #[test]
    fn refreshes_on_new_identity() {
        let mut cache = ViewCache::new();
        let memory = vec![0u8; 16];
        cache.byte_view(&memory);
        cache.byte_view(&memory);
        assert_eq!(cache.refresh_count(), 1);

        let grown = vec![0u8; 32];
        cache.byte_view(&grown);
        assert_eq!(cache.refresh_count(), 2);

        cache.invalidate();
        cache.byte_view(&grown);
        assert_eq!(cache.refresh_count(), 3);
    }

    #[test]
    fn zero_length_view_is_rebuilt() {
        let mut cache = ViewCache::new();
        let empty: Vec<u8> = Vec::new();
        cache.data_view(&empty);
        cache.data_view(&empty);
        assert_eq!(cache.refresh_count(), 2);
    }
}
