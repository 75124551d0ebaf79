//! Moving values in and out of guest linear memory.
//!
//! [`GuestMemory`] pairs a store context with the guest exports so that the
//! core codec can allocate through the guest's own allocator. Views are
//! taken fresh for every access through the store's [`ViewCache`], because
//! any allocation may grow (and move) the memory.
//!
//! [`ViewCache`]: hostlink_core::ViewCache

use crate::exports::{FREE, GuestExports, MEMORY, guest_error};
use crate::host::HostState;
use hostlink_core::codec;
use hostlink_core::error::{HostlinkError, Result};
use hostlink_core::memory::{GuestAlloc, check_range};
use hostlink_core::types::{WasmSlice, guest_len};
use hostlink_core::{Handle, HostValue};
use wasmtime::StoreContextMut;

/// Size of a handle in guest memory.
const HANDLE_SIZE: u32 = 4;

/// `(ptr, len)` out-record.
const SLICE_RECORD: usize = 8;

/// `(is_some, pad, value)` out-record.
const OPTION_RECORD: usize = 16;

/// Offset of a field inside an out-record at `out`.
///
/// The whole record must lie inside memory; guest offsets never wrap.
fn out_field(out: u32, field: u32, record: usize, size: usize) -> Result<u32> {
    check_range(out, record, size)?;
    out.checked_add(field).ok_or(HostlinkError::OutOfBounds {
        offset: out as u64,
        len: record as u64,
        size: size as u64,
    })
}

/// Guest memory and allocator for one host operation.
pub struct GuestMemory<'a> {
    store: StoreContextMut<'a, HostState>,
    exports: GuestExports,
}

impl<'a> GuestMemory<'a> {
    /// Pair a store context with resolved exports.
    pub fn new(store: StoreContextMut<'a, HostState>, exports: GuestExports) -> Self {
        Self { store, exports }
    }

    /// Use the exports attached to the store's host state.
    ///
    /// Fails while the module is still being instantiated.
    pub fn attached(store: StoreContextMut<'a, HostState>) -> Result<Self> {
        let exports = store
            .data()
            .exports()
            .cloned()
            .ok_or_else(|| HostlinkError::MissingExport {
                name: MEMORY.to_string(),
                cause: "host import called before instantiation finished".to_string(),
            })?;
        Ok(Self::new(store, exports))
    }

    /// Store context, for calls that need more than memory.
    pub fn store(&mut self) -> &mut StoreContextMut<'a, HostState> {
        &mut self.store
    }

    /// Host state.
    pub fn state(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    /// Exports in use.
    pub fn exports(&self) -> &GuestExports {
        &self.exports
    }

    /// Current memory size in bytes.
    pub fn size(&mut self) -> usize {
        self.exports.memory.data_size(&self.store)
    }

    /// Copy a string into guest memory.
    pub fn pass_string(&mut self, text: &str) -> Result<WasmSlice> {
        codec::encode(text, self)
    }

    /// Read and strictly decode a string from guest memory.
    pub fn read_string(&mut self, ptr: u32, len: u32) -> Result<String> {
        let (data, state) = self.exports.memory.data_and_store_mut(&mut self.store);
        let view = state.views.byte_view(data);
        codec::decode(view.slice(ptr, len)?, ptr).map(str::to_owned)
    }

    /// Release a guest allocation, if the guest exports a deallocator.
    pub fn free(&mut self, ptr: u32, size: u32, align: u32) -> Result<()> {
        let Some(free) = self.exports.free.clone() else {
            tracing::trace!(ptr, size, "Guest has no free export, leaking allocation");
            return Ok(());
        };
        free.call(&mut self.store, (ptr, size, align))
            .map_err(|e| guest_error(FREE, e))
    }

    /// Read `len` handles at `ptr`, resolve them and release them.
    ///
    /// Ownership of the values moves to the caller: every handle in the
    /// slice is invalid afterwards. The guest memory itself is not freed.
    pub fn get_array(&mut self, ptr: u32, len: u32) -> Result<Vec<HostValue>> {
        let (data, state) = self.exports.memory.data_and_store_mut(&mut self.store);
        let raw = state.views.byte_view(data).read_u32s(ptr, len)?;
        let handles: Vec<Handle> = raw.into_iter().map(Handle::from_raw).collect();
        state.table.take_many(&handles)
    }

    /// Allocate a handle array holding one fresh handle per value.
    ///
    /// The guest owns both the allocation and the handles.
    pub fn set_array(&mut self, values: Vec<HostValue>) -> Result<WasmSlice> {
        let len = guest_len(values.len())?;
        let bytes = len
            .checked_mul(HANDLE_SIZE)
            .ok_or(HostlinkError::EncodeOverflow {
                len: values.len() * HANDLE_SIZE as usize,
            })?;
        let ptr = self.malloc(bytes, HANDLE_SIZE)?;

        let state = self.store.data_mut();
        let mut handles = Vec::with_capacity(values.len());
        for value in values {
            match state.table.alloc(value) {
                Ok(handle) => handles.push(handle.as_raw()),
                Err(e) => {
                    for handle in handles {
                        state.table.drop(Handle::from_raw(handle))?;
                    }
                    self.free(ptr, bytes, HANDLE_SIZE)?;
                    return Err(e);
                }
            }
        }

        let (data, state) = self.exports.memory.data_and_store_mut(&mut self.store);
        state.views.byte_view_mut(data).write_u32s(ptr, &handles)?;
        Ok(WasmSlice::new(ptr, len))
    }

    /// Write an optional string as `(ptr, len)` at `out`; `(0, 0)` for none.
    pub fn write_string_out(&mut self, out: u32, text: Option<&str>) -> Result<()> {
        let slice = match text {
            Some(text) => self.pass_string(text)?,
            None => WasmSlice::null(),
        };
        self.write_slice_out(out, slice)
    }

    /// Write `(ptr, len)` at `out`.
    pub fn write_slice_out(&mut self, out: u32, slice: WasmSlice) -> Result<()> {
        let (data, state) = self.exports.memory.data_and_store_mut(&mut self.store);
        let len_at = out_field(out, 4, SLICE_RECORD, data.len())?;
        let mut view = state.views.data_view_mut(data);
        view.set_u32(out, slice.ptr)?;
        view.set_u32(len_at, slice.len)
    }

    /// Write an optional `f64` as `(is_some, value)` at `out`.
    pub fn write_f64_out(&mut self, out: u32, value: Option<f64>) -> Result<()> {
        let (data, state) = self.exports.memory.data_and_store_mut(&mut self.store);
        let value_at = out_field(out, 8, OPTION_RECORD, data.len())?;
        let mut view = state.views.data_view_mut(data);
        view.set_f64(value_at, value.unwrap_or(0.0))?;
        view.set_i32(out, value.is_some() as i32)
    }

    /// Write an optional `i64` as `(is_some, value)` at `out`.
    pub fn write_i64_out(&mut self, out: u32, value: Option<i64>) -> Result<()> {
        let (data, state) = self.exports.memory.data_and_store_mut(&mut self.store);
        let value_at = out_field(out, 8, OPTION_RECORD, data.len())?;
        let mut view = state.views.data_view_mut(data);
        view.set_i64(value_at, value.unwrap_or(0))?;
        view.set_i32(out, value.is_some() as i32)
    }
}

impl GuestAlloc for GuestMemory<'_> {
    fn malloc(&mut self, size: u32, align: u32) -> Result<u32> {
        self.exports
            .malloc
            .call(&mut self.store, (size, align))
            .map_err(|e| HostlinkError::GuestAlloc {
                requested: size as u64,
                cause: e.to_string(),
            })
    }

    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32> {
        self.exports
            .realloc
            .call(&mut self.store, (ptr, old_size, new_size, align))
            .map_err(|e| HostlinkError::GuestAlloc {
                requested: new_size as u64,
                cause: e.to_string(),
            })
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.exports.memory.data_mut(&mut self.store)
    }
}
