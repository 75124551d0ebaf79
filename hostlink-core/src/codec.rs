//! UTF-8 string transfer between host and guest.
//!
//! Encoding reserves one byte per UTF-16 unit and copies the ASCII prefix
//! directly. The first non-ASCII character triggers a single `realloc` to
//! the worst case (three bytes per remaining unit), the rest is encoded
//! there, and a final `realloc` shrinks the block to the bytes written.
//! Decoding is strict: malformed UTF-8 is an error, never replaced.

use crate::error::{HostlinkError, Result};
use crate::memory::{ByteView, GuestAlloc};
use crate::types::{WasmSlice, guest_len};

/// Upper bound of UTF-8 bytes produced per UTF-16 unit.
const MAX_BYTES_PER_UNIT: usize = 3;

/// Copy `text` into guest memory and return where it landed.
pub fn encode<G: GuestAlloc + ?Sized>(text: &str, guest: &mut G) -> Result<WasmSlice> {
    if !guest.supports_realloc() {
        return encode_exact(text, guest);
    }

    let units = text.encode_utf16().count();
    let len = guest_len(units)?;
    let mut ptr = guest.malloc(len, 1)?;

    let ascii = text.bytes().take_while(u8::is_ascii).count();
    ByteView::new(guest.memory_mut()).write(ptr, &text.as_bytes()[..ascii])?;
    if ascii == text.len() {
        return Ok(WasmSlice::new(ptr, guest_len(ascii)?));
    }

    let rest = &text[ascii..];
    let reserved = guest_len(ascii + rest.encode_utf16().count() * MAX_BYTES_PER_UNIT)?;
    ptr = guest.realloc(ptr, len, reserved, 1)?;
    let offset = ptr + guest_len(ascii)?;
    ByteView::new(guest.memory_mut()).write(offset, rest.as_bytes())?;

    let written = guest_len(text.len())?;
    ptr = guest.realloc(ptr, reserved, written, 1)?;
    tracing::trace!(ptr, len = written, units, "Encoded non-ASCII string");
    Ok(WasmSlice::new(ptr, written))
}

/// Copy UTF-16 text into guest memory as UTF-8.
///
/// Unpaired surrogates become U+FFFD.
pub fn encode_utf16<G: GuestAlloc + ?Sized>(units: &[u16], guest: &mut G) -> Result<WasmSlice> {
    let text: String = char::decode_utf16(units.iter().copied())
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    encode(&text, guest)
}

fn encode_exact<G: GuestAlloc + ?Sized>(text: &str, guest: &mut G) -> Result<WasmSlice> {
    let len = guest_len(text.len())?;
    let ptr = guest.malloc(len, 1)?;
    ByteView::new(guest.memory_mut()).write(ptr, text.as_bytes())?;
    Ok(WasmSlice::new(ptr, len))
}

/// Decode bytes read from guest memory at `ptr`.
pub fn decode(bytes: &[u8], ptr: u32) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| HostlinkError::InvalidUtf8 {
        ptr,
        len: bytes.len() as u32,
        cause: e.to_string(),
    })
}

/// Read and decode the string at `slice` from `memory`.
pub fn read_string(memory: &[u8], slice: WasmSlice) -> Result<String> {
    let view = ByteView::new(memory);
    let bytes = view.slice(slice.ptr, slice.len)?;
    decode(bytes, slice.ptr).map(str::to_owned)
}
