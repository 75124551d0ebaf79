//! Core types: handles, identifiers and guest pointers.

mod handle;
mod ids;
mod slice;

pub use handle::{GENERATION_MASK, Handle, INDEX_BITS, INDEX_MASK};
pub use ids::BridgeId;
pub use slice::{WasmSlice, guest_len};
