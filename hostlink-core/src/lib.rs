//! hostlink core library
//!
//! Engine-independent pieces of the host side of a WebAssembly value bridge.
//!
//! # Overview
//!
//! A guest module cannot hold host values directly. It holds integer
//! [`Handle`]s into a [`RefTable`], passes strings as `(ptr, len)` pairs in its
//! linear memory, and hands its own closures and objects to the host as raw
//! words that the host wraps and eventually releases.
//!
//! # Key Components
//!
//! - **Memory**: [`ViewCache`] and the byte/data views over linear memory
//! - **Codec**: UTF-8 transfer of strings into and out of guest memory
//! - **Table**: generation-checked handle table
//! - **Closure**: reference-counted guest closures with reentrancy detection
//! - **Owned**: host wrappers around guest objects, released exactly once
//! - **Finalize**: queue of deferred guest-side destructor calls
//!
//! This crate does not depend on a WebAssembly engine; `hostlink-runtime`
//! wires it to wasmtime.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abi;
pub mod closure;
pub mod codec;
pub mod error;
pub mod finalize;
pub mod memory;
pub mod owned;
pub mod table;
pub mod testing;
pub mod types;
pub mod value;

pub use closure::{ClosureHost, GuestClosure};
pub use error::{HostlinkError, Result};
pub use finalize::{Finalizer, FinalizerQueue};
pub use memory::{BufferId, ByteView, DataView, GuestAlloc, LinearMemory, ViewCache};
pub use owned::OwnedHandle;
pub use table::RefTable;
pub use types::{BridgeId, Handle, WasmSlice};
pub use value::{ArrayRef, Completion, HostFunction, HostValue, ObjectRef, OpaqueRef};
