//! hostlink runtime
//!
//! Runs a guest WebAssembly module on wasmtime and connects it to host
//! values through the pieces in `hostlink-core`.
//!
//! # Overview
//!
//! - [`Loader`] fetches, compiles and instantiates a module, then keeps the
//!   resulting [`Bridge`].
//! - [`Bridge`] owns the wasmtime store and exposes the reference table,
//!   string transfer and guest calls.
//! - [`imports`] registers the host functions the guest imports.
//! - [`services`] defines the collaborators the guest can reach.
//!
//! # Example
//!
//! ```ignore
//! use hostlink_runtime::{HostEnv, Loader, ModuleSource};
//! use hostlink_runtime::config::HostlinkConfig;
//!
//! let loader = Loader::from_config(HostlinkConfig::default(), HostEnv::default())?;
//! let bridge = loader.init(ModuleSource::Url("https://example.com/app.wasm".into())).await?;
//! bridge.lock().call("run")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod closure;
pub mod config;
pub mod exports;
pub mod host;
pub mod imports;
pub mod loader;
pub mod memory;
pub mod observability;
pub mod runtime;
pub mod services;

pub use bridge::Bridge;
pub use config::{BridgeConfig, FinalizerPolicy, HostlinkConfig};
pub use exports::GuestExports;
pub use host::{HostEnv, HostState};
pub use loader::{Loader, LoaderStatus, ModuleSource, SharedBridge};
pub use memory::GuestMemory;
pub use runtime::{CompiledModule, Runtime, RuntimeConfig};
pub use services::{
    FormSelection, HostServices, InMemoryChannel, MessageChannel, PatchApplier, RecordingPatcher,
    SelectionSource,
};
