//! Per-store host state.
//!
//! Everything an import needs lives here and is reached through
//! `Caller::data_mut`, so no lock is held while the guest runs.

use crate::config::BridgeConfig;
use crate::exports::GuestExports;
use crate::services::HostServices;
use hostlink_core::error::Result;
use hostlink_core::{BridgeId, FinalizerQueue, Handle, HostValue, ObjectRef, RefTable, ViewCache};
use wasmtime::StoreLimits;

/// Names under which the `global` import returns the global object itself.
const GLOBAL_ALIASES: [&str; 4] = ["globalThis", "window", "self", "global"];

/// Host environment visible to the guest: the global object and services.
#[derive(Debug, Clone)]
pub struct HostEnv {
    /// Global object; its properties are what `global(name)` resolves.
    pub global: ObjectRef,
    /// Registered collaborator services.
    pub services: HostServices,
}

impl Default for HostEnv {
    fn default() -> Self {
        Self {
            global: ObjectRef::with_class("Window"),
            services: HostServices::default(),
        }
    }
}

impl HostEnv {
    /// Environment with the given services.
    pub fn with_services(services: HostServices) -> Self {
        Self {
            services,
            ..Self::default()
        }
    }

    /// Replace the global object.
    pub fn with_global(mut self, global: ObjectRef) -> Self {
        self.global = global;
        self
    }

    /// Resolve a global name.
    pub fn lookup_global(&self, name: &str) -> Option<HostValue> {
        if GLOBAL_ALIASES.contains(&name) {
            return Some(HostValue::Object(self.global.clone()));
        }
        self.global.get(name)
    }
}

/// State stored in each wasmtime store.
pub struct HostState {
    /// Identifies this bridge in log output.
    pub bridge_id: BridgeId,
    /// Handles visible to the guest.
    pub table: RefTable,
    /// Tracks the linear memory buffer between calls.
    pub views: ViewCache,
    /// Destructors waiting for a safe point.
    pub finalizers: FinalizerQueue,
    /// Global object and services.
    pub env: HostEnv,
    /// Exception not yet collected by the guest (when it has no store export).
    pending_exception: Option<Handle>,
    /// Guest exports, available once instantiation finished.
    exports: Option<GuestExports>,
    /// Resource limits enforced by the store.
    pub(crate) limits: StoreLimits,
}

impl HostState {
    /// Create state for a new store.
    pub fn new(config: &BridgeConfig, env: HostEnv, limits: StoreLimits) -> Self {
        Self {
            bridge_id: BridgeId::new(),
            table: RefTable::with_capacity(config.table_capacity),
            views: ViewCache::new(),
            finalizers: FinalizerQueue::new(),
            env,
            pending_exception: None,
            exports: None,
            limits,
        }
    }

    /// Guest exports, if instantiation completed.
    pub fn exports(&self) -> Option<&GuestExports> {
        self.exports.as_ref()
    }

    pub(crate) fn attach_exports(&mut self, exports: GuestExports) {
        self.exports = Some(exports);
        self.views.invalidate();
    }

    /// Store an exception for the guest to collect.
    ///
    /// An uncollected earlier exception is released first.
    pub fn set_pending_exception(&mut self, exception: HostValue) -> Result<Handle> {
        if let Some(previous) = self.pending_exception.take() {
            tracing::debug!(bridge_id = %self.bridge_id, handle = %previous, "Replacing uncollected exception");
            self.table.drop(previous)?;
        }
        let handle = self.table.alloc(exception)?;
        self.pending_exception = Some(handle);
        Ok(handle)
    }

    /// Hand the pending exception handle to the caller.
    pub fn take_pending_exception(&mut self) -> Option<Handle> {
        self.pending_exception.take()
    }

    /// Whether an exception is waiting.
    pub fn has_pending_exception(&self) -> bool {
        self.pending_exception.is_some()
    }
}

impl std::fmt::Debug for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostState")
            .field("bridge_id", &self.bridge_id)
            .field("live_handles", &self.table.len())
            .field("queued_finalizers", &self.finalizers.len())
            .field("pending_exception", &self.pending_exception)
            .field("ready", &self.exports.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::StoreLimitsBuilder;

    fn state() -> HostState {
        HostState::new(
            &BridgeConfig::default(),
            HostEnv::default(),
            StoreLimitsBuilder::new().build(),
        )
    }

    #[test]
    fn pending_exception_replaces_previous() {
        let mut state = state();
        let first = state.set_pending_exception(HostValue::error("one")).unwrap();
        let second = state.set_pending_exception(HostValue::error("two")).unwrap();
        assert!(state.table.get(first).is_err());
        assert_eq!(state.take_pending_exception(), Some(second));
        assert!(!state.has_pending_exception());
        assert_eq!(
            state.table.get(second).unwrap().get("message").as_str(),
            Some("two")
        );
    }

    #[test]
    fn global_aliases_resolve_to_global_object() {
        let env = HostEnv::default().with_global(
            ObjectRef::with_class("Window").with("document", ObjectRef::with_class("Document")),
        );
        assert!(env.lookup_global("window").unwrap().instance_of("Window"));
        assert!(env.lookup_global("document").unwrap().instance_of("Document"));
        assert!(env.lookup_global("navigator").is_none());
    }
}
