//! One instantiated guest module and the host side of its values.

use crate::closure::{self, StoreClosureHost};
use crate::config::{BridgeConfig, FinalizerPolicy};
use crate::exports::{GuestExports, guest_error};
use crate::host::{HostEnv, HostState};
use crate::imports;
use crate::memory::GuestMemory;
use crate::runtime::{CompiledModule, Runtime};
use hostlink_core::error::{HostlinkError, Result};
use hostlink_core::owned::OwnedHandle;
use hostlink_core::value::{HostValue, ObjectRef};
use hostlink_core::{BridgeId, Handle, WasmSlice};
use wasmtime::{AsContextMut, Store, Val, WasmParams, WasmResults};

/// A running guest together with its reference table, view cache and
/// finalizer queue.
///
/// All access goes through `&mut self`; the loader shares a bridge behind a
/// mutex.
pub struct Bridge {
    store: Store<HostState>,
    exports: GuestExports,
    module_name: String,
    finalizers: FinalizerPolicy,
}

impl Bridge {
    /// Instantiate `module`, attach its exports and run its start export.
    pub fn instantiate(
        runtime: &Runtime,
        module: &CompiledModule,
        config: &BridgeConfig,
        env: HostEnv,
    ) -> Result<Self> {
        config.validate()?;
        let state = HostState::new(config, env, runtime.store_limits());
        let bridge_id = state.bridge_id;

        let mut store = Store::new(runtime.engine(), state);
        store.limiter(|state| &mut state.limits);
        if let Some(fuel) = runtime.initial_fuel() {
            store.set_fuel(fuel).map_err(|e| HostlinkError::Instantiate {
                module: module.name().to_string(),
                cause: format!("failed to set fuel: {e}"),
            })?;
        }
        if runtime.config().epoch_interruption {
            store.set_epoch_deadline(runtime.config().epoch_deadline);
        }

        let linker = imports::build_linker(runtime.engine(), &config.import_module)?;
        let instance = linker
            .instantiate(&mut store, module.module())
            .map_err(|e| HostlinkError::Instantiate {
                module: module.name().to_string(),
                cause: format!("{e:#}"),
            })?;

        let exports = GuestExports::resolve(&mut store, instance, &config.start_export)?;
        store.data_mut().attach_exports(exports.clone());

        exports
            .start
            .call(&mut store, ())
            .map_err(|e| guest_error(&config.start_export, e))?;

        let mut bridge = Self {
            store,
            exports,
            module_name: module.name().to_string(),
            finalizers: config.finalizers,
        };
        bridge.after_call();

        tracing::info!(%bridge_id, module = module.name(), "Guest module ready");
        Ok(bridge)
    }

    /// Identifier attached to this bridge's log events.
    pub fn id(&self) -> BridgeId {
        self.store.data().bridge_id
    }

    /// Name of the module this bridge runs.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// The wasmtime store.
    pub fn store(&self) -> &Store<HostState> {
        &self.store
    }

    /// The wasmtime store, mutably.
    pub fn store_mut(&mut self) -> &mut Store<HostState> {
        &mut self.store
    }

    /// Host state.
    pub fn state(&self) -> &HostState {
        self.store.data()
    }

    /// Host state, mutably.
    pub fn state_mut(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    /// Resolved guest exports.
    pub fn exports(&self) -> &GuestExports {
        &self.exports
    }

    /// The global object seen by the guest.
    pub fn global(&self) -> ObjectRef {
        self.state().env.global.clone()
    }

    /// Current linear memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.exports.memory.data_size(&self.store)
    }

    /// Fuel left, if fuel metering is enabled.
    pub fn fuel_remaining(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }

    /// Call an export taking and returning nothing.
    pub fn call(&mut self, export: &str) -> Result<()> {
        self.call_typed::<(), ()>(export, ())
    }

    /// Call an export with typed parameters and results.
    pub fn call_typed<P, R>(&mut self, export: &str, params: P) -> Result<R>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let span = crate::instrument_export!(self.id(), export);
        let _enter = span.enter();

        let func = self
            .exports
            .instance()
            .get_typed_func::<P, R>(&mut self.store, export)
            .map_err(|e| HostlinkError::MissingExport {
                name: export.to_string(),
                cause: e.to_string(),
            })?;
        let result = func
            .call(&mut self.store, params)
            .map_err(|e| guest_error(export, e));
        self.after_call();
        result
    }

    /// Call an export whose parameters are all handles.
    ///
    /// Each argument gets a fresh handle owned by the guest. If the export
    /// returns one `i32`, it is taken as a handle to the result (`0` for
    /// none).
    pub fn call_with_values(
        &mut self,
        export: &str,
        args: &[HostValue],
    ) -> Result<Option<HostValue>> {
        let span = crate::instrument_export!(self.id(), export);
        let _enter = span.enter();

        let func = self
            .exports
            .instance()
            .get_func(&mut self.store, export)
            .ok_or_else(|| HostlinkError::MissingExport {
                name: export.to_string(),
                cause: "no function with this name".to_string(),
            })?;

        let handles = closure::alloc_args(self.store.data_mut(), args.iter().cloned())?;
        let params: Vec<Val> = handles
            .iter()
            .map(|h| Val::I32(h.as_raw() as i32))
            .collect();
        let result_count = func.ty(&self.store).results().len();
        let mut results = vec![Val::I32(0); result_count];

        let called = func
            .call(&mut self.store, &params, &mut results)
            .map_err(|e| {
                closure::release_args(self.store.data_mut(), &handles);
                guest_error(export, e)
            });
        let returned = called.and_then(|()| match results.as_slice() {
            [Val::I32(raw)] => {
                let handle = Handle::from_raw(*raw as u32);
                if handle.is_none() {
                    Ok(None)
                } else {
                    self.store.data_mut().table.take(handle).map(Some)
                }
            }
            _ => Ok(None),
        });
        self.after_call();
        returned
    }

    /// Call a host function or guest closure.
    ///
    /// A thrown value comes back as [`HostlinkError::HostException`].
    pub fn call_function(
        &mut self,
        f: &HostValue,
        this: &HostValue,
        args: Vec<HostValue>,
    ) -> Result<HostValue> {
        let completion =
            closure::call_function(self.store.as_context_mut(), &self.exports, f, this, args);
        self.after_call();
        completion?.map_err(|thrown| HostlinkError::HostException {
            message: thrown.debug_string(),
        })
    }

    /// Invoke a guest closure through the core closure protocol.
    pub fn call_closure(
        &mut self,
        closure: &hostlink_core::GuestClosure,
        args: Vec<HostValue>,
    ) -> Result<HostValue> {
        let result = {
            let mut host =
                StoreClosureHost::new(self.store.as_context_mut(), self.exports.clone(), args);
            closure.call(&mut host)
        };
        self.after_call();
        result
    }

    /// Hand a value to the guest.
    pub fn alloc(&mut self, value: HostValue) -> Result<Handle> {
        self.state_mut().table.alloc(value)
    }

    /// Resolve a handle without releasing it.
    pub fn get(&self, handle: Handle) -> Result<HostValue> {
        self.state().table.get(handle)
    }

    /// Resolve a handle and release it.
    pub fn take(&mut self, handle: Handle) -> Result<HostValue> {
        self.state_mut().table.take(handle)
    }

    /// Guest memory access for the duration of the borrow.
    pub fn memory(&mut self) -> GuestMemory<'_> {
        GuestMemory::new(self.store.as_context_mut(), self.exports.clone())
    }

    /// Copy a string into guest memory.
    pub fn pass_string(&mut self, text: &str) -> Result<WasmSlice> {
        self.memory().pass_string(text)
    }

    /// Read a string from guest memory.
    pub fn read_string(&mut self, slice: WasmSlice) -> Result<String> {
        self.memory().read_string(slice.ptr, slice.len)
    }

    /// Resolve and release a handle array in guest memory.
    pub fn get_array(&mut self, slice: WasmSlice) -> Result<Vec<HostValue>> {
        self.memory().get_array(slice.ptr, slice.len)
    }

    /// Write a handle array into guest memory.
    pub fn set_array(&mut self, values: Vec<HostValue>) -> Result<WasmSlice> {
        self.memory().set_array(values)
    }

    /// Take the exception left by a fallible import, if the guest did not
    /// collect it.
    pub fn take_exception(&mut self) -> Option<HostValue> {
        let state = self.state_mut();
        let handle = state.take_pending_exception()?;
        state.table.take(handle).ok()
    }

    /// Run queued finalizers now. Returns how many ran.
    pub fn collect(&mut self) -> usize {
        closure::drain_finalizers(self.store.as_context_mut())
    }

    /// Release a guest object explicitly through `__hostlink_<class>_free(ptr, 0)`.
    ///
    /// Freeing twice is a no-op.
    pub fn free_owned(&mut self, owned: &OwnedHandle) -> Result<()> {
        let Some(free) = self.exports.class_free(&mut self.store, owned.class())? else {
            return Err(HostlinkError::MissingExport {
                name: crate::exports::class_free_export(owned.class()),
                cause: "guest does not export a free function for this class".to_string(),
            });
        };
        let store = &mut self.store;
        owned.free(|ptr| {
            free.call(&mut *store, (ptr, 0))
                .map_err(|e| guest_error(owned.class(), e))
        })
    }

    fn after_call(&mut self) {
        if self.finalizers == FinalizerPolicy::AfterEachCall {
            self.collect();
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("module", &self.module_name)
            .field("state", self.store.data())
            .field("finalizers", &self.finalizers)
            .finish()
    }
}
