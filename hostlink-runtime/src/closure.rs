//! Calling host functions and guest closures from the host.
//!
//! Guest closures run through the guest's function table: the invoker is
//! called as `invoker(a, b, ..arg_handles)` and may return one handle, which
//! the host takes. Destructors are called as `dtor(a, b)`.

use crate::exports::{FUNCTION_TABLE, GuestExports, guest_error};
use crate::host::HostState;
use hostlink_core::closure::ClosureHost;
use hostlink_core::error::{HostlinkError, Result};
use hostlink_core::finalize::Finalizer;
use hostlink_core::value::{Completion, HostFunction, HostValue};
use hostlink_core::Handle;
use wasmtime::{Func, StoreContextMut, Val};

/// [`ClosureHost`] over a live store.
pub struct StoreClosureHost<'a> {
    store: StoreContextMut<'a, HostState>,
    exports: GuestExports,
    args: Vec<HostValue>,
}

impl<'a> StoreClosureHost<'a> {
    /// Prepare an invocation with `args`. Argument handles are owned by the
    /// guest once the invoker runs.
    pub fn new(
        store: StoreContextMut<'a, HostState>,
        exports: GuestExports,
        args: Vec<HostValue>,
    ) -> Self {
        Self {
            store,
            exports,
            args,
        }
    }
}

impl ClosureHost for StoreClosureHost<'_> {
    type Output = HostValue;

    fn invoke(&mut self, invoker: u32, a: u32, b: u32) -> Result<HostValue> {
        let func = table_func(&mut self.store, &self.exports, invoker)?;

        let args = std::mem::take(&mut self.args);
        let handles = alloc_args(self.store.data_mut(), args)?;
        let mut params = vec![Val::I32(a as i32), Val::I32(b as i32)];
        params.extend(handles.iter().map(|h| Val::I32(h.as_raw() as i32)));

        let result_count = func.ty(&self.store).results().len();
        let mut results = vec![Val::I32(0); result_count];
        if let Err(e) = func.call(&mut self.store, &params, &mut results) {
            release_args(self.store.data_mut(), &handles);
            return Err(guest_error("closure invoker", e));
        }

        match results.first() {
            Some(Val::I32(raw)) => {
                let handle = Handle::from_raw(*raw as u32);
                if handle.is_none() {
                    Ok(HostValue::Undefined)
                } else {
                    self.store.data_mut().table.take(handle)
                }
            }
            _ => Ok(HostValue::Undefined),
        }
    }

    fn destroy(&mut self, dtor: u32, a: u32, b: u32) -> Result<()> {
        call_destructor(&mut self.store, &self.exports, dtor, a, b)
    }
}

/// Allocate one handle per argument. On failure the handles allocated so
/// far are released again.
pub(crate) fn alloc_args(
    state: &mut HostState,
    args: impl IntoIterator<Item = HostValue>,
) -> Result<Vec<Handle>> {
    let mut handles = Vec::new();
    for arg in args {
        match state.table.alloc(arg) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                release_args(state, &handles);
                return Err(e);
            }
        }
    }
    Ok(handles)
}

/// Release argument handles after a failed guest call.
///
/// The guest may already have dropped some of them before trapping; those
/// are stale and skipped.
pub(crate) fn release_args(state: &mut HostState, handles: &[Handle]) {
    for &handle in handles {
        if let Err(e) = state.table.drop(handle) {
            tracing::trace!(handle = handle.as_raw(), error = %e, "Argument already released");
        }
    }
}

/// Call `f` with a receiver and arguments.
///
/// The outer `Result` fails on marshaling errors and guest traps; the inner
/// [`Completion`] carries a thrown host exception. Guest closures ignore the
/// receiver. Calling a closure reentrantly or after the guest dropped it
/// throws instead of failing.
pub fn call_function(
    store: StoreContextMut<'_, HostState>,
    exports: &GuestExports,
    f: &HostValue,
    this: &HostValue,
    args: Vec<HostValue>,
) -> Result<Completion> {
    match f {
        HostValue::Function(HostFunction::Native(native)) => Ok(native.call(this, &args)),
        HostValue::Function(HostFunction::Guest(closure)) => {
            let mut host = StoreClosureHost::new(store, exports.clone(), args);
            match closure.call(&mut host) {
                Ok(value) => Ok(Ok(value)),
                Err(e @ (HostlinkError::ClosureRecursive | HostlinkError::ClosureDropped)) => {
                    Ok(Err(HostValue::error(e.to_string())))
                }
                Err(e) => Err(e),
            }
        }
        other => Ok(Err(HostValue::type_error(format!(
            "{} is not a function",
            other.debug_string()
        )))),
    }
}

/// Run every queued finalizer. Returns how many ran successfully.
///
/// Failures are logged and skipped. Finalizers queued while draining (for
/// example by a destructor releasing more values) run in the same pass.
pub fn drain_finalizers(mut store: StoreContextMut<'_, HostState>) -> usize {
    let Some(exports) = store.data().exports().cloned() else {
        return 0;
    };
    let bridge_id = store.data().bridge_id;

    let mut ran = 0;
    loop {
        let batch = store.data().finalizers.drain();
        if batch.is_empty() {
            break;
        }
        for finalizer in batch {
            match run_finalizer(&mut store, &exports, &finalizer) {
                Ok(()) => ran += 1,
                Err(e) => {
                    tracing::warn!(%bridge_id, ?finalizer, error = %e, "Finalizer failed");
                }
            }
        }
    }

    if ran > 0 {
        tracing::debug!(%bridge_id, count = ran, "Finalizers drained");
    }
    ran
}

fn run_finalizer(
    store: &mut StoreContextMut<'_, HostState>,
    exports: &GuestExports,
    finalizer: &Finalizer,
) -> Result<()> {
    match finalizer {
        Finalizer::Closure { dtor, a, b } => call_destructor(store, exports, *dtor, *a, *b),
        Finalizer::Owned { class, ptr } => match exports.class_free(&mut *store, class)? {
            Some(free) => free
                .call(&mut *store, (*ptr, 1))
                .map_err(|e| guest_error(class, e)),
            None => {
                tracing::warn!(class, ptr, "Guest has no free export for class, leaking object");
                Ok(())
            }
        },
    }
}

fn call_destructor(
    store: &mut StoreContextMut<'_, HostState>,
    exports: &GuestExports,
    dtor: u32,
    a: u32,
    b: u32,
) -> Result<()> {
    let func = table_func(store, exports, dtor)?;
    let typed = func
        .typed::<(u32, u32), ()>(&*store)
        .map_err(|e| HostlinkError::MissingExport {
            name: format!("{FUNCTION_TABLE}[{dtor}]"),
            cause: e.to_string(),
        })?;
    typed
        .call(&mut *store, (a, b))
        .map_err(|e| guest_error("closure destructor", e))
}

fn table_func(
    store: &mut StoreContextMut<'_, HostState>,
    exports: &GuestExports,
    index: u32,
) -> Result<Func> {
    let table = exports.function_table()?;
    let entry = table.get(&mut *store, u64::from(index));
    entry
        .as_ref()
        .and_then(|entry| entry.as_func().flatten().copied())
        .ok_or_else(|| HostlinkError::MissingExport {
            name: format!("{FUNCTION_TABLE}[{index}]"),
            cause: "no function at this index".to_string(),
        })
}
