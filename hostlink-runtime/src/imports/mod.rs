//! Host imports provided to the guest.
//!
//! Every import is a shim: it decodes handles and `(ptr, len)` strings,
//! calls the host operation and encodes the result as a handle, a number or
//! an out-slot write.
//!
//! Shims come in two kinds:
//!
//! - **fallible** shims catch a host exception, store it in the reference
//!   table and return the zero value of their result type. The guest learns
//!   about the exception through `__hostlink_exn_store(handle)` if it exports
//!   one, or by calling `exn_take()` otherwise.
//! - **infallible** shims trap the guest on any failure.
//!
//! Marshaling failures (stale handles, out-of-bounds pointers, invalid
//! UTF-8) always trap, in both kinds.

mod closures;
mod diagnostics;
mod objects;
mod owned;
mod refs;
mod services;
mod values;

use crate::exports::GuestExports;
use crate::host::HostState;
use crate::memory::GuestMemory;
use hostlink_core::error::{HostlinkError, Result};
use hostlink_core::value::HostValue;
use hostlink_core::Handle;
use wasmtime::{AsContextMut, Caller, Engine, IntoFunc, Linker};

/// Build a linker with every host import registered under `module`.
pub fn build_linker(engine: &Engine, module: &str) -> Result<Linker<HostState>> {
    let mut linker = Linker::new(engine);
    let mut builder = ImportTableBuilder::new(&mut linker, module);

    values::register(&mut builder)?;
    refs::register(&mut builder)?;
    objects::register(&mut builder)?;
    closures::register(&mut builder)?;
    owned::register(&mut builder)?;
    services::register(&mut builder)?;
    diagnostics::register(&mut builder)?;

    tracing::debug!(module, imports = builder.count, "Host imports registered");
    Ok(linker)
}

/// Registers shims under one import namespace.
pub struct ImportTableBuilder<'l> {
    linker: &'l mut Linker<HostState>,
    module: &'l str,
    count: usize,
}

impl<'l> ImportTableBuilder<'l> {
    /// Register into `linker` under `module`.
    pub fn new(linker: &'l mut Linker<HostState>, module: &'l str) -> Self {
        Self {
            linker,
            module,
            count: 0,
        }
    }

    /// Register one import.
    pub fn wrap<Params, Args>(
        &mut self,
        name: &str,
        func: impl IntoFunc<HostState, Params, Args>,
    ) -> Result<&mut Self> {
        self.linker
            .func_wrap(self.module, name, func)
            .map_err(|e| HostlinkError::HostFunction {
                function: name.to_string(),
                cause: e.to_string(),
            })?;
        self.count += 1;
        Ok(self)
    }

    /// Number of imports registered so far.
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Failure of a shim body.
pub(crate) enum ShimError {
    /// A host exception, delivered to the guest by fallible shims.
    Throw(HostValue),
    /// A marshaling failure; always traps.
    Fatal(HostlinkError),
}

impl From<HostlinkError> for ShimError {
    fn from(err: HostlinkError) -> Self {
        Self::Fatal(err)
    }
}

pub(crate) type ShimResult<T> = std::result::Result<T, ShimError>;

/// Finish a fallible shim: deliver a thrown value and return zero.
pub(crate) fn fallible<T: Default>(
    caller: &mut Caller<'_, HostState>,
    import: &'static str,
    result: ShimResult<T>,
) -> wasmtime::Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(ShimError::Throw(exception)) => {
            raise(caller, import, exception).map_err(|e| trap(import, e))?;
            Ok(T::default())
        }
        Err(ShimError::Fatal(err)) => Err(trap(import, err)),
    }
}

/// Finish an infallible shim: every failure traps.
pub(crate) fn infallible<T>(import: &'static str, result: ShimResult<T>) -> wasmtime::Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(ShimError::Throw(exception)) => Err(trap(
            import,
            HostlinkError::HostException {
                message: exception.debug_string(),
            },
        )),
        Err(ShimError::Fatal(err)) => Err(trap(import, err)),
    }
}

fn trap(import: &'static str, err: HostlinkError) -> wasmtime::Error {
    wasmtime::Error::new(err).context(format!("in host import '{import}'"))
}

/// Hand an exception to the guest.
fn raise(
    caller: &mut Caller<'_, HostState>,
    import: &'static str,
    exception: HostValue,
) -> Result<()> {
    let state = caller.data_mut();
    tracing::debug!(
        bridge_id = %state.bridge_id,
        import,
        exception = %exception.debug_string(),
        "Host exception raised"
    );

    let exn_store = state.exports().and_then(|exports| exports.exn_store.clone());
    match exn_store {
        Some(exn_store) => {
            let handle = state.table.alloc(exception)?;
            exn_store
                .call(caller.as_context_mut(), handle.as_raw())
                .map_err(|e| crate::exports::guest_error(crate::exports::EXN_STORE, e))
        }
        None => state.set_pending_exception(exception).map(drop),
    }
}

/// Guest memory for a shim that reads or writes linear memory.
pub(crate) fn guest<'a>(caller: &'a mut Caller<'_, HostState>) -> Result<GuestMemory<'a>> {
    GuestMemory::attached(caller.as_context_mut())
}

/// Exports, for shims that call back into the guest.
pub(crate) fn exports(caller: &Caller<'_, HostState>) -> Result<GuestExports> {
    caller
        .data()
        .exports()
        .cloned()
        .ok_or_else(|| HostlinkError::MissingExport {
            name: crate::exports::MEMORY.to_string(),
            cause: "host import called before instantiation finished".to_string(),
        })
}

/// Resolve a handle passed by the guest.
pub(crate) fn get(caller: &Caller<'_, HostState>, raw: u32) -> Result<HostValue> {
    caller.data().table.get(Handle::from_raw(raw))
}

/// Allocate a handle for the guest.
pub(crate) fn alloc(caller: &mut Caller<'_, HostState>, value: HostValue) -> Result<u32> {
    caller
        .data_mut()
        .table
        .alloc(value)
        .map(|handle| handle.as_raw())
}

/// Allocate a handle, using `0` for `undefined`.
pub(crate) fn alloc_optional(caller: &mut Caller<'_, HostState>, value: HostValue) -> Result<u32> {
    if value.is_undefined() {
        Ok(Handle::NONE.as_raw())
    } else {
        alloc(caller, value)
    }
}

/// Unwrap a completion, turning a thrown value into [`ShimError::Throw`].
pub(crate) fn completed(completion: hostlink_core::Completion) -> ShimResult<HostValue> {
    completion.map_err(ShimError::Throw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_import_registers() {
        let engine = Engine::default();
        let mut linker = Linker::new(&engine);
        let mut builder = ImportTableBuilder::new(&mut linker, "hostlink");
        values::register(&mut builder).unwrap();
        refs::register(&mut builder).unwrap();
        objects::register(&mut builder).unwrap();
        closures::register(&mut builder).unwrap();
        owned::register(&mut builder).unwrap();
        services::register(&mut builder).unwrap();
        diagnostics::register(&mut builder).unwrap();
        assert_eq!(builder.count(), 58);
    }

    #[test]
    fn duplicate_import_is_reported() {
        let engine = Engine::default();
        let mut linker = Linker::new(&engine);
        let mut builder = ImportTableBuilder::new(&mut linker, "hostlink");
        builder
            .wrap("object_new", |_: Caller<'_, HostState>| 0u32)
            .unwrap();
        let err = builder
            .wrap("object_new", |_: Caller<'_, HostState>| 0u32)
            .err()
            .unwrap();
        assert!(matches!(err, HostlinkError::HostFunction { ref function, .. } if function == "object_new"));
    }
}
