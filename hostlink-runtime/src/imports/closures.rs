//! Guest closures handed to the host.

use super::{ImportTableBuilder, ShimResult, alloc, infallible};
use crate::host::HostState;
use hostlink_core::closure::GuestClosure;
use hostlink_core::error::{HostlinkError, Result};
use hostlink_core::value::{HostFunction, HostValue};
use hostlink_core::Handle;
use wasmtime::Caller;

pub(super) fn register(builder: &mut ImportTableBuilder<'_>) -> Result<()> {
    // closure_new(a, b, dtor, invoker) -> handle of a callable value
    builder.wrap(
        "closure_new",
        |mut caller: Caller<'_, HostState>, a: u32, b: u32, dtor: u32, invoker: u32| {
            let result = closure_new(&mut caller, a, b, dtor, invoker);
            infallible("closure_new", result)
        },
    )?;

    // cb_drop(handle) -> 1 if the guest must free the closure state now
    builder.wrap(
        "cb_drop",
        |mut caller: Caller<'_, HostState>, handle: u32| {
            let result = cb_drop(&mut caller, handle);
            infallible("cb_drop", result)
        },
    )?;

    Ok(())
}

fn closure_new(
    caller: &mut Caller<'_, HostState>,
    a: u32,
    b: u32,
    dtor: u32,
    invoker: u32,
) -> ShimResult<u32> {
    let finalizers = caller.data().finalizers.clone();
    let closure = GuestClosure::new(a, b, dtor, invoker, finalizers);
    tracing::trace!(a, b, dtor, invoker, "Guest closure created");
    Ok(alloc(caller, closure.into())?)
}

/// Release the guest owner's reference and the handle itself.
fn cb_drop(caller: &mut Caller<'_, HostState>, handle: u32) -> ShimResult<u32> {
    let handle = Handle::from_raw(handle);
    let table = &mut caller.data_mut().table;
    let closure = match table.get(handle)? {
        HostValue::Function(HostFunction::Guest(closure)) => closure,
        other => {
            return Err(HostlinkError::TypeMismatch {
                handle,
                expected: "guest closure",
                found: other.kind(),
            }
            .into());
        }
    };
    table.drop(handle)?;
    Ok(u32::from(closure.drop_ref()))
}
