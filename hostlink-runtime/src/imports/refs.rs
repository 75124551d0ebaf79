//! Handle lifetime management.

use super::{ImportTableBuilder, ShimResult, guest, infallible};
use crate::host::HostState;
use hostlink_core::error::Result;
use hostlink_core::Handle;
use wasmtime::Caller;

pub(super) fn register(builder: &mut ImportTableBuilder<'_>) -> Result<()> {
    // The table exists from store creation; this only marks the guest as ready.
    builder.wrap("init_externref_table", |caller: Caller<'_, HostState>| {
        let state = caller.data();
        tracing::debug!(
            bridge_id = %state.bridge_id,
            capacity = state.table.capacity(),
            "Guest initialized its reference table"
        );
    })?;

    builder.wrap(
        "ref_clone",
        |mut caller: Caller<'_, HostState>, handle: u32| {
            let result = caller
                .data_mut()
                .table
                .clone_handle(Handle::from_raw(handle))
                .map(|h| h.as_raw());
            infallible("ref_clone", result.map_err(Into::into))
        },
    )?;

    builder.wrap(
        "ref_drop",
        |mut caller: Caller<'_, HostState>, handle: u32| {
            let result = caller.data_mut().table.drop(Handle::from_raw(handle));
            infallible("ref_drop", result.map_err(Into::into))
        },
    )?;

    // ref_drop_slice(ptr, len): drop every handle in a handle array
    builder.wrap(
        "ref_drop_slice",
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| {
            let result = drop_slice(&mut caller, ptr, len);
            infallible("ref_drop_slice", result)
        },
    )?;

    // exn_take() -> handle of the pending exception, 0 if none
    builder.wrap("exn_take", |mut caller: Caller<'_, HostState>| {
        caller
            .data_mut()
            .take_pending_exception()
            .unwrap_or(Handle::NONE)
            .as_raw()
    })?;

    Ok(())
}

fn drop_slice(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> ShimResult<()> {
    let released = guest(caller)?.get_array(ptr, len)?;
    tracing::trace!(count = released.len(), "Dropped handle slice");
    Ok(())
}
