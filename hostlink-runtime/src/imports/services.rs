//! Forwarding to collaborator services.
//!
//! A service error or a missing service is thrown to the guest.

use super::{ImportTableBuilder, ShimError, ShimResult, alloc, exports, fallible, get, guest};
use crate::host::HostState;
use crate::services::ServiceResult;
use hostlink_core::error::Result;
use hostlink_core::value::HostValue;
use wasmtime::Caller;

pub(super) fn register(builder: &mut ImportTableBuilder<'_>) -> Result<()> {
    // interp_initialize(root, handlers)
    builder.wrap(
        "interp_initialize",
        |mut caller: Caller<'_, HostState>, root: u32, handlers: u32| {
            let result = interp_initialize(&caller, root, handlers);
            fallible(&mut caller, "interp_initialize", result)
        },
    )?;

    // interp_update_memory(): the patcher reads its edits from guest memory
    builder.wrap(
        "interp_update_memory",
        |mut caller: Caller<'_, HostState>| {
            let result = interp_update_memory(&mut caller);
            fallible(&mut caller, "interp_update_memory", result)
        },
    )?;

    builder.wrap(
        "interp_get_node",
        |mut caller: Caller<'_, HostState>, id: u32| {
            let result = interp_get_node(&mut caller, id);
            fallible(&mut caller, "interp_get_node", result)
        },
    )?;

    builder.wrap(
        "channel_send",
        |mut caller: Caller<'_, HostState>, message: u32| {
            let result = channel_send(&caller, message);
            fallible(&mut caller, "channel_send", result)
        },
    )?;

    // channel_recv() -> handle, undefined when nothing is waiting
    builder.wrap("channel_recv", |mut caller: Caller<'_, HostState>| {
        let result = channel_recv(&mut caller);
        fallible(&mut caller, "channel_recv", result)
    })?;

    // select_data(out, element): writes (ptr, len) of a handle array
    builder.wrap(
        "select_data",
        |mut caller: Caller<'_, HostState>, out: u32, element: u32| {
            let result = select_data(&mut caller, out, element);
            fallible(&mut caller, "select_data", result)
        },
    )?;

    Ok(())
}

fn thrown<T>(result: ServiceResult<T>) -> ShimResult<T> {
    result.map_err(ShimError::Throw)
}

fn interp_initialize(caller: &Caller<'_, HostState>, root: u32, handlers: u32) -> ShimResult<()> {
    let root = get(caller, root)?;
    let handlers = get(caller, handlers)?;
    let patcher = thrown(caller.data().env.services.patcher())?;
    thrown(patcher.initialize(root, handlers))
}

fn interp_update_memory(caller: &mut Caller<'_, HostState>) -> ShimResult<()> {
    let patcher = thrown(caller.data().env.services.patcher())?.clone();
    let memory = exports(caller)?.memory;
    thrown(patcher.update_memory(memory.data(&*caller)))
}

fn interp_get_node(caller: &mut Caller<'_, HostState>, id: u32) -> ShimResult<u32> {
    let patcher = thrown(caller.data().env.services.patcher())?.clone();
    let node = thrown(patcher.get_node(id))?;
    Ok(alloc(caller, node)?)
}

fn channel_send(caller: &Caller<'_, HostState>, message: u32) -> ShimResult<()> {
    let message = get(caller, message)?;
    let channel = thrown(caller.data().env.services.channel())?;
    thrown(channel.send(message))
}

fn channel_recv(caller: &mut Caller<'_, HostState>) -> ShimResult<u32> {
    let channel = thrown(caller.data().env.services.channel())?.clone();
    let message: HostValue = thrown(channel.recv())?;
    Ok(alloc(caller, message)?)
}

fn select_data(caller: &mut Caller<'_, HostState>, out: u32, element: u32) -> ShimResult<()> {
    let element = get(caller, element)?;
    let selection = thrown(caller.data().env.services.selection())?.clone();
    let values = thrown(selection.select_data(&element))?;
    tracing::trace!(count = values.len(), "Selection read");

    let mut memory = guest(caller)?;
    let slice = memory.set_array(values)?;
    memory.write_slice_out(out, slice)?;
    Ok(())
}

