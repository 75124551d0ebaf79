//! Logging and errors raised by the guest.

use super::{ImportTableBuilder, ShimResult, get, guest, infallible};
use crate::host::HostState;
use hostlink_core::abi::LogLevel;
use hostlink_core::error::{HostlinkError, Result};
use wasmtime::Caller;

pub(super) fn register(builder: &mut ImportTableBuilder<'_>) -> Result<()> {
    // log(level, ptr, len)
    builder.wrap(
        "log",
        |mut caller: Caller<'_, HostState>, level: u32, ptr: u32, len: u32| {
            let result = log(&mut caller, LogLevel::from(level), ptr, len);
            infallible("log", result)
        },
    )?;

    builder.wrap(
        "console_error",
        |caller: Caller<'_, HostState>, handle: u32| {
            let result = get(&caller, handle).map(|value| {
                tracing::error!(
                    target: "hostlink::guest",
                    bridge_id = %caller.data().bridge_id,
                    "{}",
                    value.debug_string()
                );
            });
            infallible("console_error", result.map_err(Into::into))
        },
    )?;

    // console_error_owned(ptr, len): logs, then frees the guest string
    builder.wrap(
        "console_error_owned",
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| {
            let result = console_error_owned(&mut caller, ptr, len);
            infallible("console_error_owned", result)
        },
    )?;

    // throw(ptr, len): traps the guest with the message
    builder.wrap(
        "throw",
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| {
            let result = throw(&mut caller, ptr, len);
            infallible("throw", result)
        },
    )?;

    Ok(())
}

fn log(caller: &mut Caller<'_, HostState>, level: LogLevel, ptr: u32, len: u32) -> ShimResult<()> {
    let message = guest(caller)?.read_string(ptr, len)?;
    let bridge_id = caller.data().bridge_id;
    match level {
        LogLevel::Trace => tracing::trace!(target: "hostlink::guest", %bridge_id, "{message}"),
        LogLevel::Debug => tracing::debug!(target: "hostlink::guest", %bridge_id, "{message}"),
        LogLevel::Info => tracing::info!(target: "hostlink::guest", %bridge_id, "{message}"),
        LogLevel::Warn => tracing::warn!(target: "hostlink::guest", %bridge_id, "{message}"),
        LogLevel::Error => tracing::error!(target: "hostlink::guest", %bridge_id, "{message}"),
    }
    Ok(())
}

fn console_error_owned(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> ShimResult<()> {
    let bridge_id = caller.data().bridge_id;
    let mut memory = guest(caller)?;
    let message = memory.read_string(ptr, len)?;
    tracing::error!(target: "hostlink::guest", %bridge_id, "{message}");
    memory.free(ptr, len, 1)?;
    Ok(())
}

fn throw(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> ShimResult<()> {
    let message = guest(caller)?.read_string(ptr, len)?;
    Err(HostlinkError::HostException { message }.into())
}
