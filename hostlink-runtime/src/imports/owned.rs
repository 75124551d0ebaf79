//! Guest objects owned through a host wrapper.

use super::{ImportTableBuilder, ShimResult, alloc, guest, infallible};
use crate::host::HostState;
use hostlink_core::error::Result;
use hostlink_core::owned::OwnedHandle;
use hostlink_core::value::HostValue;
use std::sync::Arc;
use wasmtime::Caller;

pub(super) fn register(builder: &mut ImportTableBuilder<'_>) -> Result<()> {
    // owned_wrap(class_ptr, class_len, ptr) -> handle
    //
    // The host now owns `ptr`. It is released through
    // `__hostlink_<class>_free` when the embedder frees the wrapper or when
    // the last reference to it is dropped.
    builder.wrap(
        "owned_wrap",
        |mut caller: Caller<'_, HostState>, class_ptr: u32, class_len: u32, ptr: u32| {
            let result = owned_wrap(&mut caller, class_ptr, class_len, ptr);
            infallible("owned_wrap", result)
        },
    )?;

    Ok(())
}

fn owned_wrap(
    caller: &mut Caller<'_, HostState>,
    class_ptr: u32,
    class_len: u32,
    ptr: u32,
) -> ShimResult<u32> {
    let class = guest(caller)?.read_string(class_ptr, class_len)?;
    let finalizers = caller.data().finalizers.clone();
    let owned = OwnedHandle::wrap(class, ptr, finalizers);
    Ok(alloc(caller, HostValue::Owned(Arc::new(owned)))?)
}
