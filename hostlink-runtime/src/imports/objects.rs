//! Globals, objects, arrays, property access and calls.
//!
//! Handles passed as arguments are borrowed; the guest keeps ownership.
//! The one exception is the argument array of `method_call`, whose handles
//! are consumed.

use super::{
    ImportTableBuilder, ShimError, ShimResult, alloc, alloc_optional, completed, exports,
    fallible, get, guest, infallible,
};
use crate::closure::call_function;
use crate::host::HostState;
use hostlink_core::abi::{ScrollBehavior, ScrollRestoration, encode_bool};
use hostlink_core::error::{HostlinkError, Result};
use hostlink_core::value::{ArrayRef, ErrorValue, HostValue, ObjectRef};
use std::sync::Arc;
use wasmtime::{AsContextMut, Caller};

pub(super) fn register(builder: &mut ImportTableBuilder<'_>) -> Result<()> {
    // global(ptr, len) -> handle; throws a ReferenceError for unknown names
    builder.wrap(
        "global",
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| {
            let result = global(&mut caller, ptr, len);
            fallible(&mut caller, "global", result)
        },
    )?;

    builder.wrap("object_new", |mut caller: Caller<'_, HostState>| {
        let result = alloc(&mut caller, ObjectRef::plain().into());
        infallible("object_new", result.map_err(Into::into))
    })?;

    builder.wrap("array_new", |mut caller: Caller<'_, HostState>| {
        let result = alloc(&mut caller, ArrayRef::new().into());
        infallible("array_new", result.map_err(Into::into))
    })?;

    // array_push(array, value) -> new length
    builder.wrap(
        "array_push",
        |caller: Caller<'_, HostState>, array: u32, value: u32| {
            let result = array_push(&caller, array, value);
            infallible("array_push", result)
        },
    )?;

    builder.wrap(
        "array_length",
        |caller: Caller<'_, HostState>, array: u32| {
            let result = expect_array(&caller, array).map(|arr| arr.len() as u32);
            infallible("array_length", result)
        },
    )?;

    // get_index(object, index) -> handle, 0 for a nullish receiver
    builder.wrap(
        "get_index",
        |mut caller: Caller<'_, HostState>, object: u32, index: u32| {
            let result = get_index(&mut caller, object, index);
            infallible("get_index", result)
        },
    )?;

    builder.wrap(
        "reflect_get",
        |mut caller: Caller<'_, HostState>, object: u32, key: u32| {
            let result = reflect_get(&mut caller, object, key);
            fallible(&mut caller, "reflect_get", result)
        },
    )?;

    builder.wrap(
        "reflect_set",
        |mut caller: Caller<'_, HostState>, object: u32, key: u32, value: u32| {
            let result = reflect_set(&caller, object, key, value);
            fallible(&mut caller, "reflect_set", result)
        },
    )?;

    // object_entries(object) -> handle of an array of [key, value] arrays
    builder.wrap(
        "object_entries",
        |mut caller: Caller<'_, HostState>, object: u32| {
            let result = object_entries(&mut caller, object);
            infallible("object_entries", result)
        },
    )?;

    // instance_of(value, class_ptr, class_len) -> 0 | 1
    builder.wrap(
        "instance_of",
        |mut caller: Caller<'_, HostState>, value: u32, ptr: u32, len: u32| {
            let result = instance_of(&mut caller, value, ptr, len);
            infallible("instance_of", result)
        },
    )?;

    // prop_string(out, object, name_ptr, name_len): writes (ptr, len), (0, 0) if not a string
    builder.wrap(
        "prop_string",
        |mut caller: Caller<'_, HostState>, out: u32, object: u32, ptr: u32, len: u32| {
            let result = prop_string(&mut caller, out, object, ptr, len);
            infallible("prop_string", result)
        },
    )?;

    // prop_number(object, name_ptr, name_len) -> f64, NaN if not a number
    builder.wrap(
        "prop_number",
        |mut caller: Caller<'_, HostState>, object: u32, ptr: u32, len: u32| {
            let result = property(&mut caller, object, ptr, len)
                .map(|v| v.as_f64().unwrap_or(f64::NAN));
            infallible("prop_number", result)
        },
    )?;

    builder.wrap(
        "prop_bool",
        |mut caller: Caller<'_, HostState>, object: u32, ptr: u32, len: u32| {
            let result = property(&mut caller, object, ptr, len).map(|v| encode_bool(v.as_bool()));
            infallible("prop_bool", result)
        },
    )?;

    // prop_ref(object, name_ptr, name_len) -> handle, 0 if undefined
    builder.wrap(
        "prop_ref",
        |mut caller: Caller<'_, HostState>, object: u32, ptr: u32, len: u32| {
            let result = prop_ref(&mut caller, object, ptr, len);
            infallible("prop_ref", result)
        },
    )?;

    // method_call(object, name_ptr, name_len, args_ptr, args_len) -> handle
    builder.wrap(
        "method_call",
        |mut caller: Caller<'_, HostState>,
         object: u32,
         name_ptr: u32,
         name_len: u32,
         args_ptr: u32,
         args_len: u32| {
            let result = method_call(&mut caller, object, name_ptr, name_len, args_ptr, args_len);
            fallible(&mut caller, "method_call", result)
        },
    )?;

    builder.wrap(
        "call0",
        |mut caller: Caller<'_, HostState>, func: u32, this: u32| {
            let result = call(&mut caller, func, this, &[]);
            fallible(&mut caller, "call0", result)
        },
    )?;

    builder.wrap(
        "call1",
        |mut caller: Caller<'_, HostState>, func: u32, this: u32, arg: u32| {
            let result = call(&mut caller, func, this, &[arg]);
            fallible(&mut caller, "call1", result)
        },
    )?;

    // scroll_to(target, left, top, behavior)
    builder.wrap(
        "scroll_to",
        |mut caller: Caller<'_, HostState>, target: u32, left: f64, top: f64, behavior: u32| {
            let result = scroll_to(&mut caller, target, left, top, behavior);
            fallible(&mut caller, "scroll_to", result)
        },
    )?;

    // set_scroll_restoration(history, value)
    builder.wrap(
        "set_scroll_restoration",
        |mut caller: Caller<'_, HostState>, history: u32, value: u32| {
            let result = set_scroll_restoration(&caller, history, value);
            fallible(&mut caller, "set_scroll_restoration", result)
        },
    )?;

    Ok(())
}

fn global(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> ShimResult<u32> {
    let name = guest(caller)?.read_string(ptr, len)?;
    let found = caller.data().env.lookup_global(&name);
    match found {
        Some(value) => Ok(alloc(caller, value)?),
        None => Err(ShimError::Throw(HostValue::Error(Arc::new(ErrorValue::new(
            "ReferenceError",
            format!("{name} is not defined"),
        ))))),
    }
}

fn expect_array(caller: &Caller<'_, HostState>, handle: u32) -> ShimResult<ArrayRef> {
    match get(caller, handle)? {
        HostValue::Array(arr) => Ok(arr),
        other => Err(HostlinkError::TypeMismatch {
            handle: handle.into(),
            expected: "array",
            found: other.kind(),
        }
        .into()),
    }
}

fn array_push(caller: &Caller<'_, HostState>, array: u32, value: u32) -> ShimResult<u32> {
    let arr = expect_array(caller, array)?;
    let value = get(caller, value)?;
    Ok(arr.push(value) as u32)
}

fn get_index(caller: &mut Caller<'_, HostState>, object: u32, index: u32) -> ShimResult<u32> {
    let object = get(caller, object)?;
    if object.is_nullish() {
        return Ok(0);
    }
    let value = object.get(&index.to_string());
    Ok(alloc(caller, value)?)
}

fn reflect_target(caller: &Caller<'_, HostState>, object: u32, what: &str) -> ShimResult<HostValue> {
    let target = get(caller, object)?;
    if target.is_object() {
        Ok(target)
    } else {
        Err(ShimError::Throw(HostValue::type_error(format!(
            "Reflect.{what} called on non-object {}",
            target.debug_string()
        ))))
    }
}

fn reflect_get(caller: &mut Caller<'_, HostState>, object: u32, key: u32) -> ShimResult<u32> {
    let target = reflect_target(caller, object, "get")?;
    let key = get(caller, key)?.to_display_string();
    Ok(alloc(caller, target.get(&key))?)
}

fn reflect_set(
    caller: &Caller<'_, HostState>,
    object: u32,
    key: u32,
    value: u32,
) -> ShimResult<u32> {
    let target = reflect_target(caller, object, "set")?;
    let key = get(caller, key)?.to_display_string();
    let value = get(caller, value)?;
    Ok(u32::from(target.set(&key, value)))
}

fn object_entries(caller: &mut Caller<'_, HostState>, object: u32) -> ShimResult<u32> {
    let entries = get(caller, object)?
        .entries()
        .into_iter()
        .map(|(key, value)| HostValue::from(ArrayRef::from_vec(vec![HostValue::string(key), value])))
        .collect::<Vec<_>>();
    Ok(alloc(caller, ArrayRef::from_vec(entries).into())?)
}

fn instance_of(caller: &mut Caller<'_, HostState>, value: u32, ptr: u32, len: u32) -> ShimResult<u32> {
    let class = guest(caller)?.read_string(ptr, len)?;
    Ok(u32::from(get(caller, value)?.instance_of(&class)))
}

fn property(caller: &mut Caller<'_, HostState>, object: u32, ptr: u32, len: u32) -> ShimResult<HostValue> {
    let name = guest(caller)?.read_string(ptr, len)?;
    Ok(get(caller, object)?.get(&name))
}

fn prop_string(
    caller: &mut Caller<'_, HostState>,
    out: u32,
    object: u32,
    ptr: u32,
    len: u32,
) -> ShimResult<()> {
    let value = property(caller, object, ptr, len)?;
    guest(caller)?.write_string_out(out, value.as_str())?;
    Ok(())
}

fn prop_ref(caller: &mut Caller<'_, HostState>, object: u32, ptr: u32, len: u32) -> ShimResult<u32> {
    let value = property(caller, object, ptr, len)?;
    Ok(alloc_optional(caller, value)?)
}

/// Call `f` and hand the result to the guest.
fn invoke(
    caller: &mut Caller<'_, HostState>,
    f: &HostValue,
    this: &HostValue,
    args: Vec<HostValue>,
) -> ShimResult<u32> {
    let exports = exports(caller)?;
    let completion = call_function(caller.as_context_mut(), &exports, f, this, args)?;
    let value = completed(completion)?;
    Ok(alloc(caller, value)?)
}

fn method_call(
    caller: &mut Caller<'_, HostState>,
    object: u32,
    name_ptr: u32,
    name_len: u32,
    args_ptr: u32,
    args_len: u32,
) -> ShimResult<u32> {
    let (name, args) = {
        let mut memory = guest(caller)?;
        let name = memory.read_string(name_ptr, name_len)?;
        (name, memory.get_array(args_ptr, args_len)?)
    };
    let this = get(caller, object)?;
    let method = this.get(&name);
    if !method.is_function() {
        return Err(ShimError::Throw(HostValue::type_error(format!(
            "{}.{name} is not a function",
            this.debug_string()
        ))));
    }
    tracing::trace!(method = %name, args = args.len(), "Calling host method");
    invoke(caller, &method, &this, args)
}

fn call(caller: &mut Caller<'_, HostState>, func: u32, this: u32, args: &[u32]) -> ShimResult<u32> {
    let f = get(caller, func)?;
    let this = get(caller, this)?;
    let args = args
        .iter()
        .map(|&arg| get(caller, arg))
        .collect::<Result<Vec<_>>>()?;
    invoke(caller, &f, &this, args)
}

fn scroll_to(
    caller: &mut Caller<'_, HostState>,
    target: u32,
    left: f64,
    top: f64,
    behavior: u32,
) -> ShimResult<()> {
    let behavior = ScrollBehavior::try_from(behavior)
        .map_err(|e| ShimError::Throw(HostValue::type_error(e.to_string())))?;
    let target = get(caller, target)?;
    let scroll = target.get("scrollTo");
    if !scroll.is_function() {
        return Err(ShimError::Throw(HostValue::type_error(format!(
            "{} does not support scrollTo",
            target.debug_string()
        ))));
    }

    let options = ObjectRef::plain()
        .with("left", left)
        .with("top", top)
        .with("behavior", behavior.as_str());
    let exports = exports(caller)?;
    let completion = call_function(
        caller.as_context_mut(),
        &exports,
        &scroll,
        &target,
        vec![options.into()],
    )?;
    completed(completion)?;
    Ok(())
}

fn set_scroll_restoration(caller: &Caller<'_, HostState>, history: u32, value: u32) -> ShimResult<()> {
    let value = ScrollRestoration::try_from(value)
        .map_err(|e| ShimError::Throw(HostValue::type_error(e.to_string())))?;
    let history = get(caller, history)?;
    if !history.set("scrollRestoration", HostValue::string(value.as_str())) {
        return Err(ShimError::Throw(HostValue::type_error(format!(
            "cannot set scrollRestoration on {}",
            history.debug_string()
        ))));
    }
    Ok(())
}
