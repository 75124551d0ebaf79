//! Primitive values, type tests and comparisons.

use super::{ImportTableBuilder, ShimError, ShimResult, alloc, fallible, get, guest, infallible};
use crate::host::HostState;
use hostlink_core::abi::encode_bool;
use hostlink_core::error::Result;
use hostlink_core::value::HostValue;
use wasmtime::Caller;

pub(super) fn register(builder: &mut ImportTableBuilder<'_>) -> Result<()> {
    // string_new(ptr, len) -> handle
    builder.wrap(
        "string_new",
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| {
            let result = string_new(&mut caller, ptr, len);
            infallible("string_new", result)
        },
    )?;

    // string_get(out, handle): writes (ptr, len), (0, 0) if not a string
    builder.wrap(
        "string_get",
        |mut caller: Caller<'_, HostState>, out: u32, handle: u32| {
            let result = string_get(&mut caller, out, handle);
            infallible("string_get", result)
        },
    )?;

    builder.wrap(
        "number_new",
        |mut caller: Caller<'_, HostState>, n: f64| {
            infallible("number_new", alloc(&mut caller, HostValue::Number(n)).map_err(Into::into))
        },
    )?;

    // number_get(out, handle): writes (is_some, f64)
    builder.wrap(
        "number_get",
        |mut caller: Caller<'_, HostState>, out: u32, handle: u32| {
            let result = number_get(&mut caller, out, handle);
            infallible("number_get", result)
        },
    )?;

    // boolean_get(handle) -> 0 | 1 | 2 (not a boolean)
    builder.wrap(
        "boolean_get",
        |caller: Caller<'_, HostState>, handle: u32| {
            let result = get(&caller, handle).map(|v| encode_bool(v.as_bool()));
            infallible("boolean_get", result.map_err(Into::into))
        },
    )?;

    builder.wrap(
        "bigint_from_i64",
        |mut caller: Caller<'_, HostState>, n: i64| {
            let result = alloc(&mut caller, HostValue::BigInt(i128::from(n)));
            infallible("bigint_from_i64", result.map_err(Into::into))
        },
    )?;

    // The guest passes u64 values in an i64 slot.
    builder.wrap(
        "bigint_from_u64",
        |mut caller: Caller<'_, HostState>, n: i64| {
            let result = alloc(&mut caller, HostValue::BigInt(i128::from(n as u64)));
            infallible("bigint_from_u64", result.map_err(Into::into))
        },
    )?;

    // bigint_get_as_i64(out, handle): writes (is_some, i64), truncated to 64 bits
    builder.wrap(
        "bigint_get_as_i64",
        |mut caller: Caller<'_, HostState>, out: u32, handle: u32| {
            let result = bigint_get_as_i64(&mut caller, out, handle);
            infallible("bigint_get_as_i64", result)
        },
    )?;

    register_predicate(builder, "is_undefined", HostValue::is_undefined)?;
    register_predicate(builder, "is_null", HostValue::is_null)?;
    register_predicate(builder, "is_object", HostValue::is_object)?;
    register_predicate(builder, "is_function", HostValue::is_function)?;
    register_predicate(builder, "is_string", |v| matches!(v, HostValue::String(_)))?;
    register_predicate(builder, "is_bigint", |v| matches!(v, HostValue::BigInt(_)))?;
    register_predicate(builder, "is_array", |v| matches!(v, HostValue::Array(_)))?;

    builder.wrap(
        "jsval_eq",
        |caller: Caller<'_, HostState>, a: u32, b: u32| {
            let result = compare(&caller, a, b, HostValue::strict_eq);
            infallible("jsval_eq", result)
        },
    )?;

    builder.wrap(
        "jsval_loose_eq",
        |caller: Caller<'_, HostState>, a: u32, b: u32| {
            let result = compare(&caller, a, b, HostValue::loose_eq);
            infallible("jsval_loose_eq", result)
        },
    )?;

    // in(key, object) -> 0 | 1; throws a TypeError on primitives
    builder.wrap(
        "in",
        |mut caller: Caller<'_, HostState>, key: u32, object: u32| {
            let result = has_property(&caller, key, object);
            fallible(&mut caller, "in", result)
        },
    )?;

    builder.wrap(
        "debug_string",
        |mut caller: Caller<'_, HostState>, out: u32, handle: u32| {
            let result = debug_string(&mut caller, out, handle);
            infallible("debug_string", result)
        },
    )?;

    // error_new(ptr, len) -> handle of a new Error with that message
    builder.wrap(
        "error_new",
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| {
            let result = error_new(&mut caller, ptr, len);
            infallible("error_new", result)
        },
    )?;

    builder.wrap(
        "typeof",
        |mut caller: Caller<'_, HostState>, handle: u32| {
            let result = type_of(&mut caller, handle);
            infallible("typeof", result)
        },
    )?;

    Ok(())
}

fn register_predicate(
    builder: &mut ImportTableBuilder<'_>,
    name: &'static str,
    predicate: fn(&HostValue) -> bool,
) -> Result<()> {
    builder.wrap(name, move |caller: Caller<'_, HostState>, handle: u32| {
        let result = get(&caller, handle).map(|v| u32::from(predicate(&v)));
        infallible(name, result.map_err(Into::into))
    })?;
    Ok(())
}

fn string_new(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> ShimResult<u32> {
    let text = guest(caller)?.read_string(ptr, len)?;
    Ok(alloc(caller, HostValue::string(text))?)
}

fn string_get(caller: &mut Caller<'_, HostState>, out: u32, handle: u32) -> ShimResult<()> {
    let value = get(caller, handle)?;
    guest(caller)?.write_string_out(out, value.as_str())?;
    Ok(())
}

fn number_get(caller: &mut Caller<'_, HostState>, out: u32, handle: u32) -> ShimResult<()> {
    let value = get(caller, handle)?;
    guest(caller)?.write_f64_out(out, value.as_f64())?;
    Ok(())
}

fn bigint_get_as_i64(caller: &mut Caller<'_, HostState>, out: u32, handle: u32) -> ShimResult<()> {
    let value = get(caller, handle)?;
    guest(caller)?.write_i64_out(out, value.as_bigint().map(|n| n as i64))?;
    Ok(())
}

fn compare(
    caller: &Caller<'_, HostState>,
    a: u32,
    b: u32,
    eq: fn(&HostValue, &HostValue) -> bool,
) -> ShimResult<u32> {
    let a = get(caller, a)?;
    let b = get(caller, b)?;
    Ok(u32::from(eq(&a, &b)))
}

fn has_property(caller: &Caller<'_, HostState>, key: u32, object: u32) -> ShimResult<u32> {
    let key = get(caller, key)?.to_display_string();
    let object = get(caller, object)?;
    match object.has(&key) {
        Ok(found) => Ok(u32::from(found.as_bool() == Some(true))),
        Err(thrown) => Err(ShimError::Throw(thrown)),
    }
}

fn debug_string(caller: &mut Caller<'_, HostState>, out: u32, handle: u32) -> ShimResult<()> {
    let text = get(caller, handle)?.debug_string();
    guest(caller)?.write_string_out(out, Some(&text))?;
    Ok(())
}

fn error_new(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> ShimResult<u32> {
    let message = guest(caller)?.read_string(ptr, len)?;
    Ok(alloc(caller, HostValue::error(message))?)
}

fn type_of(caller: &mut Caller<'_, HostState>, handle: u32) -> ShimResult<u32> {
    let name = get(caller, handle)?.type_of();
    Ok(alloc(caller, HostValue::string(name))?)
}
