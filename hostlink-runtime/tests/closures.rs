//! Guest closures and owned guest objects, end to end.

mod common;

use common::{bridge, call_i32, guest_module};
use hostlink_core::{Handle, HostValue, HostlinkError};
use hostlink_runtime::Bridge;

const CLOSURE_IMPORTS: &str = r#"
    (import "hostlink" "closure_new" (func $closure_new (param i32 i32 i32 i32) (result i32)))
    (import "hostlink" "cb_drop" (func $cb_drop (param i32) (result i32)))
    (import "hostlink" "call1" (func $call1 (param i32 i32 i32) (result i32)))
    (import "hostlink" "ref_drop" (func $ref_drop (param i32)))
    (import "hostlink" "ref_clone" (func $ref_clone (param i32) (result i32)))
"#;

// Invoker modes: 0 echoes its argument, 1 calls itself through `call1`,
// 2 releases itself through `cb_drop` before returning, 3 traps, 4 releases
// itself twice through a cloned handle.
const CLOSURE_BODY: &str = r#"
    (table (export "__indirect_function_table") 2 funcref)
    (elem (i32.const 0) $invoke $dtor)

    (global $closure (mut i32) (i32.const 0))
    (global $mode (mut i32) (i32.const 0))
    (global $inner (mut i32) (i32.const -1))
    (global $dtor_calls (mut i32) (i32.const 0))
    (global $dtor_a (mut i32) (i32.const 0))

    (func (export "__hostlink_start"))

    (func $invoke (param $a i32) (param $b i32) (param $arg i32) (result i32)
        (if (i32.eq (global.get $mode) (i32.const 1))
            (then
                (global.set $inner
                    (call $call1 (global.get $closure) (i32.const 1) (local.get $arg)))))
        (if (i32.eq (global.get $mode) (i32.const 2))
            (then
                (global.set $inner (call $cb_drop (global.get $closure)))))
        (if (i32.eq (global.get $mode) (i32.const 3))
            (then unreachable))
        (if (i32.eq (global.get $mode) (i32.const 4))
            (then
                (global.set $inner
                    (i32.add
                        (call $cb_drop (call $ref_clone (global.get $closure)))
                        (call $cb_drop (global.get $closure))))))
        (local.get $arg))

    (func $dtor (param $a i32) (param $b i32)
        (global.set $dtor_calls (i32.add (global.get $dtor_calls) (i32.const 1)))
        (global.set $dtor_a (local.get $a)))

    (func (export "make") (result i32)
        (global.set $closure
            (call $closure_new (i32.const 16) (i32.const 7) (i32.const 1) (i32.const 0)))
        (global.get $closure))
    (func (export "set_mode") (param i32)
        (global.set $mode (local.get 0)))
    (func (export "release") (result i32)
        (call $cb_drop (global.get $closure)))
    (func (export "forget")
        (call $ref_drop (global.get $closure)))
    (func (export "apply") (param i32 i32) (result i32)
        (call $call1 (local.get 0) (i32.const 1) (local.get 1)))
    (func (export "inner") (result i32) (global.get $inner))
    (func (export "dtor_calls") (result i32) (global.get $dtor_calls))
    (func (export "dtor_a") (result i32) (global.get $dtor_a))
"#;

fn closure_bridge() -> Bridge {
    bridge(&guest_module(CLOSURE_IMPORTS, CLOSURE_BODY))
}

fn make_closure(bridge: &mut Bridge) -> HostValue {
    let raw = call_i32(bridge, "make");
    let f = bridge.get(Handle::from_raw(raw)).unwrap();
    assert!(f.is_function());
    f
}

fn call(bridge: &mut Bridge, f: &HostValue, arg: f64) -> hostlink_core::Result<HostValue> {
    bridge.call_function(f, &HostValue::Undefined, vec![HostValue::number(arg)])
}

#[test]
fn closure_returns_its_argument() {
    let mut bridge = closure_bridge();
    let f = make_closure(&mut bridge);

    assert_eq!(call(&mut bridge, &f, 41.0).unwrap().as_f64(), Some(41.0));
    assert_eq!(call(&mut bridge, &f, 42.0).unwrap().as_f64(), Some(42.0));
    assert_eq!(call_i32(&mut bridge, "dtor_calls"), 0);
}

#[test]
fn released_closure_throws_when_called() {
    let mut bridge = closure_bridge();
    let f = make_closure(&mut bridge);

    assert_eq!(call_i32(&mut bridge, "release"), 1);
    let err = call(&mut bridge, &f, 1.0).unwrap_err();
    assert!(matches!(err, HostlinkError::HostException { ref message } if message.contains("E402")));

    // The guest frees its own state when cb_drop returns 1.
    drop(f);
    bridge.collect();
    assert_eq!(call_i32(&mut bridge, "dtor_calls"), 0);
}

#[test]
fn reentrant_call_throws_to_guest_and_outer_call_completes() {
    let mut bridge = closure_bridge();
    let f = make_closure(&mut bridge);
    bridge.call_typed::<u32, ()>("set_mode", 1).unwrap();

    assert_eq!(call(&mut bridge, &f, 5.0).unwrap().as_f64(), Some(5.0));
    assert_eq!(call_i32(&mut bridge, "inner"), 0);

    let exception = bridge.take_exception().expect("pending exception");
    assert!(exception.get("message").as_str().unwrap().contains("E401"));

    bridge.call_typed::<u32, ()>("set_mode", 0).unwrap();
    assert_eq!(call(&mut bridge, &f, 6.0).unwrap().as_f64(), Some(6.0));
    assert_eq!(call_i32(&mut bridge, "dtor_calls"), 0);
}

#[test]
fn drop_during_call_runs_destructor_once() {
    let mut bridge = closure_bridge();
    let f = make_closure(&mut bridge);
    bridge.call_typed::<u32, ()>("set_mode", 2).unwrap();

    assert_eq!(call(&mut bridge, &f, 3.0).unwrap().as_f64(), Some(3.0));
    assert_eq!(call_i32(&mut bridge, "inner"), 0);
    assert_eq!(call_i32(&mut bridge, "dtor_calls"), 1);
    assert_eq!(call_i32(&mut bridge, "dtor_a"), 16);

    drop(f);
    bridge.collect();
    assert_eq!(call_i32(&mut bridge, "dtor_calls"), 1);
}

#[test]
fn repeated_release_during_call_is_ignored() {
    let mut bridge = closure_bridge();
    let f = make_closure(&mut bridge);
    bridge.call_typed::<u32, ()>("set_mode", 4).unwrap();

    assert_eq!(call(&mut bridge, &f, 8.0).unwrap().as_f64(), Some(8.0));
    assert_eq!(call_i32(&mut bridge, "inner"), 0);
    assert_eq!(call_i32(&mut bridge, "dtor_calls"), 1);

    let err = call(&mut bridge, &f, 1.0).unwrap_err();
    assert!(matches!(err, HostlinkError::HostException { ref message } if message.contains("E402")));
    drop(f);
    bridge.collect();
    assert_eq!(call_i32(&mut bridge, "dtor_calls"), 1);
}

#[test]
fn trapping_closure_releases_argument_handles() {
    let mut bridge = closure_bridge();
    let f = make_closure(&mut bridge);
    bridge.call_typed::<u32, ()>("set_mode", 3).unwrap();
    let before = bridge.state().table.len();

    assert!(call(&mut bridge, &f, 1.0).is_err());
    assert_eq!(bridge.state().table.len(), before);

    bridge.call_typed::<u32, ()>("set_mode", 0).unwrap();
    assert_eq!(call(&mut bridge, &f, 2.0).unwrap().as_f64(), Some(2.0));
}

#[test]
fn unreleased_closure_is_finalized() {
    let mut bridge = closure_bridge();
    call_i32(&mut bridge, "make");

    bridge.call("forget").unwrap();
    assert_eq!(call_i32(&mut bridge, "dtor_calls"), 1);
    assert_eq!(call_i32(&mut bridge, "dtor_a"), 16);
}

#[test]
fn guest_calls_native_functions() {
    let mut bridge = closure_bridge();
    let double = HostValue::native_fn("double", |_this, args| {
        let n = args.first().and_then(HostValue::as_f64).unwrap_or(f64::NAN);
        Ok(HostValue::number(n * 2.0))
    });
    let refuse = HostValue::native_fn("refuse", |_this, _args| {
        Err(HostValue::type_error("refused"))
    });

    let double = bridge.alloc(double).unwrap();
    let refuse = bridge.alloc(refuse).unwrap();
    let five = bridge.alloc(HostValue::number(5.0)).unwrap();

    let raw = bridge
        .call_typed::<(u32, u32), u32>("apply", (double.as_raw(), five.as_raw()))
        .unwrap();
    assert_eq!(bridge.take(Handle::from_raw(raw)).unwrap().as_f64(), Some(10.0));

    let raw = bridge
        .call_typed::<(u32, u32), u32>("apply", (refuse.as_raw(), five.as_raw()))
        .unwrap();
    assert_eq!(raw, 0);
    let exception = bridge.take_exception().expect("pending exception");
    assert!(exception.instance_of("TypeError"));
}

const OWNED_IMPORTS: &str = r#"
    (import "hostlink" "owned_wrap" (func $owned_wrap (param i32 i32 i32) (result i32)))
"#;

const OWNED_BODY: &str = r#"
    (data (i32.const 512) "Counter")

    (global $free_calls (mut i32) (i32.const 0))
    (global $free_ptr (mut i32) (i32.const 0))
    (global $free_flag (mut i32) (i32.const -1))

    (func (export "__hostlink_start"))
    (func (export "__hostlink_counter_free") (param $ptr i32) (param $flag i32)
        (global.set $free_calls (i32.add (global.get $free_calls) (i32.const 1)))
        (global.set $free_ptr (local.get $ptr))
        (global.set $free_flag (local.get $flag)))

    (func (export "wrap") (result i32)
        (call $owned_wrap (i32.const 512) (i32.const 7) (i32.const 4096)))
    (func (export "free_calls") (result i32) (global.get $free_calls))
    (func (export "free_ptr") (result i32) (global.get $free_ptr))
    (func (export "free_flag") (result i32) (global.get $free_flag))
"#;

fn owned_bridge() -> Bridge {
    bridge(&guest_module(OWNED_IMPORTS, OWNED_BODY))
}

#[test]
fn explicit_free_releases_once() {
    let mut bridge = owned_bridge();
    let handle = Handle::from_raw(call_i32(&mut bridge, "wrap"));
    let value = bridge.take(handle).unwrap();
    assert!(value.instance_of("Counter"));

    let HostValue::Owned(owned) = &value else {
        panic!("expected owned value, got {value:?}");
    };
    bridge.free_owned(owned).unwrap();
    bridge.free_owned(owned).unwrap();
    assert!(owned.is_released());

    assert_eq!(call_i32(&mut bridge, "free_calls"), 1);
    assert_eq!(call_i32(&mut bridge, "free_ptr"), 4096);
    assert_eq!(call_i32(&mut bridge, "free_flag"), 0);

    drop(value);
    assert_eq!(bridge.collect(), 0);
    assert_eq!(call_i32(&mut bridge, "free_calls"), 1);
}

#[test]
fn dropped_wrapper_is_finalized() {
    let mut bridge = owned_bridge();
    let handle = Handle::from_raw(call_i32(&mut bridge, "wrap"));

    drop(bridge.take(handle).unwrap());
    assert_eq!(bridge.collect(), 1);

    assert_eq!(call_i32(&mut bridge, "free_calls"), 1);
    assert_eq!(call_i32(&mut bridge, "free_ptr"), 4096);
    assert_eq!(call_i32(&mut bridge, "free_flag"), 1);
}
