//! Common test utilities for integration tests.

#![allow(dead_code)]

use hostlink_runtime::{Bridge, BridgeConfig, HostEnv, Runtime, RuntimeConfig};

/// Guest-side allocator and the exports every guest needs.
///
/// Bump allocation from offset 1024, growing memory when needed. `free`
/// only counts calls.
const RUNTIME_SUPPORT: &str = r#"
    (memory (export "memory") 1)
    (global $heap (mut i32) (i32.const 1024))
    (global $frees (mut i32) (i32.const 0))

    (func $malloc (export "__hostlink_malloc") (param $size i32) (param $align i32) (result i32)
        (local $ptr i32)
        (local.set $ptr
            (i32.and
                (i32.add (global.get $heap) (i32.sub (local.get $align) (i32.const 1)))
                (i32.xor (i32.sub (local.get $align) (i32.const 1)) (i32.const -1))))
        (global.set $heap (i32.add (local.get $ptr) (local.get $size)))
        (block $done
            (loop $grow
                (br_if $done
                    (i32.le_u (global.get $heap) (i32.mul (memory.size) (i32.const 65536))))
                (if (i32.eq (memory.grow (i32.const 1)) (i32.const -1))
                    (then unreachable))
                (br $grow)))
        (local.get $ptr))

    (func (export "__hostlink_realloc")
        (param $ptr i32) (param $old i32) (param $new i32) (param $align i32) (result i32)
        (local $dst i32)
        (local.set $dst (call $malloc (local.get $new) (local.get $align)))
        (memory.copy (local.get $dst) (local.get $ptr)
            (select (local.get $old) (local.get $new) (i32.lt_u (local.get $old) (local.get $new))))
        (local.get $dst))

    (func (export "__hostlink_free") (param i32 i32 i32)
        (global.set $frees (i32.add (global.get $frees) (i32.const 1))))

    (func (export "frees") (result i32) (global.get $frees))
"#;

/// Build a guest module: `imports` first, then the runtime support, then `body`.
///
/// The body must export `__hostlink_start`.
pub fn guest_module(imports: &str, body: &str) -> Vec<u8> {
    let wat = format!("(module\n{imports}\n{RUNTIME_SUPPORT}\n{body}\n)");
    wat::parse_str(&wat).expect("Failed to parse WAT")
}

/// A guest with no imports and an empty start function.
pub fn minimal_module() -> Vec<u8> {
    guest_module("", r#"(func (export "__hostlink_start"))"#)
}

/// Runtime with testing limits.
pub fn test_runtime() -> Runtime {
    Runtime::new(RuntimeConfig::testing()).expect("Failed to create runtime")
}

/// Instantiate `wasm` with default bridge settings.
pub fn bridge(wasm: &[u8]) -> Bridge {
    bridge_with(wasm, BridgeConfig::default(), HostEnv::default())
}

/// Instantiate `wasm` with explicit settings.
pub fn bridge_with(wasm: &[u8], config: BridgeConfig, env: HostEnv) -> Bridge {
    let runtime = test_runtime();
    let module = runtime.compile("test", wasm).expect("Failed to compile");
    Bridge::instantiate(&runtime, &module, &config, env).expect("Failed to instantiate")
}

/// Read raw bytes from guest memory.
pub fn read_bytes(bridge: &Bridge, ptr: u32, len: usize) -> Vec<u8> {
    let data = bridge.exports().memory.data(bridge.store());
    data[ptr as usize..ptr as usize + len].to_vec()
}

/// Read a little-endian `u32` from guest memory.
pub fn read_u32(bridge: &Bridge, ptr: u32) -> u32 {
    let bytes = read_bytes(bridge, ptr, 4);
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Call an export returning one `i32`.
pub fn call_i32(bridge: &mut Bridge, export: &str) -> u32 {
    bridge
        .call_typed::<(), u32>(export, ())
        .unwrap_or_else(|e| panic!("{export} failed: {e}"))
}
