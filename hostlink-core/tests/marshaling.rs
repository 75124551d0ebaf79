//! Integration tests for the engine-independent marshaling pieces.
//!
//! These run the table, codec, closure and owned-handle types together
//! against the mock guest, the way the runtime drives them.

use hostlink_core::codec;
use hostlink_core::memory::{ByteView, GuestAlloc, LinearMemory, ViewCache};
use hostlink_core::testing::MockGuest;
use hostlink_core::{
    ClosureHost, Finalizer, FinalizerQueue, GuestClosure, Handle, HostValue, HostlinkError,
    ObjectRef, OwnedHandle, RefTable, Result,
};

#[test]
fn bulk_resolve_returns_values_and_clears_slots() {
    let mut table = RefTable::new();
    let mut guest = MockGuest::new();

    let handles: Vec<u32> = ["A", "B", "C"]
        .iter()
        .map(|s| table.alloc(HostValue::string(s)).unwrap().as_raw())
        .collect();

    let ptr = guest.malloc(12, 4).unwrap();
    ByteView::new(guest.memory_mut())
        .write_u32s(ptr, &handles)
        .unwrap();

    let raw = ByteView::new(guest.bytes()).read_u32s(ptr, 3).unwrap();
    let handles: Vec<Handle> = raw.into_iter().map(Handle::from_raw).collect();
    let values = table.take_many(&handles).unwrap();

    let texts: Vec<&str> = values.iter().filter_map(HostValue::as_str).collect();
    assert_eq!(texts, vec!["A", "B", "C"]);
    assert!(table.is_empty());
    for handle in handles {
        assert!(matches!(
            table.get(handle),
            Err(HostlinkError::StaleHandle { .. })
        ));
    }
}

#[test]
fn strings_survive_memory_growth() {
    let mut guest = MockGuest::new();
    let mut cache = ViewCache::new();
    cache.byte_view(&guest);

    let first = codec::encode("héllo", &mut guest).unwrap();
    assert_eq!(first.len, 6);

    let big = "x".repeat(100_000);
    let second = codec::encode(&big, &mut guest).unwrap();

    let view = cache.byte_view(&guest);
    assert_eq!(cache.refresh_count(), 2);
    assert_eq!(
        codec::decode(view.slice(first.ptr, first.len).unwrap(), first.ptr).unwrap(),
        "héllo"
    );
    assert_eq!(view.slice(second.ptr, second.len).unwrap().len(), 100_000);
}

/// Closure host that looks up an object property the closure "returns".
struct PropertyHost {
    table: RefTable,
    target: Handle,
    destroyed: usize,
}

impl ClosureHost for PropertyHost {
    type Output = HostValue;

    fn invoke(&mut self, _invoker: u32, _a: u32, _b: u32) -> Result<HostValue> {
        Ok(self.table.get(self.target)?.get("value"))
    }

    fn destroy(&mut self, _dtor: u32, _a: u32, _b: u32) -> Result<()> {
        self.destroyed += 1;
        Ok(())
    }
}

#[test]
fn closure_in_table_can_be_called_and_released() {
    let queue = FinalizerQueue::new();
    let mut table = RefTable::new();
    let target = table
        .alloc(HostValue::Object(ObjectRef::plain().with("value", "typed")))
        .unwrap();
    let closure = GuestClosure::new(64, 0, 2, 1, queue.clone());
    let handle = table.alloc(HostValue::from(closure)).unwrap();

    let mut host = PropertyHost {
        table,
        target,
        destroyed: 0,
    };

    let HostValue::Function(hostlink_core::HostFunction::Guest(closure)) =
        host.table.get(handle).unwrap()
    else {
        panic!("expected a guest closure");
    };
    assert_eq!(closure.call(&mut host).unwrap().as_str(), Some("typed"));

    assert!(closure.drop_ref());
    host.table.drop(handle).unwrap();
    drop(closure);
    assert_eq!(host.destroyed, 0);
    assert!(queue.is_empty());
}

#[test]
fn unreleased_resources_are_finalized_once() {
    let queue = FinalizerQueue::new();
    let mut table = RefTable::new();

    let owned = table
        .alloc(HostValue::Owned(std::sync::Arc::new(OwnedHandle::wrap(
            "jsowner",
            128,
            queue.clone(),
        ))))
        .unwrap();
    let closure = table
        .alloc(HostValue::from(GuestClosure::new(64, 8, 2, 1, queue.clone())))
        .unwrap();
    let copy = table.clone_handle(owned).unwrap();

    table.drop(owned).unwrap();
    assert!(queue.is_empty());
    table.drop(copy).unwrap();
    table.drop(closure).unwrap();

    let mut drained = queue.drain();
    drained.sort_by_key(|f| matches!(f, Finalizer::Closure { .. }));
    assert_eq!(
        drained,
        vec![
            Finalizer::Owned {
                class: "jsowner".to_string(),
                ptr: 128
            },
            Finalizer::Closure { dtor: 2, a: 64, b: 8 },
        ]
    );
}
