//! Symbol resolution and global value caching across threads.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{CORE_FOUNDATION, Fixture, RunLoopMode};
use natbridge::prelude::*;

const THREADS: usize = 8;

// =============================================================================
// Resolve-once
// =============================================================================

#[test]
fn test_concurrent_first_resolution_looks_up_once() {
    let fixture = Fixture::new();
    let f = fixture
        .runtime
        .define_function(None, "NBShared", |_| Ok(NativeValue::Void));
    fixture.runtime.reset_stats();

    let bridge = &fixture.bridge;
    let barrier = Barrier::new(THREADS);
    let results: Vec<NativeHandle> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    bridge.symbols().resolve("NBShared").unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.len(), THREADS);
    assert!(results.iter().all(|&r| r == f));
    assert_eq!(fixture.stats().symbol_lookups, 1);
}

#[test]
fn test_concurrent_global_values_resolve_once() {
    let fixture = Fixture::new();
    fixture.runtime.reset_stats();

    let bridge = &fixture.bridge;
    let barrier = Barrier::new(THREADS);
    let values: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    bridge.enum_value(RunLoopMode::Common).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(values.iter().all(|v| *v == Some(fixture.common_modes)));
    assert_eq!(fixture.stats().symbol_lookups, 1);
    assert_eq!(fixture.stats().library_loads, 1);
}

#[test]
fn test_resolution_order_does_not_matter() {
    let a = Fixture::new();
    let b = Fixture::new();

    let forward = [
        a.bridge.enum_value(RunLoopMode::Default).unwrap(),
        a.bridge.enum_value(RunLoopMode::Common).unwrap(),
    ];
    let backward = [
        b.bridge.enum_value(RunLoopMode::Common).unwrap(),
        b.bridge.enum_value(RunLoopMode::Default).unwrap(),
    ];

    assert_eq!(forward[0], Some(a.default_mode));
    assert_eq!(forward[1], Some(a.common_modes));
    assert_eq!(backward[0], Some(b.common_modes));
    assert_eq!(backward[1], Some(b.default_mode));
}

// =============================================================================
// Optional symbols
// =============================================================================

#[test]
fn test_optional_symbol_is_absent_and_idempotent() {
    let fixture = Fixture::new();
    fixture.runtime.reset_stats();

    let bridge = &fixture.bridge;
    for _ in 0..5 {
        let symbol = bridge.symbols().resolve_optional("NBNotThere").unwrap();
        assert_eq!(symbol, None);
        let value = bridge.enum_value(RunLoopMode::Tracking).unwrap();
        assert_eq!(value, None);
    }
    // One lookup per symbol, however often it is asked for
    assert_eq!(fixture.stats().symbol_lookups, 2);
}

#[test]
fn test_required_symbol_not_found_is_fatal() {
    let fixture = Fixture::new();
    let err = fixture.bridge.symbols().resolve("NBNotThere").unwrap_err();
    assert!(matches!(err, BridgeError::SymbolNotFound { .. }));
    assert!(err.is_fatal());

    let err = fixture
        .bridge
        .globals()
        .value(&GlobalSymbol::new("kNBMissing").in_library(CORE_FOUNDATION))
        .unwrap_err();
    assert!(err.to_string().contains("kNBMissing"));
    assert!(err.to_string().contains(CORE_FOUNDATION));
}

// =============================================================================
// Libraries
// =============================================================================

#[test]
fn test_library_loads_lazily_on_first_use() {
    let fixture = Fixture::new();
    assert!(!fixture.runtime.is_loaded(CORE_FOUNDATION));

    fixture.bridge.enum_value(RunLoopMode::Default).unwrap();
    assert!(fixture.runtime.is_loaded(CORE_FOUNDATION));

    fixture.bridge.enum_value(RunLoopMode::Common).unwrap();
    assert_eq!(fixture.stats().library_loads, 1);
}

#[test]
fn test_preloaded_library_and_process_only_search() {
    let fixture = Fixture::with_config(
        BridgeConfig::new()
            .preload_library(CORE_FOUNDATION)
            .with_search_all_libraries(false),
    );
    assert!(fixture.runtime.is_loaded(CORE_FOUNDATION));

    // Declared without a library, so only the process image is searched
    let symbols = fixture.bridge.symbols();
    let unscoped = symbols.resolve_optional("CFBooleanGetValue").unwrap();
    assert_eq!(unscoped, None);
    let scoped = symbols.resolve_in(Some(CORE_FOUNDATION), "CFBooleanGetValue", false);
    assert!(scoped.unwrap().is_some());
}

#[test]
fn test_address_only_global_is_the_symbol_address() {
    let fixture = Fixture::new();
    let name = "_dispatch_queue_attr_concurrent";
    let stored = NativeHandle::new(0x5);
    let attr = fixture.runtime.define_global(None, name, stored);

    let by_value = GlobalSymbol::new(name);
    let by_address = by_value.address_only();
    let globals = fixture.bridge.globals();
    assert_eq!(globals.value(&by_value).unwrap(), Some(stored));
    assert_eq!(globals.value(&by_address).unwrap(), Some(attr));
}

#[test]
fn test_shared_runtime_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Bridge>();
    assert_send_sync::<Arc<InProcessRuntime>>();
}
