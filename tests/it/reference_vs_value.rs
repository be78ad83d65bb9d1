use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use fncache::storage::memory::MemoryStorage;
use fncache::{CacheValue, ReferenceCache};
use pretty_assertions::assert_eq;

#[test]
fn value_cache_returns_distinct_copies_reference_cache_returns_the_same_object() {
    let value_calls = AtomicU32::new(0);
    let value_cache = CacheValue::builder(
        |n: i32| {
            value_calls.fetch_add(1, Ordering::SeqCst);
            vec![n; 2]
        },
        MemoryStorage::new,
    )
    .build();

    let first = value_cache.call((1,)).unwrap();
    let second = value_cache.call((1,)).unwrap();
    assert_eq!(first, second);
    assert_eq!(value_calls.load(Ordering::SeqCst), 1);

    let reference_calls = AtomicU32::new(0);
    let reference_cache = ReferenceCache::new(|n: i32| {
        reference_calls.fetch_add(1, Ordering::SeqCst);
        vec![n; 2]
    });

    let first = reference_cache.call((1,)).unwrap();
    let second = reference_cache.call((1,)).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(reference_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn get_references_includes_every_registered_object() {
    let cache = ReferenceCache::new(|n: i32| n.to_string());
    cache.call((4242,)).unwrap();

    let all = fncache::get_references();
    let found = all
        .iter()
        .filter_map(|v| v.downcast_ref::<String>())
        .any(|v| v == "4242");
    assert!(found);
}
