use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use fncache::CacheValue;
use fncache::storage::memory::{AsyncMemoryStorage, MemoryStorage};
use pretty_assertions::assert_eq;

#[test]
fn allow_concurrent_false_serializes_duplicate_calls() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_in_fn = calls.clone();
    let cache = Arc::new(
        CacheValue::builder(
            move |n: i32| {
                calls_in_fn.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                n * 10
            },
            MemoryStorage::new,
        )
        .allow_concurrent(false)
        .build(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            std::thread::spawn(move || cache.call((7,)).unwrap())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 70);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn allow_concurrent_true_permits_duplicate_recomputation() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_in_fn = calls.clone();
    let cache = Arc::new(
        CacheValue::builder(
            move |n: i32| {
                let seen = calls_in_fn.fetch_add(1, Ordering::SeqCst);
                if seen == 0 {
                    std::thread::sleep(Duration::from_millis(20));
                }
                n * 10
            },
            MemoryStorage::new,
        )
        .allow_concurrent(true)
        .build(),
    );

    let first = cache.clone();
    let second = cache.clone();
    let first = std::thread::spawn(move || first.call((7,)).unwrap());
    std::thread::sleep(Duration::from_millis(5));
    let second = std::thread::spawn(move || second.call((7,)).unwrap());

    assert_eq!(first.join().unwrap(), 70);
    assert_eq!(second.join().unwrap(), 70);
    assert!(calls.load(Ordering::SeqCst) >= 1);
}

#[test_log::test(tokio::test)]
async fn async_allow_concurrent_false_serializes_duplicate_calls() {
    use fncache::AsyncCacheValue;

    let calls = Arc::new(AtomicU32::new(0));
    let calls_in_fn = calls.clone();
    let cache = Arc::new(
        AsyncCacheValue::builder(
            move |n: i32| {
                let calls_in_fn = calls_in_fn.clone();
                async move {
                    calls_in_fn.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    n * 10
                }
            },
            AsyncMemoryStorage::new,
        )
        .allow_concurrent(false)
        .build(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.call((7,)).await.unwrap() }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 70);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
