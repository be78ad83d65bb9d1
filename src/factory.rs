//! Storage factories: zero-argument constructors for storage backends, each
//! wrapped as a [`crate::reference_cache`] singleton.
//!
//! Calling a factory function twice with the same `factory_key` returns the
//! same shared storage instance; calling it with a different `factory_key`
//! (or from a genuinely different factory function) produces an independent
//! instance. A factory function's own identity never changes across calls,
//! so two calls configured differently (e.g. two different filesystem
//! roots) collide into the same singleton unless given distinct
//! `factory_key`s -- pass one whenever a factory's configuration varies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;
use crate::storage::memcached::{AsyncMemcachedLikeClient, AsyncMemcachedStorage, MemcachedLikeClient, MemcachedStorage};
use crate::storage::memory::{AsyncMemoryStorage, MemoryStorage};
use crate::storage::mongo::{
    self, AsyncMongoLikeCollection, AsyncMongoStorage, MongoLikeCollection, MongoStorage,
    MongoStorageOptions,
};
use crate::storage::redis::{AsyncRedisLikeClient, AsyncRedisStorage, RedisLikeClient, RedisStorage};

fn singleton<S, F>(constructor: F, factory_key: Option<&'static str>) -> Result<Arc<S>, CacheError>
where
    F: Fn() -> S,
    S: std::any::Any + Send + Sync,
{
    crate::reference_cache::resolve_singleton(constructor, factory_key)
}

#[track_caller]
pub fn memory_storage(factory_key: Option<&'static str>) -> Result<Arc<MemoryStorage>, CacheError> {
    singleton(MemoryStorage::new, factory_key)
}

#[track_caller]
pub fn async_memory_storage(
    factory_key: Option<&'static str>,
) -> Result<Arc<AsyncMemoryStorage>, CacheError> {
    singleton(AsyncMemoryStorage::new, factory_key)
}

#[cfg(feature = "fs")]
#[track_caller]
pub fn file_storage(
    root: PathBuf,
    key_prefix: impl Into<String>,
    factory_key: Option<&'static str>,
) -> Result<Arc<crate::storage::file::FileStorage>, CacheError> {
    let key_prefix = key_prefix.into();
    singleton(
        move || crate::storage::file::FileStorage::new(root.clone(), key_prefix.clone()),
        factory_key,
    )
}

#[cfg(feature = "fs")]
#[track_caller]
pub fn async_file_storage(
    root: PathBuf,
    key_prefix: impl Into<String>,
    factory_key: Option<&'static str>,
) -> Result<Arc<crate::storage::file::AsyncFileStorage>, CacheError> {
    let key_prefix = key_prefix.into();
    singleton(
        move || crate::storage::file::AsyncFileStorage::new(root.clone(), key_prefix.clone()),
        factory_key,
    )
}

#[track_caller]
pub fn redis_storage<C>(
    client: C,
    key_prefix: Option<String>,
    factory_key: Option<&'static str>,
) -> Result<Arc<RedisStorage<C>>, CacheError>
where
    C: RedisLikeClient + Clone + 'static,
{
    singleton(
        move || RedisStorage::new(client.clone(), key_prefix.clone()),
        factory_key,
    )
}

#[track_caller]
pub fn async_redis_storage<C>(
    client: C,
    key_prefix: Option<String>,
    factory_key: Option<&'static str>,
) -> Result<Arc<AsyncRedisStorage<C>>, CacheError>
where
    C: AsyncRedisLikeClient + Clone + 'static,
{
    singleton(
        move || AsyncRedisStorage::new(client.clone(), key_prefix.clone()),
        factory_key,
    )
}

#[track_caller]
pub fn memcached_storage<C>(
    client: C,
    factory_key: Option<&'static str>,
) -> Result<Arc<MemcachedStorage<C>>, CacheError>
where
    C: MemcachedLikeClient + Clone + 'static,
{
    singleton(move || MemcachedStorage::new(client.clone()), factory_key)
}

#[track_caller]
pub fn async_memcached_storage<C>(
    client: C,
    factory_key: Option<&'static str>,
) -> Result<Arc<AsyncMemcachedStorage<C>>, CacheError>
where
    C: AsyncMemcachedLikeClient + Clone + 'static,
{
    singleton(move || AsyncMemcachedStorage::new(client.clone()), factory_key)
}

#[track_caller]
pub fn mongo_storage<C>(
    client: C,
    key_prefix: Option<String>,
    max_backoff: Duration,
    base_backoff: Duration,
    max_failures: u32,
    factory_key: Option<&'static str>,
) -> Result<Arc<MongoStorage<C>>, CacheError>
where
    C: MongoLikeCollection + Clone + 'static,
{
    singleton(
        move || {
            MongoStorage::new(
                client.clone(),
                key_prefix.clone(),
                max_backoff,
                base_backoff,
                max_failures,
            )
        },
        factory_key,
    )
}

#[track_caller]
pub fn async_mongo_storage<C>(
    client: C,
    key_prefix: Option<String>,
    max_backoff: Duration,
    base_backoff: Duration,
    max_failures: u32,
    factory_key: Option<&'static str>,
) -> Result<Arc<AsyncMongoStorage<C>>, CacheError>
where
    C: AsyncMongoLikeCollection + Clone + 'static,
{
    singleton(
        move || {
            AsyncMongoStorage::new(
                client.clone(),
                key_prefix.clone(),
                max_backoff,
                base_backoff,
                max_failures,
            )
        },
        factory_key,
    )
}

/// Like [`mongo_storage`], but takes a [`MongoStorageOptions`] built with
/// `bon`'s builder instead of four positional parameters.
#[track_caller]
pub fn mongo_storage_with_options<C>(
    client: C,
    options: MongoStorageOptions,
    factory_key: Option<&'static str>,
) -> Result<Arc<MongoStorage<C>>, CacheError>
where
    C: MongoLikeCollection + Clone + 'static,
{
    singleton(
        move || MongoStorage::with_options(client.clone(), options.clone()),
        factory_key,
    )
}

/// Async twin of [`mongo_storage_with_options`].
#[track_caller]
pub fn async_mongo_storage_with_options<C>(
    client: C,
    options: MongoStorageOptions,
    factory_key: Option<&'static str>,
) -> Result<Arc<AsyncMongoStorage<C>>, CacheError>
where
    C: AsyncMongoLikeCollection + Clone + 'static,
{
    singleton(
        move || AsyncMongoStorage::with_options(client.clone(), options.clone()),
        factory_key,
    )
}

pub use mongo::{DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_FAILURES, MongoStorageOptions};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn same_factory_key_returns_the_same_instance() {
        let a = memory_storage(Some("a")).unwrap();
        let b = memory_storage(Some("a")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_factory_keys_return_different_instances() {
        let a = memory_storage(Some("distinct-1")).unwrap();
        let b = memory_storage(Some("distinct-2")).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
