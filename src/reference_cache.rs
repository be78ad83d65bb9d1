//! Process-wide reference cache: a singleton registry of live objects keyed
//! by fingerprint, rather than serialized copies.
//!
//! Unlike the value cache, a reference-cached call never copies its result:
//! every caller observing a cache hit receives a clone of the same `Arc`.
//! Objects live for the remainder of the process; this crate does not expose
//! eviction, matching the system it is modeled on.

use std::any::Any;
use std::sync::{Arc, LazyLock, Mutex};

use dashmap::DashMap;
use tracing::instrument;

use crate::error::CacheError;
use crate::hash::TypeEncoders;
use crate::key::{Args, FunctionId, cache_key};

type Registry = DashMap<String, Arc<dyn Any + Send + Sync>>;

static REGISTRY: LazyLock<Registry> = LazyLock::new(DashMap::new);

/// A snapshot of every currently-registered reference-cached value.
pub fn get_references() -> Vec<Arc<dyn Any + Send + Sync>> {
    REGISTRY.iter().map(|entry| entry.value().clone()).collect()
}

fn downcast<T: Any + Send + Sync>(
    value: Arc<dyn Any + Send + Sync>,
    key: &str,
) -> Result<Arc<T>, CacheError> {
    value.downcast::<T>().map_err(|_| {
        CacheError::backend(color_eyre::eyre::eyre!(
            "reference cache entry for key {key} does not match the requested type"
        ))
    })
}

/// Resolve a zero-argument `constructor` as a reference-cached singleton,
/// disambiguated by `factory_key`. Two calls with the same `constructor`
/// type (e.g. the same top-level `fn`) and the same `factory_key` share one
/// instance; a different `factory_key` (or a genuinely different
/// constructor closure type) produces an independent one.
///
/// Shared by [`crate::factory`]'s storage factories and by the value-cache
/// decorators' own `storage_factory` resolution, since both need the same
/// "construct once, key by factory identity" behavior.
pub fn resolve_singleton<S, F>(
    constructor: F,
    factory_key: Option<&'static str>,
) -> Result<Arc<S>, CacheError>
where
    F: Fn() -> S,
    S: Any + Send + Sync,
{
    ReferenceCache::new(move |_: (Option<&'static str>,)| constructor()).call((factory_key,))
}

/// Wraps a blocking function `F: Fn(A) -> T` so that repeated calls with an
/// equivalent argument fingerprint return the same `Arc<T>` instead of
/// invoking `F` again.
pub struct ReferenceCache<F> {
    function: F,
    function_id: FunctionId,
    type_encoders: Option<TypeEncoders>,
    construction_lock: Mutex<()>,
}

impl<F> ReferenceCache<F> {
    #[track_caller]
    pub fn new(function: F) -> Self {
        Self {
            function_id: FunctionId::of::<F>(),
            function,
            type_encoders: None,
            construction_lock: Mutex::new(()),
        }
    }

    pub fn type_encoders(mut self, encoders: TypeEncoders) -> Self {
        self.type_encoders = Some(encoders);
        self
    }
}

impl<A, T, F> ReferenceCache<F>
where
    A: Args,
    T: Any + Send + Sync,
    F: Fn(A) -> T,
{
    #[instrument(name = "ReferenceCache::call", skip(self, args))]
    pub fn call(&self, args: A) -> Result<Arc<T>, CacheError> {
        let _serialize = self
            .construction_lock
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        let key = cache_key(self.function_id, &args, self.type_encoders.as_ref())?;
        if let Some(existing) = REGISTRY.get(&key) {
            return downcast(existing.value().clone(), &key);
        }

        let value: Arc<dyn Any + Send + Sync> = Arc::new((self.function)(args));
        REGISTRY.insert(key.clone(), value.clone());
        downcast(value, &key)
    }
}

/// Async twin of [`ReferenceCache`]: `F: Fn(A) -> Fut` where `Fut::Output` is
/// the value to cache by reference.
pub struct AsyncReferenceCache<F> {
    function: F,
    function_id: FunctionId,
    type_encoders: Option<TypeEncoders>,
    construction_lock: tokio::sync::Mutex<()>,
}

impl<F> AsyncReferenceCache<F> {
    #[track_caller]
    pub fn new(function: F) -> Self {
        Self {
            function_id: FunctionId::of::<F>(),
            function,
            type_encoders: None,
            construction_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn type_encoders(mut self, encoders: TypeEncoders) -> Self {
        self.type_encoders = Some(encoders);
        self
    }
}

impl<A, T, F, Fut> AsyncReferenceCache<F>
where
    A: Args,
    T: Any + Send + Sync,
    F: Fn(A) -> Fut,
    Fut: Future<Output = T>,
{
    #[instrument(name = "AsyncReferenceCache::call", skip(self, args))]
    pub async fn call(&self, args: A) -> Result<Arc<T>, CacheError> {
        let _serialize = self.construction_lock.lock().await;

        let key = cache_key(self.function_id, &args, self.type_encoders.as_ref())?;
        if let Some(existing) = REGISTRY.get(&key) {
            return downcast(existing.value().clone(), &key);
        }

        let value: Arc<dyn Any + Send + Sync> = Arc::new((self.function)(args).await);
        REGISTRY.insert(key.clone(), value.clone());
        downcast(value, &key)
    }
}
