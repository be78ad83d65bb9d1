//! Async value-cache decorator. Identical semantics to
//! [`crate::decorator::value::CacheValue`] with an async storage backend and
//! an async-aware serialization lock.

use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::error::CacheError;
use crate::hash::TypeEncoders;
use crate::key::{Args, FunctionId, cache_key};
use crate::reference_cache::resolve_singleton;
use crate::storage::AsyncStorage;

/// Storage is resolved lazily, exactly as in
/// [`crate::decorator::value::CacheValue`]: `storage_factory` runs at most
/// once, the first time `call` is invoked, under `resolve_lock`.
pub struct AsyncCacheValue<F, FS, S> {
    function: F,
    function_id: FunctionId,
    storage_factory: FS,
    factory_key: Option<&'static str>,
    type_encoders: Option<TypeEncoders>,
    expires_in: Option<Duration>,
    serialize: Option<Mutex<()>>,
    storage: OnceLock<Arc<S>>,
    resolve_lock: StdMutex<()>,
}

pub struct AsyncCacheValueBuilder<F, FS> {
    function: F,
    function_id: FunctionId,
    storage_factory: FS,
    factory_key: Option<&'static str>,
    type_encoders: Option<TypeEncoders>,
    expires_in: Option<Duration>,
    allow_concurrent: bool,
}

impl<F, FS> AsyncCacheValueBuilder<F, FS> {
    pub fn type_encoders(mut self, encoders: TypeEncoders) -> Self {
        self.type_encoders = Some(encoders);
        self
    }

    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    pub fn allow_concurrent(mut self, allow_concurrent: bool) -> Self {
        self.allow_concurrent = allow_concurrent;
        self
    }

    /// Disambiguates this decorator's `storage_factory` singleton from
    /// another decorator that happens to share the same factory closure
    /// type but should not share its storage instance.
    pub fn factory_key(mut self, factory_key: &'static str) -> Self {
        self.factory_key = Some(factory_key);
        self
    }
}

impl<F, FS, S> AsyncCacheValueBuilder<F, FS>
where
    FS: Fn() -> S,
{
    pub fn build(self) -> AsyncCacheValue<F, FS, S> {
        AsyncCacheValue {
            function: self.function,
            function_id: self.function_id,
            storage_factory: self.storage_factory,
            factory_key: self.factory_key,
            type_encoders: self.type_encoders,
            expires_in: self.expires_in,
            serialize: (!self.allow_concurrent).then(|| Mutex::new(())),
            storage: OnceLock::new(),
            resolve_lock: StdMutex::new(()),
        }
    }
}

impl<F, FS, S> AsyncCacheValue<F, FS, S> {
    #[track_caller]
    pub fn builder(function: F, storage_factory: FS) -> AsyncCacheValueBuilder<F, FS> {
        AsyncCacheValueBuilder {
            function_id: FunctionId::of::<F>(),
            function,
            storage_factory,
            factory_key: None,
            type_encoders: None,
            expires_in: None,
            allow_concurrent: true,
        }
    }
}

impl<A, R, F, Fut, FS, S> AsyncCacheValue<F, FS, S>
where
    A: Args,
    R: Serialize + DeserializeOwned,
    F: Fn(A) -> Fut,
    Fut: Future<Output = R>,
    FS: Fn() -> S,
    S: AsyncStorage + std::any::Any + Send + Sync,
{
    /// Resolution is a quick, synchronous construction step even though
    /// `call` itself is async, so a plain `std::sync::Mutex` guards it --
    /// mirroring how [`crate::factory`]'s synchronous `singleton` helper
    /// backs even this crate's async storage factories.
    fn resolve_storage(&self) -> Result<Arc<S>, CacheError> {
        if let Some(storage) = self.storage.get() {
            return Ok(storage.clone());
        }
        let _guard = self.resolve_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(storage) = self.storage.get() {
            return Ok(storage.clone());
        }
        let resolved = resolve_singleton(&self.storage_factory, self.factory_key)?;
        let _ = self.storage.set(resolved.clone());
        Ok(resolved)
    }

    #[instrument(name = "AsyncCacheValue::call", skip(self, args))]
    pub async fn call(&self, args: A) -> Result<R, CacheError> {
        let storage = self.resolve_storage()?;

        let _guard = match &self.serialize {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let key = cache_key(self.function_id, &args, self.type_encoders.as_ref())?;

        if let Some(bytes) = storage.get(&key).await? {
            return serde_json::from_slice(&bytes).map_err(CacheError::backend);
        }

        let value = (self.function)(args).await;
        let type_name = std::any::type_name::<R>();
        let bytes = serde_json::to_vec(&value)
            .map_err(|cause| CacheError::UnserializableReturnValue { type_name, cause })?;
        storage.set(&key, &bytes, self.expires_in).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::AsyncMemoryStorage;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test_log::test(tokio::test)]
    async fn second_call_with_same_args_is_a_cache_hit() {
        let calls = AtomicU32::new(0);
        let cache = AsyncCacheValue::builder(
            |n: i32| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { n * 2 }
            },
            AsyncMemoryStorage::new,
        )
        .build();

        assert_eq!(cache.call((5,)).await.unwrap(), 10);
        assert_eq!(cache.call((5,)).await.unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn different_args_are_independent_entries() {
        let cache =
            AsyncCacheValue::builder(|n: i32| async move { n * 2 }, AsyncMemoryStorage::new)
                .build();
        assert_eq!(cache.call((1,)).await.unwrap(), 2);
        assert_eq!(cache.call((2,)).await.unwrap(), 4);
    }

    #[test_log::test(tokio::test)]
    async fn storage_factory_is_invoked_at_most_once() {
        let constructions = Arc::new(AtomicU32::new(0));
        let constructions_in_factory = constructions.clone();
        let cache = AsyncCacheValue::builder(
            |n: i32| async move { n * 2 },
            move || {
                constructions_in_factory.fetch_add(1, Ordering::SeqCst);
                AsyncMemoryStorage::new()
            },
        )
        .build();

        cache.call((1,)).await.unwrap();
        cache.call((2,)).await.unwrap();
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
    }
}
