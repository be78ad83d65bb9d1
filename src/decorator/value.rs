//! Blocking value-cache decorator.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::error::CacheError;
use crate::hash::TypeEncoders;
use crate::key::{Args, FunctionId, cache_key};
use crate::reference_cache::resolve_singleton;
use crate::storage::Storage;

/// Wraps a blocking function `F: Fn(A) -> R` so repeated calls with an
/// equivalent argument fingerprint are served from a [`Storage`] instance
/// instead of re-executing `F`. Every cache hit decodes a fresh copy of `R`
/// from bytes.
///
/// The storage instance itself is not constructed eagerly: `storage_factory`
/// is invoked at most once, on the first call, and the result is shared by
/// every later call to this decorator (and, when `factory_key` collides with
/// another decorator's, by that decorator too -- see [`crate::factory`]).
pub struct CacheValue<F, FS, S> {
    function: F,
    function_id: FunctionId,
    storage_factory: FS,
    factory_key: Option<&'static str>,
    type_encoders: Option<TypeEncoders>,
    expires_in: Option<Duration>,
    /// Present when `allow_concurrent = false`: serializes calls so that
    /// concurrent duplicate calls run one at a time instead of all missing
    /// the cache simultaneously.
    serialize: Option<Mutex<()>>,
    storage: OnceLock<Arc<S>>,
    resolve_lock: Mutex<()>,
}

/// Builder for [`CacheValue`]. Obtain one via [`CacheValue::builder`].
pub struct CacheValueBuilder<F, FS> {
    function: F,
    function_id: FunctionId,
    storage_factory: FS,
    factory_key: Option<&'static str>,
    type_encoders: Option<TypeEncoders>,
    expires_in: Option<Duration>,
    allow_concurrent: bool,
}

impl<F, FS> CacheValueBuilder<F, FS> {
    pub fn type_encoders(mut self, encoders: TypeEncoders) -> Self {
        self.type_encoders = Some(encoders);
        self
    }

    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Defaults to `true`. Set `false` to serialize calls behind a mutex so
    /// duplicate concurrent calls don't each miss and recompute.
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

impl<F, FS, S> CacheValueBuilder<F, FS>
where
    FS: Fn() -> S,
{
    pub fn build(self) -> CacheValue<F, FS, S> {
        CacheValue {
            function: self.function,
            function_id: self.function_id,
            storage_factory: self.storage_factory,
            factory_key: self.factory_key,
            type_encoders: self.type_encoders,
            expires_in: self.expires_in,
            serialize: (!self.allow_concurrent).then(|| Mutex::new(())),
            storage: OnceLock::new(),
            resolve_lock: Mutex::new(()),
        }
    }
}

impl<F, FS, S> CacheValue<F, FS, S> {
    /// Start building a decorator around `function`, resolved against
    /// storage lazily constructed by `storage_factory` on first use. The
    /// function's identity is anchored at this call site.
    #[track_caller]
    pub fn builder(function: F, storage_factory: FS) -> CacheValueBuilder<F, FS> {
        CacheValueBuilder {
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

impl<A, R, F, FS, S> CacheValue<F, FS, S>
where
    A: Args,
    R: Serialize + DeserializeOwned,
    F: Fn(A) -> R,
    FS: Fn() -> S,
    S: Storage + std::any::Any + Send + Sync,
{
    /// Resolve storage: if already bound, use it; else, under a
    /// per-decorator mutex, invoke the factory once through the reference
    /// cache and cache the result for every later call.
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

    #[instrument(name = "CacheValue::call", skip(self, args))]
    pub fn call(&self, args: A) -> Result<R, CacheError> {
        let storage = self.resolve_storage()?;

        let _guard = self
            .serialize
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(|p| p.into_inner()));

        let key = cache_key(self.function_id, &args, self.type_encoders.as_ref())?;

        if let Some(bytes) = storage.get(&key)? {
            return serde_json::from_slice(&bytes).map_err(CacheError::backend);
        }

        let value = (self.function)(args);
        let type_name = std::any::type_name::<R>();
        let bytes = serde_json::to_vec(&value)
            .map_err(|cause| CacheError::UnserializableReturnValue { type_name, cause })?;
        storage.set(&key, &bytes, self.expires_in)?;
        Ok(value)
    }
}
