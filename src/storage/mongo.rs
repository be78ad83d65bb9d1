//! MongoDB-backed storage over an opaque collection client.
//!
//! Automatically retries operations that fail with a transient
//! auto-reconnect-style error using truncated exponential backoff, and lazily
//! creates its indexes (a TTL index on the expiry field, a unique index on
//! the key field) on first use under a double-checked lock.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::instrument;

use crate::error::CacheError;

use super::{AsyncStorage, Storage, DEFAULT_KEY_PREFIX};

/// Maximum backoff between retries.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(512);
/// Minimum (first) backoff between retries.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(8);
/// Consecutive transient failures tolerated before giving up (0-based).
pub const DEFAULT_MAX_FAILURES: u32 = 4;

/// Retry/namespacing configuration shared by [`MongoStorage`] and
/// [`AsyncMongoStorage`]. A plain config DTO, so -- unlike the
/// `#[track_caller]`-sensitive decorator builders elsewhere in this crate --
/// it is built with `bon::Builder`.
#[derive(bon::Builder, Clone, Debug)]
pub struct MongoStorageOptions {
    pub key_prefix: Option<String>,
    #[builder(default = DEFAULT_MAX_BACKOFF)]
    pub max_backoff: Duration,
    #[builder(default = DEFAULT_BASE_BACKOFF)]
    pub base_backoff: Duration,
    #[builder(default = DEFAULT_MAX_FAILURES)]
    pub max_failures: u32,
}

impl Default for MongoStorageOptions {
    fn default() -> Self {
        Self {
            key_prefix: None,
            max_backoff: DEFAULT_MAX_BACKOFF,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

/// A storage-backend error, tagged so the retry loop can tell a transient
/// "auto-reconnect" condition apart from a permanent failure.
pub struct MongoError {
    pub transient: bool,
    pub cause: color_eyre::Report,
}

impl MongoError {
    pub fn transient(cause: impl Into<color_eyre::Report>) -> Self {
        Self {
            transient: true,
            cause: cause.into(),
        }
    }

    pub fn permanent(cause: impl Into<color_eyre::Report>) -> Self {
        Self {
            transient: false,
            cause: cause.into(),
        }
    }
}

/// Minimal surface this storage needs from a blocking MongoDB collection.
///
/// Implementations are expected to store `{key, value, expiresAt}` documents,
/// using a caller-chosen sentinel (e.g. a far-future timestamp) for
/// `expiresAt` when `expires_in` is `None`, so the TTL index field is always
/// present.
pub trait MongoLikeCollection: Send + Sync {
    fn ensure_indexes(&self) -> Result<(), MongoError>;
    fn upsert(&self, key: &str, value: &[u8], expires_in: Option<Duration>) -> Result<(), MongoError>;
    fn find(&self, key: &str) -> Result<Option<Vec<u8>>, MongoError>;
    fn delete_one(&self, key: &str) -> Result<(), MongoError>;
    fn delete_by_key_prefix(&self, key_prefix: &str) -> Result<(), MongoError>;
}

/// Async twin of [`MongoLikeCollection`].
pub trait AsyncMongoLikeCollection: Send + Sync {
    fn ensure_indexes(&self) -> impl Future<Output = Result<(), MongoError>> + Send;
    fn upsert(
        &self,
        key: &str,
        value: &[u8],
        expires_in: Option<Duration>,
    ) -> impl Future<Output = Result<(), MongoError>> + Send;
    fn find(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, MongoError>> + Send;
    fn delete_one(&self, key: &str) -> impl Future<Output = Result<(), MongoError>> + Send;
    fn delete_by_key_prefix(
        &self,
        key_prefix: &str,
    ) -> impl Future<Output = Result<(), MongoError>> + Send;
}

fn backoff_for(base: Duration, max: Duration, failures: u32) -> Duration {
    let scaled = base.saturating_mul(1u32 << failures.min(31));
    scaled.min(max)
}

fn make_key(key_prefix: &str, key: &str) -> String {
    format!("{key_prefix}_{key}")
}

pub struct MongoStorage<C> {
    client: C,
    key_prefix: String,
    max_backoff: Duration,
    base_backoff: Duration,
    max_failures: u32,
    initialized: AtomicBool,
    init_lock: StdMutex<()>,
}

impl<C: MongoLikeCollection> MongoStorage<C> {
    pub fn new(
        client: C,
        key_prefix: Option<String>,
        max_backoff: Duration,
        base_backoff: Duration,
        max_failures: u32,
    ) -> Self {
        Self {
            client,
            key_prefix: key_prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            max_backoff,
            base_backoff,
            max_failures,
            initialized: AtomicBool::new(false),
            init_lock: StdMutex::new(()),
        }
    }

    pub fn with_options(client: C, options: MongoStorageOptions) -> Self {
        Self::new(
            client,
            options.key_prefix,
            options.max_backoff,
            options.base_backoff,
            options.max_failures,
        )
    }

    fn retry<T>(&self, mut op: impl FnMut() -> Result<T, MongoError>) -> Result<T, CacheError> {
        let mut failures = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.transient => {
                    failures += 1;
                    if failures > self.max_failures {
                        return Err(CacheError::backend(err.cause));
                    }
                    let backoff = backoff_for(self.base_backoff, self.max_backoff, failures);
                    if !backoff.is_zero() {
                        std::thread::sleep(backoff);
                    }
                }
                Err(err) => return Err(CacheError::backend(err.cause)),
            }
        }
    }

    fn ensure_initialized(&self) -> Result<(), CacheError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_lock.lock().unwrap_or_else(|p| p.into_inner());
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.retry(|| self.client.ensure_indexes()).map_err(|e| {
            CacheError::improperly_configured(format!(
                "unable to create indexes on the collection: {e}; this may happen when using an \
                 existing collection with competing indices on the same keys -- remove them or \
                 use a different collection name"
            ))
        })?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }
}

impl<C: MongoLikeCollection> Storage for MongoStorage<C> {
    #[instrument(name = "MongoStorage::set", skip(self, value))]
    fn set(&self, key: &str, value: &[u8], expires_in: Option<Duration>) -> Result<(), CacheError> {
        self.ensure_initialized()?;
        let key = make_key(&self.key_prefix, key);
        self.retry(|| self.client.upsert(&key, value, expires_in))
    }

    #[instrument(name = "MongoStorage::get", skip(self))]
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.ensure_initialized()?;
        let key = make_key(&self.key_prefix, key);
        self.retry(|| self.client.find(&key))
    }

    #[instrument(name = "MongoStorage::delete", skip(self))]
    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.ensure_initialized()?;
        let key = make_key(&self.key_prefix, key);
        self.retry(|| self.client.delete_one(&key))
    }

    #[instrument(name = "MongoStorage::delete_all", skip(self))]
    fn delete_all(&self) -> Result<(), CacheError> {
        self.ensure_initialized()?;
        self.retry(|| self.client.delete_by_key_prefix(&self.key_prefix))
    }
}

pub struct AsyncMongoStorage<C> {
    client: C,
    key_prefix: String,
    max_backoff: Duration,
    base_backoff: Duration,
    max_failures: u32,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
}

impl<C: AsyncMongoLikeCollection> AsyncMongoStorage<C> {
    pub fn new(
        client: C,
        key_prefix: Option<String>,
        max_backoff: Duration,
        base_backoff: Duration,
        max_failures: u32,
    ) -> Self {
        Self {
            client,
            key_prefix: key_prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            max_backoff,
            base_backoff,
            max_failures,
            initialized: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_options(client: C, options: MongoStorageOptions) -> Self {
        Self::new(
            client,
            options.key_prefix,
            options.max_backoff,
            options.base_backoff,
            options.max_failures,
        )
    }

    async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T, CacheError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MongoError>>,
    {
        let mut failures = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.transient => {
                    failures += 1;
                    if failures > self.max_failures {
                        return Err(CacheError::backend(err.cause));
                    }
                    let backoff = backoff_for(self.base_backoff, self.max_backoff, failures);
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                }
                Err(err) => return Err(CacheError::backend(err.cause)),
            }
        }
    }

    async fn ensure_initialized(&self) -> Result<(), CacheError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.retry(|| self.client.ensure_indexes()).await.map_err(|e| {
            CacheError::improperly_configured(format!(
                "unable to create indexes on the collection: {e}; this may happen when using an \
                 existing collection with competing indices on the same keys -- remove them or \
                 use a different collection name"
            ))
        })?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }
}

impl<C: AsyncMongoLikeCollection> AsyncStorage for AsyncMongoStorage<C> {
    #[instrument(name = "AsyncMongoStorage::set", skip(self, value))]
    async fn set(
        &self,
        key: &str,
        value: &[u8],
        expires_in: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.ensure_initialized().await?;
        let key = make_key(&self.key_prefix, key);
        self.retry(|| self.client.upsert(&key, value, expires_in)).await
    }

    #[instrument(name = "AsyncMongoStorage::get", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.ensure_initialized().await?;
        let key = make_key(&self.key_prefix, key);
        self.retry(|| self.client.find(&key)).await
    }

    #[instrument(name = "AsyncMongoStorage::delete", skip(self))]
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.ensure_initialized().await?;
        let key = make_key(&self.key_prefix, key);
        self.retry(|| self.client.delete_one(&key)).await
    }

    #[instrument(name = "AsyncMongoStorage::delete_all", skip(self))]
    async fn delete_all(&self) -> Result<(), CacheError> {
        self.ensure_initialized().await?;
        self.retry(|| self.client.delete_by_key_prefix(&self.key_prefix)).await
    }
}

impl std::fmt::Display for MongoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::collections::HashMap;

    #[test]
    fn backoff_doubles_until_capped() {
        let base = Duration::from_millis(8);
        let max = Duration::from_millis(512);
        assert_eq!(backoff_for(base, max, 1), Duration::from_millis(16));
        assert_eq!(backoff_for(base, max, 2), Duration::from_millis(32));
        assert_eq!(backoff_for(base, max, 20), max);
    }

    #[test]
    fn options_builder_fills_in_defaults() {
        let options = MongoStorageOptions::builder().key_prefix("ns".to_string()).build();
        assert_eq!(options.max_backoff, DEFAULT_MAX_BACKOFF);
        assert_eq!(options.base_backoff, DEFAULT_BASE_BACKOFF);
        assert_eq!(options.max_failures, DEFAULT_MAX_FAILURES);
    }

    struct FlakyCollection {
        entries: Mutex<HashMap<String, Vec<u8>>>,
        remaining_failures: Mutex<u32>,
    }

    impl MongoLikeCollection for FlakyCollection {
        fn ensure_indexes(&self) -> Result<(), MongoError> {
            Ok(())
        }
        fn upsert(&self, key: &str, value: &[u8], _expires_in: Option<Duration>) -> Result<(), MongoError> {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MongoError::transient(color_eyre::eyre::eyre!("auto-reconnect")));
            }
            self.entries.lock().unwrap().insert(key.to_string(), value.to_vec());
            Ok(())
        }
        fn find(&self, key: &str) -> Result<Option<Vec<u8>>, MongoError> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }
        fn delete_one(&self, key: &str) -> Result<(), MongoError> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
        fn delete_by_key_prefix(&self, key_prefix: &str) -> Result<(), MongoError> {
            self.entries.lock().unwrap().retain(|k, _| !k.starts_with(key_prefix));
            Ok(())
        }
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let storage = MongoStorage::new(
            FlakyCollection {
                entries: Mutex::new(HashMap::new()),
                remaining_failures: Mutex::new(2),
            },
            None,
            Duration::from_millis(1),
            Duration::from_micros(100),
            DEFAULT_MAX_FAILURES,
        );
        storage.set("k", b"v", None).unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn exceeding_max_failures_propagates_error() {
        let storage = MongoStorage::new(
            FlakyCollection {
                entries: Mutex::new(HashMap::new()),
                remaining_failures: Mutex::new(100),
            },
            None,
            Duration::from_millis(1),
            Duration::from_micros(100),
            2,
        );
        assert!(storage.set("k", b"v", None).is_err());
    }
}
