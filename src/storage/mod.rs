//! Pluggable storage backends.
//!
//! [`Storage`] is the blocking contract; [`AsyncStorage`] is its async
//! twin, expressed the same way the rest of this crate's ambient async code
//! is (an `impl Future` return rather than the `async-trait` crate). Every
//! implementation stores an [`Envelope`](crate::envelope::Envelope), so TTL
//! handling is uniform across backends.

pub mod file;
pub mod memcached;
pub mod memory;
pub mod mongo;
pub mod redis;

use std::time::Duration;

use crate::error::CacheError;

/// Blocking storage contract.
pub trait Storage: Send + Sync {
    /// Store `value` under `key`, expiring after `expires_in` if given.
    fn set(&self, key: &str, value: &[u8], expires_in: Option<Duration>) -> Result<(), CacheError>;

    /// Fetch the value stored under `key`, or `None` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Remove the value stored under `key`. A no-op if it does not exist.
    fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every value in this instance's key namespace.
    fn delete_all(&self) -> Result<(), CacheError>;
}

/// Async storage contract. Semantically identical to [`Storage`].
pub trait AsyncStorage: Send + Sync {
    fn set(
        &self,
        key: &str,
        value: &[u8],
        expires_in: Option<Duration>,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn delete_all(&self) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Default namespace prefix used by backends that key-prefix their storage
/// (Redis, Memcached-adjacent, Mongo).
pub const DEFAULT_KEY_PREFIX: &str = "cachex";
