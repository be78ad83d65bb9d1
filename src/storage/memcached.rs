//! Memcached-backed storage over an opaque key/value client.
//!
//! As in the system this crate's storage layer is modeled on, a Memcached
//! client has no way to delete a single virtual namespace; `delete_all`
//! flushes the entire backend.

use std::time::Duration;

use tracing::instrument;

use crate::error::CacheError;

use super::{AsyncStorage, Storage};

pub trait MemcachedLikeClient: Send + Sync {
    fn set(&self, key: &str, value: &[u8], expire_seconds: u32) -> Result<(), CacheError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    fn delete(&self, key: &str) -> Result<(), CacheError>;
    fn flush_all(&self) -> Result<(), CacheError>;
}

pub trait AsyncMemcachedLikeClient: Send + Sync {
    fn set(
        &self,
        key: &str,
        value: &[u8],
        expire_seconds: u32,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send;
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
    fn flush_all(&self) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Rounds a [`Duration`] up to whole seconds, since Memcached's TTL
/// resolution is one second.
fn ceil_seconds(expires_in: Option<Duration>) -> u32 {
    match expires_in {
        None => 0,
        Some(d) => {
            let whole = d.as_secs();
            let has_remainder = d.subsec_nanos() > 0;
            (whole + u64::from(has_remainder)) as u32
        }
    }
}

pub struct MemcachedStorage<C> {
    client: C,
}

impl<C: MemcachedLikeClient> MemcachedStorage<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: MemcachedLikeClient> Storage for MemcachedStorage<C> {
    #[instrument(name = "MemcachedStorage::set", skip(self, value))]
    fn set(&self, key: &str, value: &[u8], expires_in: Option<Duration>) -> Result<(), CacheError> {
        self.client.set(key, value, ceil_seconds(expires_in))
    }

    #[instrument(name = "MemcachedStorage::get", skip(self))]
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.client.get(key)
    }

    #[instrument(name = "MemcachedStorage::delete", skip(self))]
    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.client.delete(key)
    }

    #[instrument(name = "MemcachedStorage::delete_all", skip(self))]
    fn delete_all(&self) -> Result<(), CacheError> {
        self.client.flush_all()
    }
}

pub struct AsyncMemcachedStorage<C> {
    client: C,
}

impl<C: AsyncMemcachedLikeClient> AsyncMemcachedStorage<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: AsyncMemcachedLikeClient> AsyncStorage for AsyncMemcachedStorage<C> {
    #[instrument(name = "AsyncMemcachedStorage::set", skip(self, value))]
    async fn set(
        &self,
        key: &str,
        value: &[u8],
        expires_in: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.client.set(key, value, ceil_seconds(expires_in)).await
    }

    #[instrument(name = "AsyncMemcachedStorage::get", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.client.get(key).await
    }

    #[instrument(name = "AsyncMemcachedStorage::delete", skip(self))]
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.client.delete(key).await
    }

    #[instrument(name = "AsyncMemcachedStorage::delete_all", skip(self))]
    async fn delete_all(&self) -> Result<(), CacheError> {
        self.client.flush_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ceil_seconds_rounds_up_fractional_durations() {
        assert_eq!(ceil_seconds(None), 0);
        assert_eq!(ceil_seconds(Some(Duration::from_secs(5))), 5);
        assert_eq!(ceil_seconds(Some(Duration::from_millis(5500))), 6);
    }
}
