//! Redis-backed storage over an opaque key/value client.
//!
//! The concrete Redis wire client is out of scope for this crate; callers
//! supply anything implementing [`RedisLikeClient`] / [`AsyncRedisLikeClient`]
//! (a thin adapter over whichever Redis crate they already depend on).

use std::time::Duration;

use tracing::instrument;

use crate::error::CacheError;

use super::{AsyncStorage, Storage, DEFAULT_KEY_PREFIX};

/// Minimal surface this storage needs from a blocking Redis client.
pub trait RedisLikeClient: Send + Sync {
    fn set(&self, key: &str, value: &[u8], expires_in: Option<Duration>) -> Result<(), CacheError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    fn del(&self, key: &str) -> Result<(), CacheError>;
    /// Delete every key matching `pattern` (a `SCAN` + `UNLINK` style bulk
    /// delete, as opposed to the blocking `KEYS` command).
    fn delete_matching(&self, pattern: &str) -> Result<(), CacheError>;
}

/// Async twin of [`RedisLikeClient`].
pub trait AsyncRedisLikeClient: Send + Sync {
    fn set(
        &self,
        key: &str,
        value: &[u8],
        expires_in: Option<Duration>,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send;
    fn del(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
    fn delete_matching(&self, pattern: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}

fn make_key(key_prefix: &str, key: &str) -> String {
    format!("{key_prefix}:{key}")
}

fn delete_all_pattern(key_prefix: &str) -> String {
    format!("{key_prefix}*:*")
}

pub struct RedisStorage<C> {
    client: C,
    key_prefix: String,
}

impl<C: RedisLikeClient> RedisStorage<C> {
    pub fn new(client: C, key_prefix: Option<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
        }
    }
}

impl<C: RedisLikeClient> Storage for RedisStorage<C> {
    #[instrument(name = "RedisStorage::set", skip(self, value))]
    fn set(&self, key: &str, value: &[u8], expires_in: Option<Duration>) -> Result<(), CacheError> {
        self.client.set(&make_key(&self.key_prefix, key), value, expires_in)
    }

    #[instrument(name = "RedisStorage::get", skip(self))]
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.client.get(&make_key(&self.key_prefix, key))
    }

    #[instrument(name = "RedisStorage::delete", skip(self))]
    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.client.del(&make_key(&self.key_prefix, key))
    }

    #[instrument(name = "RedisStorage::delete_all", skip(self))]
    fn delete_all(&self) -> Result<(), CacheError> {
        self.client.delete_matching(&delete_all_pattern(&self.key_prefix))
    }
}

pub struct AsyncRedisStorage<C> {
    client: C,
    key_prefix: String,
}

impl<C: AsyncRedisLikeClient> AsyncRedisStorage<C> {
    pub fn new(client: C, key_prefix: Option<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
        }
    }
}

impl<C: AsyncRedisLikeClient> AsyncStorage for AsyncRedisStorage<C> {
    #[instrument(name = "AsyncRedisStorage::set", skip(self, value))]
    async fn set(
        &self,
        key: &str,
        value: &[u8],
        expires_in: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.client
            .set(&make_key(&self.key_prefix, key), value, expires_in)
            .await
    }

    #[instrument(name = "AsyncRedisStorage::get", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.client.get(&make_key(&self.key_prefix, key)).await
    }

    #[instrument(name = "AsyncRedisStorage::delete", skip(self))]
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.client.del(&make_key(&self.key_prefix, key)).await
    }

    #[instrument(name = "AsyncRedisStorage::delete_all", skip(self))]
    async fn delete_all(&self) -> Result<(), CacheError> {
        self.client
            .delete_matching(&delete_all_pattern(&self.key_prefix))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeRedis {
        entries: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl RedisLikeClient for FakeRedis {
        fn set(&self, key: &str, value: &[u8], _expires_in: Option<Duration>) -> Result<(), CacheError> {
            self.entries.lock().unwrap().insert(key.to_string(), value.to_vec());
            Ok(())
        }
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }
        fn del(&self, key: &str) -> Result<(), CacheError> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
        fn delete_matching(&self, pattern: &str) -> Result<(), CacheError> {
            let prefix = pattern.trim_end_matches('*');
            self.entries.lock().unwrap().retain(|k, _| !k.starts_with(prefix));
            Ok(())
        }
    }

    #[test]
    fn set_then_get_round_trips_with_prefix() {
        let storage = RedisStorage::new(FakeRedis::default(), None);
        storage.set("k", b"v", None).unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(b"v".to_vec()));
        assert!(storage.client.entries.lock().unwrap().contains_key("cachex:k"));
    }

    #[test]
    fn delete_all_matches_key_prefix_namespace() {
        let storage = RedisStorage::new(FakeRedis::default(), Some("ns".to_string()));
        storage.set("a", b"1", None).unwrap();
        storage.delete_all().unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
    }
}
