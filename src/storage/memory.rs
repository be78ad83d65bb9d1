//! In-memory storage backend, process-local and never persisted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::instrument;

use crate::envelope::Envelope;
use crate::error::CacheError;

use super::{AsyncStorage, Storage};

/// Blocking in-memory storage. Cheap to construct; typically wrapped as a
/// singleton by a storage factory so that multiple decorated functions share
/// one table.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Envelope>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    #[instrument(name = "MemoryStorage::set", skip(self, value))]
    fn set(&self, key: &str, value: &[u8], expires_in: Option<Duration>) -> Result<(), CacheError> {
        let envelope = Envelope::new(value.to_vec(), expires_in)?;
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(key.to_string(), envelope);
        Ok(())
    }

    #[instrument(name = "MemoryStorage::get", skip(self))]
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|poison| poison.into_inner());
        match entries.get(key) {
            Some(envelope) if envelope.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(envelope) => Ok(Some(envelope.data().to_vec())),
            None => Ok(None),
        }
    }

    #[instrument(name = "MemoryStorage::delete", skip(self))]
    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(key);
        Ok(())
    }

    #[instrument(name = "MemoryStorage::delete_all", skip(self))]
    fn delete_all(&self) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clear();
        Ok(())
    }
}

/// Async in-memory storage, identical semantics under a `tokio::sync::Mutex`.
#[derive(Default)]
pub struct AsyncMemoryStorage {
    entries: tokio::sync::Mutex<HashMap<String, Envelope>>,
}

impl AsyncMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AsyncStorage for AsyncMemoryStorage {
    #[instrument(name = "AsyncMemoryStorage::set", skip(self, value))]
    async fn set(
        &self,
        key: &str,
        value: &[u8],
        expires_in: Option<Duration>,
    ) -> Result<(), CacheError> {
        let envelope = Envelope::new(value.to_vec(), expires_in)?;
        self.entries.lock().await.insert(key.to_string(), envelope);
        Ok(())
    }

    #[instrument(name = "AsyncMemoryStorage::get", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(envelope) if envelope.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(envelope) => Ok(Some(envelope.data().to_vec())),
            None => Ok(None),
        }
    }

    #[instrument(name = "AsyncMemoryStorage::delete", skip(self))]
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    #[instrument(name = "AsyncMemoryStorage::delete_all", skip(self))]
    async fn delete_all(&self) -> Result<(), CacheError> {
        self.entries.lock().await.clear();
        Ok(())
    }
}
