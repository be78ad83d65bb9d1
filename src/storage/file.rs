//! Filesystem-backed storage. One file per key, written atomically.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{instrument, warn};
use unicode_normalization::UnicodeNormalization;

use crate::envelope::Envelope;
use crate::error::CacheError;

use super::{AsyncStorage, Storage};

/// Maps a cache key to a filesystem-safe file name: NFKD-normalize, then
/// replace every non-alphanumeric code point with its decimal code point.
/// Deterministic and collision-free for the ASCII hex keys this crate
/// produces; safe for arbitrary keys too.
fn safe_file_name(key: &str) -> String {
    key.nfkd()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_string()
            } else {
                (c as u32).to_string()
            }
        })
        .collect()
}

fn entry_path(root: &Path, key_prefix: &str, key: &str) -> PathBuf {
    root.join(key_prefix).join(safe_file_name(key))
}

/// Blocking file storage rooted at a directory.
pub struct FileStorage {
    root: PathBuf,
    key_prefix: String,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>, key_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            key_prefix: key_prefix.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        entry_path(&self.root, &self.key_prefix, key)
    }
}

impl Storage for FileStorage {
    #[instrument(name = "FileStorage::set", skip(self, value))]
    fn set(&self, key: &str, value: &[u8], expires_in: Option<Duration>) -> Result<(), CacheError> {
        let envelope = Envelope::new(value.to_vec(), expires_in)?;
        let path = self.path_for(key);
        let Some(parent) = path.parent() else {
            return Ok(());
        };

        // Best-effort: a write failure here means a later read simply
        // recomputes and retries, so we log and move on rather than
        // surfacing the error to the caller.
        let result = (|| -> Result<(), CacheError> {
            std::fs::create_dir_all(parent).map_err(CacheError::backend)?;
            let bytes = envelope.to_bytes()?;
            let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(CacheError::backend)?;
            use std::io::Write;
            temp.write_all(&bytes).map_err(CacheError::backend)?;
            temp.persist(&path).map_err(|e| CacheError::backend(e.error))?;
            Ok(())
        })();

        if let Err(err) = result {
            warn!(?err, key, "failed to write file storage entry");
        }
        Ok(())
    }

    #[instrument(name = "FileStorage::get", skip(self))]
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheError::backend(err)),
        };
        let Ok(envelope) = Envelope::from_bytes(&bytes) else {
            return Ok(None);
        };
        if envelope.expired() {
            let _ = std::fs::remove_file(&path);
            return Ok(None);
        }
        Ok(Some(envelope.into_data()))
    }

    #[instrument(name = "FileStorage::delete", skip(self))]
    fn delete(&self, key: &str) -> Result<(), CacheError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::backend(err)),
        }
    }

    #[instrument(name = "FileStorage::delete_all", skip(self))]
    fn delete_all(&self) -> Result<(), CacheError> {
        let dir = self.root.join(&self.key_prefix);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::backend(err)),
        }
    }
}

/// Async file storage. Spawns the blocking filesystem calls onto the Tokio
/// blocking pool, same as the filesystem helpers elsewhere in this crate's
/// ambient stack.
pub struct AsyncFileStorage {
    root: PathBuf,
    key_prefix: String,
}

impl AsyncFileStorage {
    pub fn new(root: impl Into<PathBuf>, key_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            key_prefix: key_prefix.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        entry_path(&self.root, &self.key_prefix, key)
    }
}

impl AsyncStorage for AsyncFileStorage {
    #[instrument(name = "AsyncFileStorage::set", skip(self, value))]
    async fn set(
        &self,
        key: &str,
        value: &[u8],
        expires_in: Option<Duration>,
    ) -> Result<(), CacheError> {
        let envelope = Envelope::new(value.to_vec(), expires_in)?;
        let path = self.path_for(key);

        let result: Result<(), CacheError> = (|| async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(CacheError::backend)?;
            }
            let bytes = envelope.to_bytes()?;
            let parent = path.parent().unwrap_or(&self.root).to_owned();
            let target = path.clone();
            tokio::task::spawn_blocking(move || -> Result<(), CacheError> {
                use std::io::Write;
                let mut temp =
                    tempfile::NamedTempFile::new_in(&parent).map_err(CacheError::backend)?;
                temp.write_all(&bytes).map_err(CacheError::backend)?;
                temp.persist(&target)
                    .map_err(|e| CacheError::backend(e.error))?;
                Ok(())
            })
            .await
            .map_err(CacheError::backend)??;
            Ok(())
        })()
        .await;

        if let Err(err) = result {
            warn!(?err, key, "failed to write file storage entry");
        }
        Ok(())
    }

    #[instrument(name = "AsyncFileStorage::get", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheError::backend(err)),
        };
        let Ok(envelope) = Envelope::from_bytes(&bytes) else {
            return Ok(None);
        };
        if envelope.expired() {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(envelope.into_data()))
    }

    #[instrument(name = "AsyncFileStorage::delete", skip(self))]
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::backend(err)),
        }
    }

    #[instrument(name = "AsyncFileStorage::delete_all", skip(self))]
    async fn delete_all(&self) -> Result<(), CacheError> {
        let dir = self.root.join(&self.key_prefix);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::backend(err)),
        }
    }
}
