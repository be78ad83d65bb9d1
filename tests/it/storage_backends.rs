use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use fncache::storage::file::FileStorage;
use fncache::storage::memory::MemoryStorage;
use fncache::storage::redis::{RedisLikeClient, RedisStorage};
use fncache::storage::Storage;
use pretty_assertions::assert_eq;

use crate::temporary_directory;

#[derive(Default)]
struct FakeRedis {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl RedisLikeClient for FakeRedis {
    fn set(
        &self,
        key: &str,
        value: &[u8],
        _expires_in: Option<Duration>,
    ) -> Result<(), fncache::CacheError> {
        self.entries.lock().unwrap().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, fncache::CacheError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn del(&self, key: &str) -> Result<(), fncache::CacheError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn delete_matching(&self, pattern: &str) -> Result<(), fncache::CacheError> {
        let prefix = pattern.trim_end_matches('*');
        self.entries.lock().unwrap().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

fn exercise(storage: &dyn Storage) {
    assert_eq!(storage.get("missing").unwrap(), None);

    storage.set("a", b"hello", None).unwrap();
    assert_eq!(storage.get("a").unwrap(), Some(b"hello".to_vec()));

    storage.delete("a").unwrap();
    assert_eq!(storage.get("a").unwrap(), None);

    storage.set("b", b"one", None).unwrap();
    storage.set("c", b"two", None).unwrap();
    storage.delete_all().unwrap();
    assert_eq!(storage.get("b").unwrap(), None);
    assert_eq!(storage.get("c").unwrap(), None);
}

#[test]
fn every_blocking_backend_honors_the_same_get_set_delete_contract() {
    exercise(&MemoryStorage::new());

    let (_dir, root) = temporary_directory();
    exercise(&FileStorage::new(root, "cachex"));

    exercise(&RedisStorage::new(FakeRedis::default(), None));
}

#[test]
fn entries_past_their_ttl_read_back_as_absent() {
    let storage = MemoryStorage::new();
    storage.set("short-lived", b"v", Some(Duration::from_millis(1))).unwrap();
    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(storage.get("short-lived").unwrap(), None);

    let (_dir, root) = temporary_directory();
    let file_storage = FileStorage::new(root, "cachex");
    file_storage
        .set("short-lived", b"v", Some(Duration::from_millis(1)))
        .unwrap();
    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(file_storage.get("short-lived").unwrap(), None);
}

#[test]
fn file_storage_persists_across_instances_sharing_a_root() {
    let (_dir, root) = temporary_directory();
    let writer = FileStorage::new(root.clone(), "cachex");
    writer.set("durable", b"payload", None).unwrap();

    let reader = FileStorage::new(root, "cachex");
    assert_eq!(reader.get("durable").unwrap(), Some(b"payload".to_vec()));
}
