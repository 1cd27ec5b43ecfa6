use crate::storage::{AsyncStorage, AsyncStorageFactory, Storage, StorageFactory, StorageResult};
use crate::CacheEntry;
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;

/// In-process storage backed by a [`DashMap`].
///
/// Entries with an expiry are dropped lazily, the first time they are read
/// after their lifetime has passed. There is no size limit and no eviction.
///
/// # Examples
///
/// ```
/// use cacheval_core::{MemoryStorage, Storage};
/// use std::time::Duration;
///
/// let storage = MemoryStorage::new();
/// storage.set("k", b"v".to_vec(), Some(Duration::from_secs(60))).unwrap();
/// assert_eq!(storage.get("k").unwrap(), Some(b"v".to_vec()));
/// assert_eq!(storage.get("missing").unwrap(), None);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes `key`, returning whether it was present (expired or not).
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry now.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.entries.get(key)?;
        if !entry.is_expired() {
            return Some(entry.payload.clone());
        }
        // The read guard must be gone before removing from the same shard
        drop(entry);
        self.entries.remove_if(key, |_, entry| entry.is_expired());
        None
    }

    fn write(&self, key: &str, payload: Vec<u8>, expires_in: Option<Duration>) {
        self.entries
            .insert(key.to_string(), CacheEntry::new(payload, expires_in));
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.read(key))
    }

    fn set(&self, key: &str, value: Vec<u8>, expires_in: Option<Duration>) -> StorageResult<()> {
        self.write(key, value, expires_in);
        Ok(())
    }
}

/// [`MemoryStorage`] behind the [`AsyncStorage`] interface.
///
/// No operation actually suspends; DashMap access never blocks for long.
#[derive(Debug, Default)]
pub struct AsyncMemoryStorage {
    inner: MemoryStorage,
}

impl AsyncMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }
}

#[async_trait]
impl AsyncStorage for AsyncMemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.inner.read(key))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        expires_in: Option<Duration>,
    ) -> StorageResult<()> {
        self.inner.write(key, value, expires_in);
        Ok(())
    }
}

static DEFAULT_MEMORY_FACTORY: Lazy<StorageFactory> =
    Lazy::new(|| StorageFactory::blocking(|| Ok(Arc::new(MemoryStorage::new()) as Arc<dyn Storage>)));

static DEFAULT_ASYNC_MEMORY_FACTORY: Lazy<AsyncStorageFactory> = Lazy::new(|| {
    AsyncStorageFactory::blocking(|| Ok(Arc::new(AsyncMemoryStorage::new()) as Arc<dyn AsyncStorage>))
});

impl StorageFactory {
    /// The process-wide default: every clone resolves to the same
    /// [`MemoryStorage`] through a registry.
    pub fn memory() -> Self {
        DEFAULT_MEMORY_FACTORY.clone()
    }
}

impl AsyncStorageFactory {
    /// The process-wide default: every clone resolves to the same
    /// [`AsyncMemoryStorage`] through a registry.
    pub fn memory() -> Self {
        DEFAULT_ASYNC_MEMORY_FACTORY.clone()
    }
}
