//! Persistent key/value tier.
//!
//! A string-keyed, string-valued area with a practical size quota, the
//! native analogue of a browser's origin-scoped local storage. All calls are
//! synchronous from the engine's point of view.

use std::collections::BTreeMap;
use std::sync::RwLock;

use stride_core::{StorageError, StrideError, StrideResult};

/// Persistent key/value area used as the cache's second tier.
pub trait PersistentStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> StrideResult<Option<String>>;

    /// Write a value. Fails with [`StorageError::QuotaExceeded`] when the
    /// write would not fit.
    fn set(&self, key: &str, value: &str) -> StrideResult<()>;

    /// Remove a value. Returns whether the key existed.
    fn remove(&self, key: &str) -> StrideResult<bool>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    fn clear_namespace(&self, prefix: &str) -> StrideResult<usize>;

    /// Every key currently stored.
    fn list_keys(&self) -> StrideResult<Vec<String>>;
}

/// In-process persistent store with a byte quota.
///
/// Usage is counted as the sum of key and value lengths, mirroring how
/// browsers account local storage.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    quota_bytes: usize,
}

impl MemoryStore {
    /// Create a store holding at most `quota_bytes`.
    pub fn new(quota_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            quota_bytes,
        }
    }

    /// Bytes currently in use.
    pub fn used_bytes(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.iter().map(|(k, v)| k.len() + v.len()).sum())
            .unwrap_or(0)
    }

    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(stride_core::DEFAULT_PERSISTENT_QUOTA_BYTES)
    }
}

fn poisoned<T>(_: T) -> StrideError {
    StrideError::Storage(StorageError::LockPoisoned)
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> StrideResult<Option<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StrideResult<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;

        let used: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
        let existing = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
        let needed = key.len() + value.len();
        let available = self.quota_bytes.saturating_sub(used - existing);

        if needed > available {
            return Err(StrideError::Storage(StorageError::QuotaExceeded {
                key: key.to_string(),
                needed,
                available,
            }));
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StrideResult<bool> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        Ok(entries.remove(key).is_some())
    }

    fn clear_namespace(&self, prefix: &str) -> StrideResult<usize> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }

    fn list_keys(&self) -> StrideResult<Vec<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.keys().cloned().collect())
    }
}
