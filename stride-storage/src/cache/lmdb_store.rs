//! LMDB-backed persistent tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to give the cache a
//! disk-resident second tier that survives restarts. The LMDB map size is
//! the store's quota: a write that does not fit fails with
//! [`StorageError::QuotaExceeded`], which the engine logs and skips.

use std::path::Path;

use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions, MdbError};
use stride_core::{StorageError, StrideError, StrideResult};

use super::store::PersistentStore;

const PAGE_SIZE: usize = 4096;

/// Error type for LMDB store setup.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StrideError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Io(io) => StrideError::Storage(StorageError::Io {
                reason: io.to_string(),
            }),
            other => StrideError::Storage(StorageError::TransactionFailed {
                reason: other.to_string(),
            }),
        }
    }
}

fn txn_error(e: heed::Error) -> StrideError {
    StrideError::Storage(StorageError::TransactionFailed {
        reason: e.to_string(),
    })
}

/// LMDB-backed [`PersistentStore`].
///
/// # Example
///
/// ```ignore
/// use stride_storage::cache::{LmdbStore, PersistentStore};
///
/// let store = LmdbStore::open("/tmp/stride-cache", 5 * 1024 * 1024)?;
/// store.set("stride_cache_goals:uid-1", "{...}")?;
/// ```
pub struct LmdbStore {
    env: Env,
    db: Database<Str, Str>,
    quota_bytes: usize,
}

impl LmdbStore {
    /// Open (or create) a store at `path` with a quota of `quota_bytes`.
    ///
    /// The quota is rounded up to a whole number of pages.
    pub fn open<P: AsRef<Path>>(path: P, quota_bytes: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let map_size = quota_bytes.div_ceil(PAGE_SIZE).max(1) * PAGE_SIZE;

        // SAFETY: the environment is opened once per path by this process and
        // never concurrently truncated.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            quota_bytes: map_size,
        })
    }

    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    fn keys_matching(&self, prefix: &str) -> StrideResult<Vec<String>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let iter = self.db.iter(&rtxn).map_err(txn_error)?;

        let mut keys = Vec::new();
        for result in iter {
            match result {
                Ok((key, _)) if key.starts_with(prefix) => keys.push(key.to_string()),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable LMDB record");
                }
            }
        }
        Ok(keys)
    }
}

impl PersistentStore for LmdbStore {
    fn get(&self, key: &str) -> StrideResult<Option<String>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let value = self.db.get(&rtxn, key).map_err(txn_error)?;
        Ok(value.map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> StrideResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        let put = self
            .db
            .put(&mut wtxn, key, value)
            .and_then(|()| wtxn.commit());

        match put {
            Ok(()) => Ok(()),
            Err(heed::Error::Mdb(MdbError::MapFull)) => {
                Err(StrideError::Storage(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed: key.len() + value.len(),
                    available: self.quota_bytes,
                }))
            }
            Err(e) => Err(txn_error(e)),
        }
    }

    fn remove(&self, key: &str) -> StrideResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    fn clear_namespace(&self, prefix: &str) -> StrideResult<usize> {
        let keys = self.keys_matching(prefix)?;

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0usize;
        for key in &keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;

        Ok(deleted)
    }

    fn list_keys(&self) -> StrideResult<Vec<String>> {
        self.keys_matching("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store(quota: usize) -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(temp_dir.path(), quota).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp_dir) = create_test_store(1024 * 1024);

        store
            .set("stride_cache_goals:uid-1", "{\"items\":[]}")
            .expect("set should succeed");

        let value = store
            .get("stride_cache_goals:uid-1")
            .expect("get should succeed");
        assert_eq!(value.as_deref(), Some("{\"items\":[]}"));
    }

    #[test]
    fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store(1024 * 1024);
        assert!(store.get("missing").expect("get should succeed").is_none());
    }

    #[test]
    fn test_overwrite() {
        let (store, _temp_dir) = create_test_store(1024 * 1024);
        store.set("k", "v1").expect("set should succeed");
        store.set("k", "v2").expect("set should succeed");
        assert_eq!(store.get("k").expect("get").as_deref(), Some("v2"));
    }

    #[test]
    fn test_remove() {
        let (store, _temp_dir) = create_test_store(1024 * 1024);
        store.set("k", "v").expect("set should succeed");
        assert!(store.remove("k").expect("remove should succeed"));
        assert!(!store.remove("k").expect("remove should succeed"));
        assert!(store.get("k").expect("get").is_none());
    }

    #[test]
    fn test_clear_namespace_and_list() {
        let (store, _temp_dir) = create_test_store(1024 * 1024);
        store.set("stride_cache_a", "1").expect("set");
        store.set("stride_cache_b", "2").expect("set");
        store.set("stride_auth_token", "3").expect("set");

        let removed = store
            .clear_namespace("stride_cache_")
            .expect("clear should succeed");
        assert_eq!(removed, 2);
        assert_eq!(
            store.list_keys().expect("list"),
            vec!["stride_auth_token".to_string()]
        );
    }

    #[test]
    fn test_map_full_is_quota_exceeded() {
        let (store, _temp_dir) = create_test_store(64 * 1024);
        let big = "x".repeat(256 * 1024);

        let err = store.set("big", &big).expect_err("value larger than map");
        assert!(matches!(
            err,
            StrideError::Storage(StorageError::QuotaExceeded { .. })
        ));

        // Store remains usable after a failed write
        store.set("small", "ok").expect("small write should succeed");
        assert_eq!(store.get("small").expect("get").as_deref(), Some("ok"));
    }
}
