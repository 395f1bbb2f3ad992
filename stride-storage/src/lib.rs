//! Stride Storage - Cache Engine and Store Adapters
//!
//! The two-tier cache engine, the user-scoped key builder, the persistent
//! tier adapters (in-process and LMDB) and an in-process remote document
//! store.

pub mod cache;
pub mod remote;

pub use cache::{
    keys, CacheEngine, CacheEntry, CacheKey, CacheOptions, CacheStats, DataKind, LmdbStore,
    LmdbStoreError, MemoryStore, PersistentStore, SweepSnapshot, SweeperHandle,
};
pub use remote::InMemoryRemoteStore;
