//! Two-tier client cache with user-scoped isolation.
//!
//! A bounded memory tier sits in front of a string-keyed [`PersistentStore`].
//! Entries carry a TTL and optional tags; reads can serve stale data while a
//! single background refresh runs; concurrent misses for the same key share
//! one fetch.
//!
//! # User Isolation
//!
//! [`CacheKey`] values can only be produced by the builders in [`keys`], and
//! every builder takes a [`stride_core::UserId`]. Every key therefore embeds
//! its owner, which is what makes [`CacheEngine::invalidate_by_user`] a
//! complete purge.
//!
//! # Example
//!
//! ```ignore
//! let engine = CacheEngine::new(CacheConfig::default(), store, clock)?;
//! let key = keys::goals(&user_id);
//!
//! let goals: GoalList = engine
//!     .get_or_fetch(&key, move || fetch_goals(remote, user_id), CacheOptions::new()
//!         .with_ttl(Duration::from_secs(600))
//!         .persisted()
//!         .stale_while_revalidate())
//!     .await?;
//! ```

pub mod engine;
pub mod entry;
pub mod keys;
pub mod lmdb_store;
pub mod options;
pub mod stats;
pub mod store;
pub mod sweep;

pub use engine::CacheEngine;
pub use entry::CacheEntry;
pub use keys::{CacheKey, DataKind};
pub use lmdb_store::{LmdbStore, LmdbStoreError};
pub use options::CacheOptions;
pub use stats::CacheStats;
pub use store::{MemoryStore, PersistentStore};
pub use sweep::{sweep_task, SweepMetrics, SweepSnapshot, SweeperHandle};
