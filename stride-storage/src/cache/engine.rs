//! Two-tier cache engine.
//!
//! A bounded memory tier in front of a [`PersistentStore`], with TTL expiry,
//! stale-while-revalidate, tag and user-scoped invalidation, and a
//! single-flight gate so that at most one fetch per key is in flight.
//!
//! Values are held as `serde_json::Value`; callers read and write their own
//! types and the engine converts at the boundary. Locks are `std` mutexes and
//! are never held across an `.await`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use stride_core::{
    CacheConfig, CacheError, Clock, FetchError, StrideError, StrideResult, SystemClock, UserId,
};

use super::entry::CacheEntry;
use super::keys::{self, CacheKey};
use super::options::CacheOptions;
use super::stats::{CacheStats, StatsCounters};
use super::store::PersistentStore;

type SharedFetch = Shared<BoxFuture<'static, StrideResult<Value>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MEMORY TIER
// ============================================================================

struct Slot {
    seq: u64,
    entry: CacheEntry,
}

/// Bounded map that evicts in insertion order.
#[derive(Default)]
struct MemoryTier {
    entries: HashMap<String, Slot>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl MemoryTier {
    fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key).map(|slot| &slot.entry)
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert or replace. A replaced key keeps its original position.
    /// Returns the key evicted to make room, if any.
    fn insert(&mut self, key: String, entry: CacheEntry, capacity: usize) -> Option<String> {
        if let Some(slot) = self.entries.get_mut(&key) {
            slot.entry = entry;
            return None;
        }

        let mut evicted = None;
        if self.entries.len() >= capacity {
            if let Some((_, oldest)) = self.order.pop_first() {
                self.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(key, Slot { seq, entry });
        evicted
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.seq);
        Some(slot.entry)
    }

    /// Remove every entry the predicate rejects. Returns the removed keys.
    fn retain(&mut self, mut keep: impl FnMut(&str, &CacheEntry) -> bool) -> Vec<String> {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, slot)| !keep(key, &slot.entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed
    }

    fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.order.clear();
        n
    }
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Clone)]
struct PendingFetch {
    generation: u64,
    future: SharedFetch,
    /// Started by a stale hit; readers may keep serving the stale entry.
    background: bool,
}

struct EngineInner {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn PersistentStore>,
    memory: Mutex<MemoryTier>,
    pending: Mutex<HashMap<String, PendingFetch>>,
    next_generation: AtomicU64,
    stats: StatsCounters,
}

/// The cache engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("namespace", &self.inner.config.storage_namespace)
            .field("memory_capacity", &self.inner.config.memory_capacity)
            .finish_non_exhaustive()
    }
}

impl CacheEngine {
    /// Create an engine over `store`, validating `config`.
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
    ) -> StrideResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                clock,
                store,
                memory: Mutex::new(MemoryTier::default()),
                pending: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                stats: StatsCounters::default(),
            }),
        })
    }

    /// Engine with default configuration and the system clock.
    pub fn with_store(store: Arc<dyn PersistentStore>) -> StrideResult<Self> {
        Self::new(CacheConfig::default(), store, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// The persistent tier this engine mirrors into.
    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.inner.store
    }

    /// Persisted key for a cache key.
    pub fn storage_key(&self, key: &str) -> String {
        self.inner.storage_key(key)
    }

    /// Read a value from either tier.
    ///
    /// Returns `None` on a miss, on expiry, or when the stored value does not
    /// decode as `T` (the entry is then removed).
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let entry = self.inner.lookup(key.as_str())?;
        self.inner.decode(key.as_str(), entry.data)
    }

    /// Write a value. Persistence failures are logged, never raised.
    pub fn set<T: Serialize + ?Sized>(&self, key: &CacheKey, data: &T, options: &CacheOptions) {
        match serde_json::to_value(data) {
            Ok(value) => self.inner.write(key.as_str(), value, options),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Value not serializable; not cached");
            }
        }
    }

    /// Read-through with single-flight de-duplication.
    ///
    /// Callers arriving while a fetch for `key` is in flight share its result.
    /// With `stale_while_revalidate`, a stale hit is returned immediately and
    /// one detached refresh is started; the refresh occupies the key's
    /// pending slot, so a miss during it joins the refresh. Fetcher errors
    /// propagate and nothing is cached.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetcher: F,
        options: CacheOptions,
    ) -> StrideResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StrideResult<T>> + Send + 'static,
    {
        let raw = key.as_str();

        if let Some(pending) = self.inner.pending_for(raw) {
            if pending.background {
                let cached = self
                    .inner
                    .lookup(raw)
                    .and_then(|entry| self.inner.decode::<T>(raw, entry.data));
                if let Some(value) = cached {
                    return Ok(value);
                }
            }
            tracing::trace!(key = %key, "Joining in-flight fetch");
            let value = pending.future.await?;
            return self.inner.decode_fetched(raw, value);
        }

        if let Some(entry) = self.inner.lookup(raw) {
            let stale = options.stale_while_revalidate
                && entry.is_stale(self.inner.clock.now_ms(), self.inner.config.stale_fraction);
            if let Some(value) = self.inner.decode::<T>(raw, entry.data) {
                if stale {
                    self.inner.spawn_refresh(raw, fetcher, options);
                }
                return Ok(value);
            }
        }

        let value = self.inner.start_fetch(raw, fetcher, options, false).await?;
        self.inner.decode_fetched(raw, value)
    }

    /// Populate `key` in the background of the caller's flow.
    ///
    /// A no-op on a hit. Fetch failures are logged, not returned.
    pub async fn prefetch<T, F, Fut>(&self, key: &CacheKey, fetcher: F, options: CacheOptions)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StrideResult<T>> + Send + 'static,
    {
        let raw = key.as_str();
        if self.inner.lookup(raw).is_some() {
            tracing::trace!(key = %key, "Prefetch skipped; already cached");
            return;
        }

        let result = match self.inner.pending_for(raw) {
            Some(pending) => pending.future.await,
            None => self.inner.start_fetch(raw, fetcher, options, false).await,
        };

        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Prefetch failed");
        }
    }

    /// Invalidate by exact key, or else by tag / key prefix.
    ///
    /// An exact key removes that one entry from both tiers. Anything else
    /// removes memory entries carrying the tag or whose key starts with the
    /// argument, and persisted entries whose key contains it or that carry
    /// the tag. Matching is segment-aligned. Returns the number of distinct
    /// keys removed.
    pub fn invalidate(&self, key_or_tag: &str) -> StrideResult<usize> {
        let inner = &self.inner;
        let storage_key = inner.storage_key(key_or_tag);

        let in_memory = lock(&inner.memory).contains(key_or_tag);
        if in_memory || inner.store.get(&storage_key)?.is_some() {
            lock(&inner.memory).remove(key_or_tag);
            inner.store.remove(&storage_key)?;
            tracing::debug!(key = %key_or_tag, "Invalidated entry");
            return Ok(1);
        }

        let mut removed: BTreeSet<String> = lock(&inner.memory)
            .retain(|key, entry| {
                !(entry.has_tag(key_or_tag) || keys::has_segment_prefix(key, key_or_tag))
            })
            .into_iter()
            .collect();

        for persisted in inner.persisted_keys()? {
            let raw = &persisted[inner.config.storage_namespace.len()..];
            let matches = keys::segments_contain(raw, key_or_tag)
                || inner.persisted_has_tag(&persisted, key_or_tag);
            if matches {
                inner.store.remove(&persisted)?;
                removed.insert(raw.to_string());
            }
        }

        tracing::debug!(pattern = %key_or_tag, removed = removed.len(), "Invalidated by tag/prefix");
        Ok(removed.len())
    }

    /// Remove every entry, in both tiers, whose key belongs to `user_id`.
    ///
    /// In-flight fetches for that user's keys are forgotten first, so their
    /// results reach their callers but are never cached. Idempotent.
    pub fn invalidate_by_user(&self, user_id: &UserId) -> StrideResult<usize> {
        let inner = &self.inner;

        lock(&inner.pending).retain(|key, _| !keys::owned_by(key, user_id));

        let mut removed: BTreeSet<String> = lock(&inner.memory)
            .retain(|key, _| !keys::owned_by(key, user_id))
            .into_iter()
            .collect();

        for persisted in inner.persisted_keys()? {
            let raw = &persisted[inner.config.storage_namespace.len()..];
            if keys::owned_by(raw, user_id) {
                inner.store.remove(&persisted)?;
                removed.insert(raw.to_string());
            }
        }

        tracing::info!(user_id = %user_id, removed = removed.len(), "Purged user entries");
        Ok(removed.len())
    }

    /// Empty the memory tier, the pending-fetch table, and the namespace.
    ///
    /// The memory tier is emptied even if the persistent tier fails.
    pub fn clear_all(&self) -> StrideResult<()> {
        let inner = &self.inner;
        lock(&inner.pending).clear();
        let memory = lock(&inner.memory).clear();

        let persisted = inner.store.clear_namespace(&inner.config.storage_namespace)?;
        tracing::warn!(memory, persisted, "Cleared entire cache");
        Ok(())
    }

    /// Remove every expired entry from the memory tier.
    pub fn sweep_expired(&self) -> usize {
        let now = self.inner.clock.now_ms();
        let swept = lock(&self.inner.memory)
            .retain(|_, entry| entry.is_valid(now))
            .len();
        if swept > 0 {
            tracing::debug!(swept, "Swept expired entries");
        }
        swept
    }

    /// User ids embedded in persisted keys under the cache namespace.
    pub fn owners_in_storage(&self) -> StrideResult<BTreeSet<String>> {
        let ns_len = self.inner.config.storage_namespace.len();
        Ok(self
            .inner
            .persisted_keys()?
            .iter()
            .filter_map(|persisted| keys::owner_of(&persisted[ns_len..]).map(str::to_string))
            .collect())
    }

    pub fn get_stats(&self) -> CacheStats {
        let total = lock(&self.inner.memory).len();
        self.inner.stats.snapshot(total)
    }

    /// Whether a fetch or background refresh for `key` is in flight.
    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        lock(&self.inner.pending).contains_key(key.as_str())
    }
}

impl EngineInner {
    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.config.storage_namespace, key)
    }

    fn persisted_keys(&self) -> StrideResult<Vec<String>> {
        let ns = &self.config.storage_namespace;
        Ok(self
            .store
            .list_keys()?
            .into_iter()
            .filter(|k| k.starts_with(ns.as_str()))
            .collect())
    }

    fn persisted_has_tag(&self, storage_key: &str, tag: &str) -> bool {
        match self.store.get(storage_key) {
            Ok(Some(raw)) => CacheEntry::decode(&raw)
                .map(|entry| entry.has_tag(tag))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Find a valid entry, promoting persisted hits into memory.
    fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now_ms();

        {
            let mut memory = lock(&self.memory);
            match memory.get(key) {
                Some(entry) if entry.is_valid(now) => {
                    self.stats.memory_hit();
                    tracing::trace!(key, "Memory hit");
                    return Some(entry.clone());
                }
                Some(_) => {
                    memory.remove(key);
                    tracing::trace!(key, "Memory entry expired");
                }
                None => {}
            }
        }
        self.stats.memory_miss();

        let storage_key = self.storage_key(key);
        let raw = match self.store.get(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.stats.storage_miss();
                return None;
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Persistent tier read failed");
                self.stats.storage_miss();
                return None;
            }
        };

        match CacheEntry::decode(&raw) {
            Ok(entry) if entry.is_valid(now) => {
                self.stats.storage_hit();
                tracing::trace!(key, "Storage hit; promoting");
                self.admit(key.to_string(), entry.clone());
                Some(entry)
            }
            Ok(_) => {
                self.remove_persisted(&storage_key);
                self.stats.storage_miss();
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Corrupt persisted entry removed");
                self.remove_persisted(&storage_key);
                self.stats.storage_miss();
                None
            }
        }
    }

    fn remove_persisted(&self, storage_key: &str) {
        if let Err(e) = self.store.remove(storage_key) {
            tracing::warn!(key = storage_key, error = %e, "Failed to remove persisted entry");
        }
    }

    /// Decode a cached value; an undecodable entry is dropped from both tiers.
    fn decode<T: DeserializeOwned>(&self, key: &str, data: Value) -> Option<T> {
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(e) => {
                let err = CacheError::Deserialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(error = %err, "Dropping undecodable entry");
                lock(&self.memory).remove(key);
                self.remove_persisted(&self.storage_key(key));
                None
            }
        }
    }

    fn decode_fetched<T: DeserializeOwned>(&self, key: &str, value: Value) -> StrideResult<T> {
        serde_json::from_value(value).map_err(|e| {
            StrideError::Cache(CacheError::Deserialization {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
    }

    fn admit(&self, key: String, entry: CacheEntry) {
        let evicted = lock(&self.memory).insert(key, entry, self.config.memory_capacity);
        if let Some(evicted) = evicted {
            self.stats.eviction();
            tracing::debug!(evicted = %evicted, "Evicted oldest entry");
        }
    }

    fn write(&self, key: &str, data: Value, options: &CacheOptions) {
        let entry = CacheEntry::new(data, self.clock.now_ms(), options.ttl, options.tags.clone());

        if options.use_storage {
            self.persist(key, &entry);
        }

        if options.use_memory {
            self.admit(key.to_string(), entry);
        } else {
            lock(&self.memory).remove(key);
        }
    }

    fn persist(&self, key: &str, entry: &CacheEntry) {
        let stretched = entry.stretched(self.config.storage_ttl_multiplier);
        let result = stretched
            .encode()
            .map_err(|e| {
                StrideError::Cache(CacheError::Serialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .and_then(|raw| self.store.set(&self.storage_key(key), &raw));

        if let Err(e) = result {
            self.stats.persistence_failure();
            tracing::warn!(key, error = %e, "Persisting entry failed; memory copy kept");
        }
    }

    fn pending_for(&self, key: &str) -> Option<PendingFetch> {
        lock(&self.pending).get(key).cloned()
    }

    /// Start a fetch for `key`, or join the one already running.
    ///
    /// The check and the insert happen under one lock, and the fetch runs on
    /// its own task so it completes and clears its gate even if every waiter
    /// is dropped. The result is cached only while the task still owns the
    /// key's pending slot.
    fn start_fetch<T, F, Fut>(
        self: &Arc<Self>,
        key: &str,
        fetcher: F,
        options: CacheOptions,
        background: bool,
    ) -> SharedFetch
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StrideResult<T>> + Send + 'static,
    {
        let mut pending = lock(&self.pending);
        if let Some(existing) = pending.get(key) {
            return existing.future.clone();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let gate = PendingGuard {
            inner: Arc::clone(self),
            key: key.to_string(),
            generation,
        };
        let handle = tokio::spawn(async move {
            let key = gate.key.clone();
            if background {
                tracing::debug!(key = %key, "Revalidating stale entry");
            } else {
                tracing::debug!(key = %key, "Fetching");
            }

            let outcome = match fetcher().await {
                Ok(data) => serde_json::to_value(&data).map_err(|e| {
                    StrideError::Cache(CacheError::Serialization {
                        key: key.clone(),
                        reason: e.to_string(),
                    })
                }),
                Err(e) => Err(e),
            };

            match &outcome {
                Ok(value) => {
                    gate.inner
                        .commit_fetch(&key, gate.generation, value.clone(), &options);
                }
                Err(e) if background => {
                    tracing::warn!(key = %key, error = %e, "Background refresh failed; keeping stale entry");
                }
                Err(e) => tracing::debug!(key = %key, error = %e, "Fetch failed; nothing cached"),
            }
            drop(gate);
            outcome
        });

        let task_key = key.to_string();
        let future = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(StrideError::Fetch(FetchError::Aborted {
                    key: task_key,
                    reason: e.to_string(),
                })),
            }
        }
        .boxed()
        .shared();

        pending.insert(
            key.to_string(),
            PendingFetch {
                generation,
                future: future.clone(),
                background,
            },
        );
        future
    }

    /// Write a fetched value if `generation` still owns the pending slot.
    ///
    /// The slot is checked and the write made under the pending lock, so a
    /// purge that forgets the slot either precedes the write and suppresses
    /// it, or follows it and removes what was written.
    fn commit_fetch(&self, key: &str, generation: u64, value: Value, options: &CacheOptions) {
        let pending = lock(&self.pending);
        if pending.get(key).map(|p| p.generation) != Some(generation) {
            tracing::debug!(key, "Fetch result discarded; key was purged while in flight");
            return;
        }
        self.write(key, value, options);
    }

    fn finish_fetch(&self, key: &str, generation: u64) {
        let mut pending = lock(&self.pending);
        if pending.get(key).map(|p| p.generation) == Some(generation) {
            pending.remove(key);
        }
    }

    /// Start a detached refresh for a stale entry unless a fetch for the key
    /// is already in flight.
    fn spawn_refresh<T, F, Fut>(self: &Arc<Self>, key: &str, fetcher: F, options: CacheOptions)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StrideResult<T>> + Send + 'static,
    {
        // The task runs to completion without a waiter.
        drop(self.start_fetch(key, fetcher, options, true));
    }
}

/// Clears a pending-fetch marker when the fetch task ends, even by panic.
struct PendingGuard {
    inner: Arc<EngineInner>,
    key: String,
    generation: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.finish_fetch(&self.key, self.generation);
    }
}
