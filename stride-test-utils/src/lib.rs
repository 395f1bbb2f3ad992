//! Stride Test Utilities
//!
//! Shared test infrastructure for the Stride workspace:
//! - Mock authentication provider and request cache
//! - Counting and gated fetchers for single-flight tests
//! - A persistent store with injectable failures
//! - Fixtures wiring an engine, data access and remote store together
//! - Proptest generators and custom assertions

pub use stride_core::{
    AuthProvider, CacheConfig, Clock, EpochMs, GoalList, ManualClock, Period, RequestCache,
    SessionConfig, SessionError, StorageError, StrideError, StrideResult, UserId, YearMonth,
};
pub use stride_data::DataAccess;
pub use stride_storage::{CacheEngine, InMemoryRemoteStore, MemoryStore, PersistentStore};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::watch;

// ============================================================================
// MOCK AUTH PROVIDER
// ============================================================================

/// Authentication provider driven by the test.
#[derive(Debug)]
pub struct MockAuthProvider {
    state: watch::Sender<Option<UserId>>,
    sign_out_calls: AtomicUsize,
    fail_sign_out: AtomicBool,
}

impl MockAuthProvider {
    /// A provider with nobody signed in.
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state,
            sign_out_calls: AtomicUsize::new(0),
            fail_sign_out: AtomicBool::new(false),
        }
    }

    pub fn signed_in(user_id: UserId) -> Self {
        let provider = Self::new();
        provider.sign_in(user_id);
        provider
    }

    /// Publish a sign-in, as the provider would after a successful login.
    pub fn sign_in(&self, user_id: UserId) {
        self.state.send_replace(Some(user_id));
    }

    /// Publish a sign-out the app did not ask for (expired token, revoked session).
    pub fn expire_session(&self) {
        self.state.send_replace(None);
    }

    /// Make subsequent `sign_out` calls fail.
    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    fn current_user(&self) -> Option<UserId> {
        self.state.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<UserId>> {
        self.state.subscribe()
    }

    async fn sign_out(&self) -> StrideResult<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(SessionError::SignOutFailed {
                reason: "provider unreachable".to_string(),
            }
            .into());
        }
        self.state.send_replace(None);
        Ok(())
    }
}

// ============================================================================
// MOCK REQUEST CACHE
// ============================================================================

#[derive(Debug, Default)]
pub struct MockRequestCache {
    clears: AtomicUsize,
    fail: AtomicBool,
}

impl MockRequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_clear(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl RequestCache for MockRequestCache {
    fn clear(&self) -> StrideResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::RequestCacheClearFailed {
                reason: "injected failure".to_string(),
            }
            .into());
        }
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// FETCHERS
// ============================================================================

/// Boxed fetcher accepted by [`CacheEngine::get_or_fetch`].
pub type TestFetcher<T> = Box<dyn FnOnce() -> BoxFuture<'static, StrideResult<T>> + Send>;

/// Fetcher factory that counts invocations and can hold them at a gate.
#[derive(Debug)]
pub struct CountingFetcher<T> {
    value: T,
    calls: Arc<AtomicUsize>,
    gate: Option<watch::Sender<bool>>,
}

impl<T: Clone + Send + 'static> CountingFetcher<T> {
    /// Fetchers that resolve immediately with `value`.
    pub fn new(value: T) -> Self {
        Self {
            value,
            calls: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    /// Fetchers that wait for [`release`](Self::release) before resolving.
    pub fn gated(value: T) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            value,
            calls: Arc::new(AtomicUsize::new(0)),
            gate: Some(gate),
        }
    }

    pub fn fetcher(&self) -> TestFetcher<T> {
        let value = self.value.clone();
        let calls = Arc::clone(&self.calls);
        let gate = self.gate.as_ref().map(watch::Sender::subscribe);
        Box::new(move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(mut gate) = gate {
                    let _ = gate.wait_for(|open| *open).await;
                }
                Ok::<T, StrideError>(value)
            }
            .boxed()
        })
    }

    /// Open the gate for every fetcher, current and future.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.send_replace(true);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A fetcher that always fails with a remote error for `path`.
pub fn failing_fetcher<T: Send + 'static>(path: &str) -> TestFetcher<T> {
    let path = path.to_string();
    Box::new(move || {
        async move {
            Err::<T, StrideError>(
                stride_core::FetchError::Remote {
                    path,
                    reason: "injected failure".to_string(),
                }
                .into(),
            )
        }
        .boxed()
    })
}

// ============================================================================
// FAILING STORE
// ============================================================================

/// Operations of [`PersistentStore`] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistentStoreOp {
    Get,
    Set,
    Remove,
    ClearNamespace,
    ListKeys,
}

impl std::fmt::Display for PersistentStoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Remove => "remove",
            Self::ClearNamespace => "clear_namespace",
            Self::ListKeys => "list_keys",
        };
        f.write_str(name)
    }
}

/// [`MemoryStore`] wrapper that fails chosen operations on demand.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: Mutex<HashSet<PersistentStoreOp>>,
}

impl FailingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_on(&self, op: PersistentStoreOp) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The wrapped store, for inspecting what actually landed.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self, op: PersistentStoreOp) -> StrideResult<()> {
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&op);
        if failing {
            return Err(StorageError::Io {
                reason: format!("injected {} failure", op),
            }
            .into());
        }
        Ok(())
    }
}

impl PersistentStore for FailingStore {
    fn get(&self, key: &str) -> StrideResult<Option<String>> {
        self.check(PersistentStoreOp::Get)?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StrideResult<()> {
        self.check(PersistentStoreOp::Set)?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> StrideResult<bool> {
        self.check(PersistentStoreOp::Remove)?;
        self.inner.remove(key)
    }

    fn clear_namespace(&self, prefix: &str) -> StrideResult<usize> {
        self.check(PersistentStoreOp::ClearNamespace)?;
        self.inner.clear_namespace(prefix)
    }

    fn list_keys(&self) -> StrideResult<Vec<String>> {
        self.check(PersistentStoreOp::ListKeys)?;
        self.inner.list_keys()
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stride=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-wired engines and data access for scenario tests.

    use super::*;
    use chrono::NaiveDate;
    use serde::Serialize;
    use serde_json::Value;
    use stride_core::{Goal, Habit, HabitMonth, Profile};

    /// Noon UTC on 2026-10-15.
    pub const NOW: EpochMs = 1_792_065_600_000;

    /// Engine configuration with the background sweeper off.
    pub fn test_config() -> CacheConfig {
        CacheConfig::new().with_sweep(false)
    }

    pub fn uid(s: &str) -> UserId {
        UserId::new(s).expect("valid user id")
    }

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    /// Everything a data-layer scenario needs, sharing one clock.
    pub struct TestStack {
        pub engine: CacheEngine,
        pub data: DataAccess,
        pub remote: Arc<InMemoryRemoteStore>,
        pub store: Arc<dyn PersistentStore>,
        pub clock: Arc<ManualClock>,
    }

    pub fn stack() -> TestStack {
        stack_with_store(Arc::new(MemoryStore::default()))
    }

    pub fn stack_with_store(store: Arc<dyn PersistentStore>) -> TestStack {
        let clock = Arc::new(ManualClock::new(NOW));
        let remote = Arc::new(InMemoryRemoteStore::new());
        let engine = CacheEngine::new(test_config(), Arc::clone(&store), clock.clone())
            .expect("engine should build");
        TestStack {
            data: DataAccess::new(engine.clone(), remote.clone()),
            engine,
            remote,
            store,
            clock,
        }
    }

    /// Write `value` as the document at `path` without notifying the cache.
    pub fn seed<T: Serialize>(remote: &InMemoryRemoteStore, path: &str, value: &T) {
        match serde_json::to_value(value).expect("serializable") {
            Value::Object(doc) => remote.seed(path, doc),
            other => panic!("seed value for {} is not an object: {}", path, other),
        }
    }

    pub fn goal_list(titles: &[&str]) -> GoalList {
        GoalList {
            items: titles
                .iter()
                .enumerate()
                .map(|(i, title)| Goal {
                    id: stride_core::new_item_id(),
                    title: title.to_string(),
                    period: Period::Monthly,
                    target_date: None,
                    completed: false,
                    order: i as i32,
                })
                .collect(),
        }
    }

    pub fn habit_month(names: &[&str]) -> HabitMonth {
        HabitMonth {
            habits: names
                .iter()
                .map(|name| Habit {
                    id: stride_core::new_item_id(),
                    name: name.to_string(),
                    completed_days: Default::default(),
                })
                .collect(),
        }
    }

    pub fn profile(name: &str) -> Profile {
        Profile {
            display_name: name.to_string(),
            email: None,
            created_at: chrono::DateTime::from_timestamp_millis(NOW).unwrap_or_default(),
        }
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Stride identifiers and keys.

    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use std::time::Duration;
    use stride_storage::{keys, CacheKey};

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        "[A-Za-z0-9_-]{1,28}".prop_filter_map("valid user id", |s| UserId::new(s).ok())
    }

    pub fn arb_period() -> impl Strategy<Value = Period> {
        prop_oneof![
            Just(Period::Daily),
            Just(Period::Weekly),
            Just(Period::Monthly),
            Just(Period::Yearly),
        ]
    }

    pub fn arb_year_month() -> impl Strategy<Value = YearMonth> {
        (2000i32..2100, 1u32..=12).prop_filter_map("valid month", |(y, m)| YearMonth::new(y, m))
    }

    pub fn arb_date() -> impl Strategy<Value = NaiveDate> {
        (2000i32..2100, 1u32..=12, 1u32..=28)
            .prop_filter_map("valid date", |(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
    }

    /// TTLs from one millisecond up to a day.
    pub fn arb_ttl() -> impl Strategy<Value = Duration> {
        (1u64..86_400_000).prop_map(Duration::from_millis)
    }

    /// Any user-scoped key for `user_id`.
    pub fn arb_key_for(user_id: UserId) -> impl Strategy<Value = CacheKey> {
        (0usize..8, arb_period(), arb_date()).prop_map(move |(kind, period, day)| {
            let u = &user_id;
            match kind {
                0 => keys::goals(u),
                1 => keys::habits_month(u, YearMonth::of(day)),
                2 => keys::todos(u, period, day),
                3 => keys::journal(u, day),
                4 => keys::journal_dates(u, YearMonth::of(day)),
                5 => keys::skills(u),
                6 => keys::profile(u),
                _ => keys::auth(u),
            }
        })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over [`StrideResult`] variants.

    use super::*;

    #[track_caller]
    pub fn assert_fetch_error<T: std::fmt::Debug>(result: &StrideResult<T>) {
        match result {
            Err(StrideError::Fetch(_)) => {}
            other => panic!("Expected Fetch error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &StrideResult<T>) {
        match result {
            Err(StrideError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &StrideResult<T>) {
        match result {
            Err(StrideError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_session_error<T: std::fmt::Debug>(result: &StrideResult<T>) {
        match result {
            Err(StrideError::Session(_)) => {}
            other => panic!("Expected Session error, got: {:?}", other),
        }
    }

    /// Assert that no persisted key under `namespace` mentions `user_id`.
    #[track_caller]
    pub fn assert_no_persisted_keys_for(
        store: &dyn PersistentStore,
        namespace: &str,
        user_id: &UserId,
    ) {
        let keys = store.list_keys().expect("list keys");
        let leaked: Vec<_> = keys
            .iter()
            .filter(|k| k.starts_with(namespace))
            .filter(|k| stride_storage::keys::owned_by(&k[namespace.len()..], user_id))
            .collect();
        assert!(leaked.is_empty(), "persisted keys for {} remain: {:?}", user_id, leaked);
    }
}
