//! Session Lifecycle Coordinator
//!
//! Turns authentication transitions into bulk cache operations:
//!
//! - First sign-in: record the identifier and warm likely-needed entries
//! - Sign-in as a different account: purge the departing user first
//! - Foreign persisted entries: clear everything, including the platform
//!   request cache and auth-adjacent state
//! - Sign-out: purge the user, clear auth state, sign out of the provider,
//!   then drop the marker; on any failure clear everything and still sign out
//!
//! The last-known identifier is mirrored to a persisted marker outside the
//! cache namespace so an account switch is detected across restarts.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stride_core::{
    AuthProvider, EpochMs, RequestCache, SessionConfig, StrideResult, UserId, YearMonth,
};
use stride_data::DataAccess;
use stride_storage::{keys, CacheEngine, CacheOptions, PersistentStore};
use tokio::sync::{watch, Mutex};

/// How long the cached auth session record lives.
const AUTH_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// What a call to [`SessionCoordinator::handle_auth_change`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    SignedIn { user_id: UserId },
    Switched { from: UserId, to: UserId },
    SignedOut { user_id: UserId },
    /// Entries belonging to someone other than `user_id` were found and the
    /// whole cache was purged.
    CorruptionPurged { user_id: Option<UserId> },
    Unchanged,
}

/// Auth-adjacent record cached for the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: UserId,
    pub signed_in_at: EpochMs,
}

#[derive(Debug, Default)]
struct SessionState {
    /// Signed in during this process.
    active: Option<UserId>,
    /// Last identifier seen, possibly restored from the persisted marker.
    last_known: Option<UserId>,
}

pub struct SessionCoordinator {
    data: DataAccess,
    auth: Arc<dyn AuthProvider>,
    request_cache: Option<Arc<dyn RequestCache>>,
    config: SessionConfig,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("config", &self.config)
            .field("engine", self.data.engine())
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    /// Create a coordinator, restoring the last-known user from the marker.
    pub fn new(
        data: DataAccess,
        auth: Arc<dyn AuthProvider>,
        config: SessionConfig,
    ) -> StrideResult<Self> {
        config.validate(data.engine().config())?;
        let last_known = read_marker(data.engine(), &config.last_user_key);
        if let Some(user_id) = &last_known {
            tracing::debug!(user_id = %user_id, "Restored last-known user");
        }

        Ok(Self {
            data,
            auth,
            request_cache: None,
            config,
            state: Mutex::new(SessionState {
                active: None,
                last_known,
            }),
        })
    }

    /// Also clear `cache` whenever corruption forces a full purge.
    pub fn with_request_cache(mut self, cache: Arc<dyn RequestCache>) -> Self {
        self.request_cache = Some(cache);
        self
    }

    pub fn engine(&self) -> &CacheEngine {
        self.data.engine()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The user signed in during this process, if any.
    pub async fn current_user(&self) -> Option<UserId> {
        self.state.lock().await.active.clone()
    }

    pub async fn last_known_user(&self) -> Option<UserId> {
        self.state.lock().await.last_known.clone()
    }

    /// The cached auth record for `user_id`.
    pub fn auth_session(&self, user_id: &UserId) -> Option<AuthSession> {
        self.engine().get(&keys::auth(user_id))
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    /// React to the provider reporting `next` as the signed-in identifier.
    ///
    /// Transitions are serialized; a change arriving while another is being
    /// handled waits for it.
    pub async fn handle_auth_change(&self, next: Option<UserId>) -> SessionTransition {
        let mut state = self.state.lock().await;
        match next {
            Some(user_id) => self.sign_in(&mut state, user_id).await,
            None => self.observe_sign_out(&mut state),
        }
    }

    async fn sign_in(&self, state: &mut SessionState, user_id: UserId) -> SessionTransition {
        if state.active.as_ref() == Some(&user_id) {
            return SessionTransition::Unchanged;
        }

        let previous = state.active.take().or_else(|| state.last_known.take());
        let mut transition = match previous {
            Some(from) if from != user_id => {
                tracing::info!(from = %from, to = %user_id, "Account switch; purging previous user");
                if let Err(e) = self.engine().invalidate_by_user(&from) {
                    tracing::warn!(user_id = %from, error = %e, "Switch purge failed; clearing entire cache");
                    self.purge_everything();
                }
                SessionTransition::Switched {
                    from,
                    to: user_id.clone(),
                }
            }
            _ => {
                tracing::info!(user_id = %user_id, "Signed in");
                SessionTransition::SignedIn {
                    user_id: user_id.clone(),
                }
            }
        };

        if self.check_corruption(Some(&user_id)) {
            transition = SessionTransition::CorruptionPurged {
                user_id: Some(user_id.clone()),
            };
        }

        state.active = Some(user_id.clone());
        state.last_known = Some(user_id.clone());
        self.write_marker(&user_id);
        self.record_auth_session(&user_id);

        if self.config.warm_on_login {
            self.warm_cache(&user_id).await;
        }

        transition
    }

    /// The provider reported nobody signed in.
    fn observe_sign_out(&self, state: &mut SessionState) -> SessionTransition {
        let Some(user_id) = state.active.take() else {
            if self.check_corruption(None) {
                state.last_known = None;
                self.clear_marker_logged();
                return SessionTransition::CorruptionPurged { user_id: None };
            }
            return SessionTransition::Unchanged;
        };

        tracing::info!(user_id = %user_id, "Provider session ended; purging user");
        state.last_known = None;
        let purged = self
            .purge_departing(Some(&user_id))
            .and_then(|_| self.clear_marker());
        if let Err(e) = purged {
            tracing::warn!(user_id = %user_id, error = %e, "User purge failed; clearing entire cache");
            self.purge_everything();
            self.clear_marker_logged();
        }

        SessionTransition::SignedOut { user_id }
    }

    /// Sign out, leaving nothing of the departing user behind.
    ///
    /// Purges the user's entries, clears auth-adjacent state, signs out of
    /// the provider and drops the marker, in that order. If any step fails
    /// the whole cache is cleared and the provider sign-out is still
    /// completed. Only a failing provider sign-out is returned as an error.
    pub async fn sign_out(&self) -> StrideResult<()> {
        let mut state = self.state.lock().await;
        let departing = state.active.take().or_else(|| state.last_known.take());
        state.last_known = None;

        let Err(e) = self.orderly_sign_out(departing.as_ref()).await else {
            if let Some(user_id) = &departing {
                tracing::info!(user_id = %user_id, "Signed out");
            }
            return Ok(());
        };

        tracing::warn!(error = %e, "Orderly sign-out failed; clearing entire cache");
        self.purge_everything();
        self.clear_marker_logged();

        if self.auth.current_user().is_some() {
            if let Err(e) = self.auth.sign_out().await {
                tracing::error!(error = %e, "Provider sign-out failed after full purge");
                return Err(e);
            }
        }
        Ok(())
    }

    async fn orderly_sign_out(&self, departing: Option<&UserId>) -> StrideResult<()> {
        self.purge_departing(departing)?;
        self.auth.sign_out().await?;
        self.clear_marker()
    }

    /// Remove a user's entries and every auth-adjacent entry.
    fn purge_departing(&self, departing: Option<&UserId>) -> StrideResult<()> {
        if let Some(user_id) = departing {
            self.engine().invalidate_by_user(user_id)?;
        }
        let cached = self.engine().invalidate(keys::tags::AUTH)?;
        let persisted = self
            .engine()
            .store()
            .clear_namespace(&self.config.auth_namespace)?;
        tracing::debug!(cached, persisted, "Cleared auth state");
        Ok(())
    }

    /// Last resort: empty the cache, the request cache and auth state.
    /// Failures are logged; there is nothing further to fall back to.
    fn purge_everything(&self) {
        if let Err(e) = self.engine().clear_all() {
            tracing::error!(error = %e, "Clearing the cache namespace failed");
        }
        if let Some(cache) = &self.request_cache {
            if let Err(e) = cache.clear() {
                tracing::error!(error = %e, "Clearing the request cache failed");
            }
        }
        if let Err(e) = self
            .engine()
            .store()
            .clear_namespace(&self.config.auth_namespace)
        {
            tracing::error!(error = %e, "Clearing auth state failed");
        }
    }

    // ========================================================================
    // CORRUPTION
    // ========================================================================

    /// Persisted owners that should not be there for `current`.
    ///
    /// With nobody signed in every user-scoped entry is foreign; otherwise
    /// any entry owned by another identifier is. Entries only in memory are
    /// not inspected.
    pub fn detect_corruption(&self, current: Option<&UserId>) -> StrideResult<BTreeSet<String>> {
        let owners = self.engine().owners_in_storage()?;
        Ok(owners
            .into_iter()
            .filter(|owner| current.map_or(true, |u| owner.as_str() != u.as_str()))
            .collect())
    }

    /// Scan and escalate. Returns whether a purge happened.
    fn check_corruption(&self, current: Option<&UserId>) -> bool {
        match self.detect_corruption(current) {
            Ok(foreign) if foreign.is_empty() => false,
            Ok(foreign) => {
                tracing::error!(
                    current = current.map(UserId::as_str).unwrap_or("<none>"),
                    foreign = ?foreign,
                    "Cache corruption detected; purging everything"
                );
                self.purge_everything();
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Corruption scan failed; skipping");
                false
            }
        }
    }

    // ========================================================================
    // WARMING
    // ========================================================================

    /// Prefetch goals, this month's habits and the profile concurrently.
    ///
    /// Failures are logged by the prefetches and otherwise ignored.
    pub async fn warm_cache(&self, user_id: &UserId) {
        let month = YearMonth::of(self.data.today());
        futures_util::future::join3(
            self.data.prefetch_goals(user_id),
            self.data.prefetch_habits_month(user_id, month),
            self.data.prefetch_profile(user_id),
        )
        .await;
        tracing::debug!(user_id = %user_id, month = %month, "Cache warmed");
    }

    fn record_auth_session(&self, user_id: &UserId) {
        let session = AuthSession {
            user_id: user_id.clone(),
            signed_in_at: self.engine().clock().now_ms(),
        };
        let options = CacheOptions::new()
            .with_ttl(AUTH_SESSION_TTL)
            .with_tag(keys::tags::AUTH);
        self.engine().set(&keys::auth(user_id), &session, &options);
    }

    // ========================================================================
    // MARKER
    // ========================================================================

    fn write_marker(&self, user_id: &UserId) {
        let store = self.engine().store();
        if let Err(e) = store.set(&self.config.last_user_key, user_id.as_str()) {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to persist last-user marker");
        }
    }

    fn clear_marker(&self) -> StrideResult<()> {
        self.engine()
            .store()
            .remove(&self.config.last_user_key)
            .map(|_| ())
    }

    fn clear_marker_logged(&self) {
        if let Err(e) = self.clear_marker() {
            tracing::warn!(error = %e, "Failed to clear last-user marker");
        }
    }

    // ========================================================================
    // EVENT LOOP
    // ========================================================================

    /// Follow the provider's auth state until shutdown is signalled, the
    /// shutdown sender is dropped, or the provider goes away.
    ///
    /// The state current at start is handled first.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut auth_rx = self.auth.watch();
        tracing::info!("Session coordinator started");

        let initial = auth_rx.borrow_and_update().clone();
        let transition = self.handle_auth_change(initial).await;
        tracing::debug!(?transition, "Initial auth state handled");

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Session coordinator shutting down");
                        break;
                    }
                }

                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        tracing::info!("Auth provider dropped; session coordinator stopping");
                        break;
                    }
                    let next = auth_rx.borrow_and_update().clone();
                    let transition = self.handle_auth_change(next).await;
                    tracing::debug!(?transition, "Auth change handled");
                }
            }
        }
    }
}

fn read_marker(engine: &CacheEngine, key: &str) -> Option<UserId> {
    match engine.store().get(key) {
        Ok(Some(raw)) => match UserId::new(raw) {
            Ok(user_id) => Some(user_id),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed last-user marker");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read last-user marker");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stride_core::{GoalList, HabitMonth, Profile};
    use stride_test_utils::fixtures::{goal_list, stack, uid, TestStack};
    use stride_test_utils::{MockAuthProvider, MockRequestCache, PersistentStoreOp};

    fn coordinator(s: &TestStack, auth: &Arc<MockAuthProvider>) -> SessionCoordinator {
        SessionCoordinator::new(s.data.clone(), auth.clone(), SessionConfig::default())
            .expect("coordinator")
    }

    fn persist_goals(s: &TestStack, user_id: &UserId) {
        s.engine.set(
            &keys::goals(user_id),
            &goal_list(&["Residue"]),
            &CacheOptions::new().persisted(),
        );
    }

    fn october() -> YearMonth {
        YearMonth::new(2026, 10).expect("valid month")
    }

    #[tokio::test]
    async fn test_first_sign_in_warms_and_writes_marker() {
        let s = stack();
        let auth = Arc::new(MockAuthProvider::new());
        let coord = coordinator(&s, &auth);
        let u = uid("u1");

        let transition = coord.handle_auth_change(Some(u.clone())).await;
        assert_eq!(transition, SessionTransition::SignedIn { user_id: u.clone() });

        assert!(s.engine.get::<GoalList>(&keys::goals(&u)).is_some());
        assert!(s
            .engine
            .get::<HabitMonth>(&keys::habits_month(&u, october()))
            .is_some());
        assert_eq!(
            s.engine.get::<Option<Profile>>(&keys::profile(&u)),
            Some(None)
        );
        assert_eq!(
            s.store.get(stride_core::DEFAULT_LAST_USER_KEY).expect("get"),
            Some("u1".to_string())
        );
        assert_eq!(
            coord.auth_session(&u).map(|session| session.user_id),
            Some(u.clone())
        );
        assert_eq!(coord.current_user().await, Some(u));
    }

    #[tokio::test]
    async fn test_repeated_sign_in_is_unchanged() {
        let s = stack();
        let auth = Arc::new(MockAuthProvider::new());
        let coord = coordinator(&s, &auth);
        let u = uid("u1");

        coord.handle_auth_change(Some(u.clone())).await;
        let reads = s.remote.read_count();
        assert_eq!(
            coord.handle_auth_change(Some(u)).await,
            SessionTransition::Unchanged
        );
        assert_eq!(s.remote.read_count(), reads);
    }

    #[tokio::test]
    async fn test_marker_detects_switch_across_restart() {
        let s = stack();
        let (u1, u2) = (uid("u1"), uid("u2"));
        persist_goals(&s, &u1);
        s.store
            .set(stride_core::DEFAULT_LAST_USER_KEY, "u1")
            .expect("marker");

        let auth = Arc::new(MockAuthProvider::new());
        let coord = coordinator(&s, &auth);
        assert_eq!(coord.last_known_user().await, Some(u1.clone()));

        let transition = coord.handle_auth_change(Some(u2.clone())).await;
        assert_eq!(
            transition,
            SessionTransition::Switched {
                from: u1.clone(),
                to: u2
            }
        );
        assert!(s.engine.get::<GoalList>(&keys::goals(&u1)).is_none());
    }

    #[tokio::test]
    async fn test_residue_while_signed_out_is_corruption() {
        let s = stack();
        persist_goals(&s, &uid("u1"));
        let auth = Arc::new(MockAuthProvider::new());
        let requests = Arc::new(MockRequestCache::new());
        let coord = coordinator(&s, &auth).with_request_cache(requests.clone());

        assert_eq!(
            coord.handle_auth_change(None).await,
            SessionTransition::CorruptionPurged { user_id: None }
        );
        assert_eq!(requests.clears(), 1);
        assert!(s.engine.owners_in_storage().expect("owners").is_empty());
    }

    #[tokio::test]
    async fn test_foreign_entries_on_sign_in_purge_then_warm() {
        let s = stack();
        let (u1, stranger) = (uid("u1"), uid("u9"));
        persist_goals(&s, &stranger);
        s.store
            .set("stride_auth_token", "stale-token")
            .expect("auth state");

        let auth = Arc::new(MockAuthProvider::new());
        let coord = coordinator(&s, &auth);
        assert_eq!(
            coord.handle_auth_change(Some(u1.clone())).await,
            SessionTransition::CorruptionPurged {
                user_id: Some(u1.clone())
            }
        );

        assert!(s.engine.get::<GoalList>(&keys::goals(&stranger)).is_none());
        assert_eq!(s.store.get("stride_auth_token").expect("get"), None);
        // Warming runs after the purge
        assert!(s.engine.get::<GoalList>(&keys::goals(&u1)).is_some());
    }

    #[tokio::test]
    async fn test_no_corruption_for_own_entries() {
        let s = stack();
        let u = uid("u1");
        persist_goals(&s, &u);
        let auth = Arc::new(MockAuthProvider::new());
        let coord = coordinator(&s, &auth);

        assert!(coord.detect_corruption(Some(&u)).expect("scan").is_empty());
        assert_eq!(
            coord.detect_corruption(None).expect("scan"),
            BTreeSet::from(["u1".to_string()])
        );
    }

    #[tokio::test]
    async fn test_orderly_sign_out() {
        let s = stack();
        let u = uid("u1");
        let auth = Arc::new(MockAuthProvider::signed_in(u.clone()));
        let coord = coordinator(&s, &auth);
        coord.handle_auth_change(Some(u.clone())).await;
        s.store
            .set("stride_auth_token", "token")
            .expect("auth state");

        coord.sign_out().await.expect("sign out");

        assert_eq!(auth.sign_out_calls(), 1);
        assert_eq!(auth.current_user(), None);
        assert!(coord.auth_session(&u).is_none());
        assert!(s.engine.get::<GoalList>(&keys::goals(&u)).is_none());
        assert_eq!(s.store.get("stride_auth_token").expect("get"), None);
        assert_eq!(
            s.store.get(stride_core::DEFAULT_LAST_USER_KEY).expect("get"),
            None
        );
        assert_eq!(coord.current_user().await, None);
    }

    #[tokio::test]
    async fn test_sign_out_provider_failure_still_purges() {
        let s = stack();
        let u = uid("u1");
        let auth = Arc::new(MockAuthProvider::signed_in(u.clone()));
        let coord = coordinator(&s, &auth);
        coord.handle_auth_change(Some(u.clone())).await;
        auth.fail_sign_out(true);

        let result = coord.sign_out().await;
        stride_test_utils::assertions::assert_session_error(&result);

        // Once in order, once more after the full purge
        assert_eq!(auth.sign_out_calls(), 2);
        assert_eq!(s.engine.get_stats().total_entries, 0);
        assert!(s.engine.owners_in_storage().expect("owners").is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_falls_back_when_purge_fails() {
        let store = Arc::new(stride_test_utils::FailingStore::default());
        let s = stride_test_utils::fixtures::stack_with_store(store.clone());
        let u = uid("u1");
        let auth = Arc::new(MockAuthProvider::signed_in(u.clone()));
        let coord = coordinator(&s, &auth);
        coord.handle_auth_change(Some(u.clone())).await;

        store.fail_on(PersistentStoreOp::ListKeys);
        coord.sign_out().await.expect("sign out completes");

        assert_eq!(auth.sign_out_calls(), 1);
        assert_eq!(auth.current_user(), None);
        assert_eq!(s.engine.get_stats().total_entries, 0);
        store.heal();
        assert!(s.engine.owners_in_storage().expect("owners").is_empty());
    }

    #[tokio::test]
    async fn test_provider_ending_session_purges_user() {
        let s = stack();
        let u = uid("u1");
        let auth = Arc::new(MockAuthProvider::new());
        let coord = coordinator(&s, &auth);
        coord.handle_auth_change(Some(u.clone())).await;

        assert_eq!(
            coord.handle_auth_change(None).await,
            SessionTransition::SignedOut { user_id: u.clone() }
        );
        assert_eq!(s.engine.get_stats().total_entries, 0);
        assert_eq!(coord.last_known_user().await, None);
        assert_eq!(auth.sign_out_calls(), 0);
    }

    #[tokio::test]
    async fn test_warm_failure_does_not_block_sign_in() {
        let s = stack();
        s.remote.set_offline(true);
        let auth = Arc::new(MockAuthProvider::new());
        let coord = coordinator(&s, &auth);
        let u = uid("u1");

        assert_eq!(
            coord.handle_auth_change(Some(u.clone())).await,
            SessionTransition::SignedIn { user_id: u.clone() }
        );
        assert!(s.engine.get::<GoalList>(&keys::goals(&u)).is_none());
        assert!(!s.engine.is_fetching(&keys::goals(&u)));
    }

    #[tokio::test]
    async fn test_warming_can_be_disabled() {
        let s = stack();
        let auth = Arc::new(MockAuthProvider::new());
        let config = SessionConfig {
            warm_on_login: false,
            ..SessionConfig::default()
        };
        let coord = SessionCoordinator::new(s.data.clone(), auth, config).expect("coordinator");

        coord.handle_auth_change(Some(uid("u1"))).await;
        assert_eq!(s.remote.read_count(), 0);
    }

    #[test]
    fn test_rejects_marker_inside_cache_namespace() {
        let s = stack();
        let auth = Arc::new(MockAuthProvider::new());
        let config = SessionConfig {
            last_user_key: "stride_cache_marker".to_string(),
            ..SessionConfig::default()
        };
        assert!(SessionCoordinator::new(s.data.clone(), auth, config).is_err());
    }
}
