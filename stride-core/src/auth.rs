//! Authentication provider interface.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::StrideResult;
use crate::identity::UserId;

/// Client-side authentication provider.
///
/// `watch()` is the `onAuthStateChanged` equivalent: the receiver holds the
/// current identifier (or `None` when signed out) and is notified on every
/// transition.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Identifier of the signed-in account, if any.
    fn current_user(&self) -> Option<UserId>;

    /// Subscribe to authentication state changes.
    fn watch(&self) -> watch::Receiver<Option<UserId>>;

    /// End the provider session.
    async fn sign_out(&self) -> StrideResult<()>;
}

/// Platform-level HTTP/request cache that must be dropped when cross-user
/// data is suspected.
pub trait RequestCache: Send + Sync {
    fn clear(&self) -> StrideResult<()>;
}
