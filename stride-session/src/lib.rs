//! Stride Session - Lifecycle Coordination
//!
//! Keeps the cache consistent with who is signed in:
//! - Warming likely-needed entries after sign-in
//! - Purging a departing user on sign-out or account switch
//! - Detecting entries that belong to someone else and purging everything
//! - Driving all of the above from the auth provider's state channel

pub mod coordinator;

pub use coordinator::{AuthSession, SessionCoordinator, SessionTransition};
