//! Stride Data - Cached Data Access
//!
//! Per-feature reads and writes layered over the cache engine:
//! - Goals (persisted, stale-while-revalidate)
//! - Monthly habits with live subscriptions
//! - Period todo lists tagged per user and per period
//! - Journal entries and per-month date lists
//! - Skills and profile (persisted)
//!
//! Every read goes through [`CacheEngine::get_or_fetch`](stride_storage::CacheEngine::get_or_fetch),
//! so concurrent callers share one remote read per key.

pub mod access;
pub mod goals;
pub mod habits;
pub mod journal;
pub mod profile;
pub mod skills;
pub mod todos;

pub use access::{paths, DataAccess};
pub use goals::goals_options;
pub use habits::habits_options;
pub use journal::journal_options;
pub use profile::profile_options;
pub use skills::skills_options;
pub use todos::todos_options;
