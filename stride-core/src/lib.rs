//! Stride Core - Shared Types
//!
//! Errors, configuration, identity, time and domain records, plus the
//! interfaces of the external collaborators (remote document store,
//! authentication provider). All other crates depend on this.

pub mod auth;
pub mod clock;
pub mod config;
pub mod entities;
pub mod error;
pub mod identity;
pub mod remote;
pub mod telemetry;

pub use auth::{AuthProvider, RequestCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CacheConfig, SessionConfig, DEFAULT_AUTH_NAMESPACE, DEFAULT_LAST_USER_KEY,
    DEFAULT_MEMORY_CAPACITY, DEFAULT_PERSISTENT_QUOTA_BYTES, DEFAULT_STALE_FRACTION,
    DEFAULT_STORAGE_NAMESPACE, DEFAULT_STORAGE_TTL_MULTIPLIER, DEFAULT_SWEEP_INTERVAL,
    DEFAULT_TTL,
};
pub use entities::{
    Goal, GoalList, Habit, HabitMonth, JournalEntry, Period, PeriodParseError, Profile, Skill,
    SkillSet, TodoItem, TodoList, YearMonth,
};
pub use error::{
    CacheError, ConfigError, FetchError, SessionError, StorageError, StrideError, StrideResult,
    ValidationError,
};
pub use identity::{new_item_id, DurationMs, EpochMs, ItemId, Timestamp, UserId};
pub use remote::{ChangeCallback, Document, RemoteStore, Subscription, WriteOptions};
pub use telemetry::{init_tracing, TelemetryConfig};
