//! Configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, StrideError, StrideResult};

/// Default in-memory tier capacity.
pub const DEFAULT_MEMORY_CAPACITY: usize = 100;
/// Default entry TTL (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
/// Persisted entries live this many times longer than their memory TTL.
pub const DEFAULT_STORAGE_TTL_MULTIPLIER: u32 = 2;
/// An entry older than this fraction of its TTL is stale.
pub const DEFAULT_STALE_FRACTION: f64 = 0.8;
/// How often the memory tier is swept for expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Prefix for every persisted cache key.
pub const DEFAULT_STORAGE_NAMESPACE: &str = "stride_cache_";
/// Practical quota for the persistent tier (5 MiB).
pub const DEFAULT_PERSISTENT_QUOTA_BYTES: usize = 5 * 1024 * 1024;
/// Prefix for auth-adjacent persisted state.
pub const DEFAULT_AUTH_NAMESPACE: &str = "stride_auth_";
/// Persisted key holding the last signed-in user id.
pub const DEFAULT_LAST_USER_KEY: &str = "stride_last_uid";

/// Cache engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries held in the memory tier.
    pub memory_capacity: usize,
    /// TTL used when a caller does not specify one.
    pub default_ttl: Duration,
    /// Multiplier applied to the TTL of persisted entries.
    pub storage_ttl_multiplier: u32,
    /// Fraction of the TTL after which an entry is stale.
    pub stale_fraction: f64,
    /// Interval between memory-tier sweeps.
    pub sweep_interval: Duration,
    /// Whether the periodic sweeper should run at all.
    pub sweep_enabled: bool,
    /// Prefix for every persisted cache key.
    pub storage_namespace: String,
    /// Byte quota for the persistent tier.
    pub persistent_quota_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            default_ttl: DEFAULT_TTL,
            storage_ttl_multiplier: DEFAULT_STORAGE_TTL_MULTIPLIER,
            stale_fraction: DEFAULT_STALE_FRACTION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_enabled: true,
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
            persistent_quota_bytes: DEFAULT_PERSISTENT_QUOTA_BYTES,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRIDE_CACHE_MEMORY_CAPACITY`: memory tier capacity (default: 100)
    /// - `STRIDE_CACHE_DEFAULT_TTL_SECS`: default TTL (default: 300)
    /// - `STRIDE_CACHE_STORAGE_TTL_MULTIPLIER`: persisted TTL stretch (default: 2)
    /// - `STRIDE_CACHE_STALE_FRACTION`: stale threshold (default: 0.8)
    /// - `STRIDE_CACHE_SWEEP_INTERVAL_SECS`: sweep interval (default: 60)
    /// - `STRIDE_CACHE_SWEEP_ENABLED`: run the sweeper (default: true)
    /// - `STRIDE_CACHE_NAMESPACE`: persisted key prefix (default: `stride_cache_`)
    /// - `STRIDE_CACHE_QUOTA_BYTES`: persistent quota (default: 5 MiB)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            memory_capacity: env_parse("STRIDE_CACHE_MEMORY_CAPACITY")
                .unwrap_or(defaults.memory_capacity),
            default_ttl: env_parse("STRIDE_CACHE_DEFAULT_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_ttl),
            storage_ttl_multiplier: env_parse("STRIDE_CACHE_STORAGE_TTL_MULTIPLIER")
                .unwrap_or(defaults.storage_ttl_multiplier),
            stale_fraction: env_parse("STRIDE_CACHE_STALE_FRACTION")
                .unwrap_or(defaults.stale_fraction),
            sweep_interval: env_parse("STRIDE_CACHE_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            sweep_enabled: std::env::var("STRIDE_CACHE_SWEEP_ENABLED")
                .ok()
                .map(|s| s.to_lowercase() != "false" && s != "0")
                .unwrap_or(defaults.sweep_enabled),
            storage_namespace: std::env::var("STRIDE_CACHE_NAMESPACE")
                .unwrap_or(defaults.storage_namespace),
            persistent_quota_bytes: env_parse("STRIDE_CACHE_QUOTA_BYTES")
                .unwrap_or(defaults.persistent_quota_bytes),
        }
    }

    /// Set the memory tier capacity.
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Enable or disable the periodic sweeper.
    pub fn with_sweep(mut self, enabled: bool) -> Self {
        self.sweep_enabled = enabled;
        self
    }

    /// Set the persisted key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = namespace.into();
        self
    }

    /// Set the persistent quota.
    pub fn with_quota_bytes(mut self, quota: usize) -> Self {
        self.persistent_quota_bytes = quota;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StrideResult<()> {
        if self.memory_capacity == 0 {
            return Err(invalid(
                "memory_capacity",
                self.memory_capacity.to_string(),
                "memory_capacity must be greater than 0",
            ));
        }

        if self.default_ttl.is_zero() {
            return Err(invalid(
                "default_ttl",
                format!("{:?}", self.default_ttl),
                "default_ttl must be positive",
            ));
        }

        if self.storage_ttl_multiplier == 0 {
            return Err(invalid(
                "storage_ttl_multiplier",
                self.storage_ttl_multiplier.to_string(),
                "storage_ttl_multiplier must be at least 1",
            ));
        }

        if !(self.stale_fraction > 0.0 && self.stale_fraction < 1.0) {
            return Err(invalid(
                "stale_fraction",
                self.stale_fraction.to_string(),
                "stale_fraction must be between 0.0 and 1.0 exclusive",
            ));
        }

        if self.sweep_enabled && self.sweep_interval.is_zero() {
            return Err(invalid(
                "sweep_interval",
                format!("{:?}", self.sweep_interval),
                "sweep_interval must be positive when the sweeper is enabled",
            ));
        }

        if self.storage_namespace.is_empty() {
            return Err(StrideError::Config(ConfigError::MissingRequired {
                field: "storage_namespace".to_string(),
            }));
        }

        Ok(())
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Prefix for auth-adjacent persisted state.
    pub auth_namespace: String,
    /// Persisted key holding the last signed-in user id.
    pub last_user_key: String,
    /// Prefetch likely-needed data after sign-in.
    pub warm_on_login: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_namespace: DEFAULT_AUTH_NAMESPACE.to_string(),
            last_user_key: DEFAULT_LAST_USER_KEY.to_string(),
            warm_on_login: true,
        }
    }
}

impl SessionConfig {
    /// Create SessionConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRIDE_SESSION_AUTH_NAMESPACE`: auth state prefix (default: `stride_auth_`)
    /// - `STRIDE_SESSION_LAST_USER_KEY`: marker key (default: `stride_last_uid`)
    /// - `STRIDE_SESSION_WARM_ON_LOGIN`: warm the cache on sign-in (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            auth_namespace: std::env::var("STRIDE_SESSION_AUTH_NAMESPACE")
                .unwrap_or(defaults.auth_namespace),
            last_user_key: std::env::var("STRIDE_SESSION_LAST_USER_KEY")
                .unwrap_or(defaults.last_user_key),
            warm_on_login: std::env::var("STRIDE_SESSION_WARM_ON_LOGIN")
                .ok()
                .map(|s| s.to_lowercase() != "false" && s != "0")
                .unwrap_or(defaults.warm_on_login),
        }
    }

    /// Validate the configuration against the cache configuration it runs beside.
    pub fn validate(&self, cache: &CacheConfig) -> StrideResult<()> {
        if self.auth_namespace.is_empty() {
            return Err(StrideError::Config(ConfigError::MissingRequired {
                field: "auth_namespace".to_string(),
            }));
        }

        if self.last_user_key.is_empty() {
            return Err(StrideError::Config(ConfigError::MissingRequired {
                field: "last_user_key".to_string(),
            }));
        }

        // The marker must survive a cache-namespace purge.
        if self.last_user_key.starts_with(&cache.storage_namespace) {
            return Err(invalid(
                "last_user_key",
                self.last_user_key.clone(),
                "last_user_key must live outside the cache namespace",
            ));
        }

        if self.auth_namespace.starts_with(&cache.storage_namespace)
            || cache.storage_namespace.starts_with(&self.auth_namespace)
        {
            return Err(invalid(
                "auth_namespace",
                self.auth_namespace.clone(),
                "auth_namespace must not overlap the cache namespace",
            ));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn invalid(field: &str, value: String, reason: &str) -> StrideError {
    StrideError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_defaults_validate() {
        let config = CacheConfig::default();
        assert_eq!(config.memory_capacity, 100);
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.storage_ttl_multiplier, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_memory_capacity(10)
            .with_default_ttl(Duration::from_secs(30))
            .with_sweep_interval(Duration::from_secs(5))
            .with_sweep(false)
            .with_namespace("test_")
            .with_quota_bytes(1024);

        assert_eq!(config.memory_capacity, 10);
        assert_eq!(config.default_ttl, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert!(!config.sweep_enabled);
        assert_eq!(config.storage_namespace, "test_");
        assert_eq!(config.persistent_quota_bytes, 1024);
    }

    #[test]
    fn test_cache_config_rejects_zero_capacity() {
        let config = CacheConfig::new().with_memory_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(StrideError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "memory_capacity"
        ));
    }

    #[test]
    fn test_cache_config_rejects_bad_stale_fraction() {
        let config = CacheConfig {
            stale_fraction: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_config_rejects_empty_namespace() {
        let config = CacheConfig::new().with_namespace("");
        assert!(matches!(
            config.validate(),
            Err(StrideError::Config(ConfigError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_session_config_defaults_validate() {
        let session = SessionConfig::default();
        assert!(session.validate(&CacheConfig::default()).is_ok());
    }

    #[test]
    fn test_session_config_marker_outside_cache_namespace() {
        let session = SessionConfig {
            last_user_key: "stride_cache_last".to_string(),
            ..Default::default()
        };
        assert!(session.validate(&CacheConfig::default()).is_err());
    }

    #[test]
    fn test_session_config_namespaces_must_not_overlap() {
        let session = SessionConfig {
            auth_namespace: "stride_".to_string(),
            ..Default::default()
        };
        assert!(session.validate(&CacheConfig::default()).is_err());
    }
}
