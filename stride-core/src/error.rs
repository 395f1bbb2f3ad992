//! Error types for Stride cache operations

use thiserror::Error;

/// Persistent-tier errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Quota exceeded writing {key}: needed {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("I/O error: {reason}")]
    Io { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Errors raised by a fetcher passed to the cache.
///
/// This is the only error kind that crosses the cache boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Remote request for {path} failed: {reason}")]
    Remote { path: String, reason: String },

    #[error("Document not found: {path}")]
    NotFound { path: String },

    #[error("Could not decode document at {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("Fetch task for {key} was aborted: {reason}")]
    Aborted { key: String, reason: String },
}

/// Errors converting cached values to and from their stored form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Could not serialize value for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Could not deserialize entry for {key}: {reason}")]
    Deserialization { key: String, reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid user id {value:?}: {reason}")]
    InvalidUserId { value: String, reason: String },

    #[error("Invalid key segment {value:?}: {reason}")]
    InvalidKeySegment { value: String, reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidFieldValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Session lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Sign-out failed: {reason}")]
    SignOutFailed { reason: String },

    #[error("Cache corruption detected: {reason}")]
    CorruptionDetected { reason: String },

    #[error("Platform request cache could not be cleared: {reason}")]
    RequestCacheClearFailed { reason: String },
}

/// Master error type for all Stride errors.
#[derive(Debug, Clone, Error)]
pub enum StrideError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl StrideError {
    /// True when the error came from a fetcher rather than the cache itself.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }
}

/// Result type alias for Stride operations.
pub type StrideResult<T> = Result<T, StrideError>;

// =============================================================================
// TESTS
// =============================================================================
