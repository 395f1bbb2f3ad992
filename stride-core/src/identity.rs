//! Identity types for Stride users and items

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Milliseconds since the Unix epoch, as stored on cache entries.
pub type EpochMs = i64;

/// Duration in milliseconds for TTL values.
pub type DurationMs = i64;

/// Identifier for list items (goals, todos, habits, skills).
pub type ItemId = Uuid;

/// Generate a new UUIDv7 item id (timestamp-sortable).
pub fn new_item_id() -> ItemId {
    Uuid::now_v7()
}

/// Opaque per-account identifier issued by the authentication provider.
///
/// Cache keys embed this value verbatim, so it must be non-empty and must
/// not contain the `:` key separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap a provider identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::InvalidUserId {
                value,
                reason: "must not be empty".to_string(),
            });
        }
        if value.contains(':') {
            return Err(ValidationError::InvalidUserId {
                value,
                reason: "must not contain ':'".to_string(),
            });
        }
        if value.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidUserId {
                value,
                reason: "must not contain whitespace".to_string(),
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for UserId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}
