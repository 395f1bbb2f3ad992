//! Cache entries and their freshness rules.
//!
//! An entry is valid while `now - timestamp < ttl`. A valid entry is stale
//! once its age exceeds a fraction of the TTL; stale entries are still served
//! but may trigger a background refresh.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stride_core::{DurationMs, EpochMs};

/// A cached value with its write time, lifetime and tags.
///
/// This is also the persisted form: the persistent tier holds the JSON
/// encoding of a `CacheEntry` whose TTL has been stretched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    /// Write time in epoch milliseconds.
    pub timestamp: EpochMs,
    /// Lifetime in milliseconds.
    pub ttl: DurationMs,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl CacheEntry {
    pub fn new(data: Value, timestamp: EpochMs, ttl: Duration, tags: BTreeSet<String>) -> Self {
        Self {
            data,
            timestamp,
            ttl: duration_ms(ttl),
            tags,
        }
    }

    /// Age at `now`. Never negative, even if the clock moved backwards.
    pub fn age(&self, now: EpochMs) -> DurationMs {
        now.saturating_sub(self.timestamp).max(0)
    }

    pub fn expires_at(&self) -> EpochMs {
        self.timestamp.saturating_add(self.ttl)
    }

    pub fn is_valid(&self, now: EpochMs) -> bool {
        self.age(now) < self.ttl
    }

    /// Valid, but older than `stale_fraction` of the TTL.
    pub fn is_stale(&self, now: EpochMs, stale_fraction: f64) -> bool {
        self.is_valid(now) && self.age(now) as f64 > self.ttl as f64 * stale_fraction
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Copy of this entry with its TTL multiplied, for the persistent tier.
    pub fn stretched(&self, multiplier: u32) -> Self {
        Self {
            ttl: self.ttl.saturating_mul(i64::from(multiplier)),
            ..self.clone()
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Convert a duration to whole milliseconds, saturating.
pub fn duration_ms(d: Duration) -> DurationMs {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
