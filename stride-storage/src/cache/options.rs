//! Per-call cache options.

use std::collections::BTreeSet;
use std::time::Duration;

use stride_core::DEFAULT_TTL;

/// Options for a cache write or read-through.
///
/// Defaults: 5 minute TTL, memory tier on, persistent tier off, no tags,
/// no stale-while-revalidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub use_memory: bool,
    pub use_storage: bool,
    pub tags: BTreeSet<String>,
    pub stale_while_revalidate: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            use_memory: true,
            use_storage: false,
            tags: BTreeSet::new(),
            stale_while_revalidate: false,
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_memory(mut self, enabled: bool) -> Self {
        self.use_memory = enabled;
        self
    }

    /// Also write the entry to the persistent tier.
    pub fn persisted(mut self) -> Self {
        self.use_storage = true;
        self
    }

    /// Keep the entry in the memory tier only.
    pub fn memory_only(mut self) -> Self {
        self.use_memory = true;
        self.use_storage = false;
        self
    }

    pub fn with_storage(mut self, enabled: bool) -> Self {
        self.use_storage = enabled;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Serve stale entries immediately and refresh them in the background.
    pub fn stale_while_revalidate(mut self) -> Self {
        self.stale_while_revalidate = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = CacheOptions::default();
        assert_eq!(opts.ttl, Duration::from_secs(300));
        assert!(opts.use_memory);
        assert!(!opts.use_storage);
        assert!(opts.tags.is_empty());
        assert!(!opts.stale_while_revalidate);
    }

    #[test]
    fn test_builder() {
        let opts = CacheOptions::new()
            .with_ttl(Duration::from_secs(120))
            .persisted()
            .with_tag("todo:u1")
            .with_tags(["period:daily", "todo:u1"])
            .stale_while_revalidate();

        assert_eq!(opts.ttl, Duration::from_secs(120));
        assert!(opts.use_storage);
        assert_eq!(opts.tags.len(), 2);
        assert!(opts.stale_while_revalidate);
    }
}
