//! Remote document store interface.
//!
//! The backing database is treated as an opaque key-value store with point
//! reads, merge/overwrite writes, per-document subscriptions and a single
//! range query. Implementations live outside this crate.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StrideResult;

/// A document's top-level fields.
pub type Document = Map<String, Value>;

/// Callback invoked with the new document state (or `None` once deleted).
pub type ChangeCallback = Box<dyn Fn(Option<Document>) + Send + Sync>;

/// Options for [`RemoteStore::write_doc`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Merge the given fields into the existing document instead of replacing it.
    pub merge: bool,
}

impl WriteOptions {
    pub fn merge() -> Self {
        Self { merge: true }
    }

    pub fn replace() -> Self {
        Self { merge: false }
    }
}

/// Handle for a live subscription. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Stop receiving updates.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Remote document database.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read a single document.
    async fn read_doc(&self, path: &str) -> StrideResult<Option<Document>>;

    /// Write a document, merging or replacing its fields.
    async fn write_doc(&self, path: &str, fields: Document, options: WriteOptions)
        -> StrideResult<()>;

    /// Subscribe to changes of one document.
    ///
    /// The callback fires once with the current state and again on every change.
    fn subscribe(&self, path: &str, on_change: ChangeCallback) -> Subscription;

    /// Documents directly under `collection` whose `field` lies in
    /// `[lower, upper]` (inclusive, compared as strings).
    async fn query_range(
        &self,
        collection: &str,
        field: &str,
        lower: &str,
        upper: &str,
    ) -> StrideResult<Vec<Document>>;
}
