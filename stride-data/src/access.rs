//! Shared plumbing for the per-feature data-access functions.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use stride_core::{
    CacheError, Clock, Document, FetchError, RemoteStore, StrideError, StrideResult,
};
use stride_storage::CacheEngine;

/// Cached access to one user's documents.
///
/// Reads go through the cache engine; writes go to the remote store first and
/// then refresh the cached copy.
#[derive(Clone)]
pub struct DataAccess {
    pub(crate) engine: CacheEngine,
    pub(crate) remote: Arc<dyn RemoteStore>,
}

impl DataAccess {
    pub fn new(engine: CacheEngine, remote: Arc<dyn RemoteStore>) -> Self {
        Self { engine, remote }
    }

    pub fn engine(&self) -> &CacheEngine {
        &self.engine
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.engine.clock()
    }

    /// Current calendar date according to the engine's clock.
    pub fn today(&self) -> NaiveDate {
        self.engine.clock().today()
    }
}

impl std::fmt::Debug for DataAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccess")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Document layout in the remote store.
pub mod paths {
    use chrono::NaiveDate;
    use stride_core::{Period, UserId, YearMonth};

    pub fn profile(user_id: &UserId) -> String {
        format!("users/{}", user_id)
    }

    pub fn goals(user_id: &UserId) -> String {
        format!("users/{}/planner/goals", user_id)
    }

    pub fn habits(user_id: &UserId, month: YearMonth) -> String {
        format!("users/{}/habits/{}", user_id, month)
    }

    pub fn todos(user_id: &UserId, period: Period, date: NaiveDate) -> String {
        format!(
            "users/{}/todos/{}-{}",
            user_id,
            period.as_str(),
            date.format("%Y-%m-%d")
        )
    }

    pub fn journal_collection(user_id: &UserId) -> String {
        format!("users/{}/journal", user_id)
    }

    pub fn journal(user_id: &UserId, date: NaiveDate) -> String {
        format!("{}/{}", journal_collection(user_id), date.format("%Y-%m-%d"))
    }

    pub fn skills(user_id: &UserId) -> String {
        format!("users/{}/skills/all", user_id)
    }
}

// ============================================================================
// DOCUMENT CONVERSION
// ============================================================================

pub(crate) fn decode_doc<T: DeserializeOwned>(path: &str, doc: Document) -> StrideResult<T> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| {
        StrideError::Fetch(FetchError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
    })
}

pub(crate) fn encode_doc<T: Serialize>(path: &str, value: &T) -> StrideResult<Document> {
    match serde_json::to_value(value) {
        Ok(Value::Object(doc)) => Ok(doc),
        Ok(other) => Err(StrideError::Cache(CacheError::Serialization {
            key: path.to_string(),
            reason: format!("expected an object, got {}", type_name(&other)),
        })),
        Err(e) => Err(StrideError::Cache(CacheError::Serialization {
            key: path.to_string(),
            reason: e.to_string(),
        })),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read and decode a document, or `None` when it does not exist.
pub(crate) async fn read_optional<T: DeserializeOwned>(
    remote: &dyn RemoteStore,
    path: &str,
) -> StrideResult<Option<T>> {
    match remote.read_doc(path).await? {
        Some(doc) => decode_doc(path, doc).map(Some),
        None => Ok(None),
    }
}

/// Read and decode a document, falling back to `T::default()` when absent.
pub(crate) async fn read_or_default<T: DeserializeOwned + Default>(
    remote: &dyn RemoteStore,
    path: &str,
) -> StrideResult<T> {
    Ok(read_optional(remote, path).await?.unwrap_or_default())
}
