//! In-process implementation of [`RemoteStore`].
//!
//! Documents live in a path-keyed map; subscribers are notified synchronously
//! on every write. Used for local development and as the backing store in
//! tests. Can be switched offline to simulate a failing backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use stride_core::{
    ChangeCallback, Document, FetchError, RemoteStore, StrideError, StrideResult, Subscription,
    WriteOptions,
};

type Listener = Arc<dyn Fn(Option<Document>) + Send + Sync>;
type Listeners = Arc<Mutex<HashMap<String, Vec<(u64, Listener)>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory document store.
#[derive(Default)]
pub struct InMemoryRemoteStore {
    docs: RwLock<BTreeMap<String, Document>>,
    listeners: Listeners,
    next_listener: AtomicU64,
    offline: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
    queries: AtomicUsize,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read, write and query fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Insert a document without counting it as a write.
    pub fn seed(&self, path: &str, doc: Document) {
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), doc);
    }

    /// Delete a document, notifying subscribers.
    pub fn delete_doc(&self, path: &str) -> bool {
        let existed = self
            .docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some();
        if existed {
            self.notify(path, None);
        }
        existed
    }

    /// Current contents of a document.
    pub fn peek(&self, path: &str) -> Option<Document> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions on `path`.
    pub fn subscriber_count(&self, path: &str) -> usize {
        lock(&self.listeners).get(path).map_or(0, Vec::len)
    }

    fn check_online(&self, path: &str) -> StrideResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StrideError::Fetch(FetchError::Remote {
                path: path.to_string(),
                reason: "remote store offline".to_string(),
            }));
        }
        Ok(())
    }

    fn notify(&self, path: &str, doc: Option<Document>) {
        // Snapshot the listeners so callbacks run without the lock held.
        let listeners: Vec<Listener> = lock(&self.listeners)
            .get(path)
            .map(|subs| subs.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(doc.clone());
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn read_doc(&self, path: &str) -> StrideResult<Option<Document>> {
        self.check_online(path)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.peek(path))
    }

    async fn write_doc(
        &self,
        path: &str,
        fields: Document,
        options: WriteOptions,
    ) -> StrideResult<()> {
        self.check_online(path)?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let updated = {
            let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
            let doc = docs.entry(path.to_string()).or_default();
            if options.merge {
                doc.extend(fields);
            } else {
                *doc = fields;
            }
            doc.clone()
        };

        self.notify(path, Some(updated));
        Ok(())
    }

    fn subscribe(&self, path: &str, on_change: ChangeCallback) -> Subscription {
        let listener: Listener = Arc::from(on_change);
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);

        lock(&self.listeners)
            .entry(path.to_string())
            .or_default()
            .push((id, Arc::clone(&listener)));

        listener(self.peek(path));

        let listeners = Arc::clone(&self.listeners);
        let path = path.to_string();
        Subscription::new(move || {
            let mut listeners = lock(&listeners);
            if let Some(subs) = listeners.get_mut(&path) {
                subs.retain(|(sub_id, _)| *sub_id != id);
                if subs.is_empty() {
                    listeners.remove(&path);
                }
            }
        })
    }

    async fn query_range(
        &self,
        collection: &str,
        field: &str,
        lower: &str,
        upper: &str,
    ) -> StrideResult<Vec<Document>> {
        self.check_online(collection)?;
        self.queries.fetch_add(1, Ordering::SeqCst);

        let prefix = format!("{}/", collection.trim_end_matches('/'));
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(docs
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .filter(|(_, doc)| {
                doc.get(field)
                    .and_then(Value::as_str)
                    .is_some_and(|v| v >= lower && v <= upper)
            })
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}
