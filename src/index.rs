//! In-memory hostname indexes backed by Kubernetes watches.
//!
//! Each watched kind owns one [`ResourceIndex`]: a multi-map from index key
//! (lowercased hostname, or `namespace/name` for Gateways) to the objects
//! advertising it. Watch events apply whole objects at a time, so readers on
//! the query path observe either the pre- or post-update key set of an
//! object, never a partial one. A watch (re)list is buffered and swapped in
//! on completion, keeping the previous view queryable throughout.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use kube::ResourceExt;

use crate::metrics;

/// Extracts the index keys an object should be discoverable under.
///
/// Returning an empty vec excludes the object from the index entirely.
pub type KeyFn<T> = fn(&T) -> Vec<String>;

/// Thread-safe index over one resource kind.
pub struct ResourceIndex<T> {
    kind: &'static str,
    key_fn: KeyFn<T>,
    inner: Arc<RwLock<IndexInner<T>>>,
}

impl<T> Clone for ResourceIndex<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            key_fn: self.key_fn,
            inner: Arc::clone(&self.inner),
        }
    }
}

struct IndexedObject<T> {
    object: Arc<T>,
    keys: Vec<String>,
}

struct IndexInner<T> {
    /// `namespace/name` -> object and its current index keys.
    objects: HashMap<String, IndexedObject<T>>,

    /// index key -> object keys (derived from `objects`).
    by_key: HashMap<String, Vec<String>>,

    /// Buffer holding a watch (re)list in progress.
    relist: Option<HashMap<String, IndexedObject<T>>>,

    /// True once the first full list has been applied. Monotonic.
    synced: bool,
}

impl<T: ResourceExt> ResourceIndex<T> {
    /// Create an empty index for the given kind.
    pub fn new(kind: &'static str, key_fn: KeyFn<T>) -> Self {
        Self {
            kind,
            key_fn,
            inner: Arc::new(RwLock::new(IndexInner {
                objects: HashMap::new(),
                by_key: HashMap::new(),
                relist: None,
                synced: false,
            })),
        }
    }

    fn object_key(object: &T) -> String {
        format!(
            "{}/{}",
            object.namespace().unwrap_or_default(),
            object.name_any()
        )
    }

    fn indexed(&self, object: T) -> IndexedObject<T> {
        let keys = (self.key_fn)(&object);
        IndexedObject {
            object: Arc::new(object),
            keys,
        }
    }

    /// Insert or update an object from a watch event.
    pub fn apply(&self, object: T) {
        let key = Self::object_key(&object);
        let indexed = self.indexed(object);
        let mut inner = self.inner.write();
        debug!(kind = self.kind, object = %key, index_keys = ?indexed.keys, "applying object");
        inner.objects.insert(key, indexed);
        Self::rebuild(self.kind, &mut inner);
    }

    /// Remove an object from a watch delete event.
    pub fn delete(&self, object: &T) {
        let key = Self::object_key(object);
        let mut inner = self.inner.write();
        if inner.objects.remove(&key).is_some() {
            debug!(kind = self.kind, object = %key, "removed object");
            Self::rebuild(self.kind, &mut inner);
        }
    }

    /// Begin buffering a watch (re)list. The current view stays queryable
    /// until [`relist_done`](Self::relist_done).
    pub fn begin_relist(&self) {
        let mut inner = self.inner.write();
        inner.relist = Some(HashMap::new());
    }

    /// Add an object to the (re)list buffer.
    pub fn relist_apply(&self, object: T) {
        let key = Self::object_key(&object);
        let indexed = self.indexed(object);
        let mut inner = self.inner.write();
        match inner.relist.as_mut() {
            Some(buffer) => {
                buffer.insert(key, indexed);
            }
            // A stray page without a preceding relist start: treat as a
            // plain apply rather than dropping the object.
            None => {
                inner.objects.insert(key, indexed);
                Self::rebuild(self.kind, &mut inner);
            }
        }
    }

    /// Atomically swap the (re)list buffer in and mark the index synced.
    pub fn relist_done(&self) {
        let mut inner = self.inner.write();
        if let Some(buffer) = inner.relist.take() {
            inner.objects = buffer;
            Self::rebuild(self.kind, &mut inner);
        }
        inner.synced = true;
    }

    /// Objects indexed under the given key. Hostname keys are stored
    /// lowercase; callers lowercase before lookup.
    pub fn get(&self, key: &str) -> Vec<Arc<T>> {
        let inner = self.inner.read();
        match inner.by_key.get(key) {
            Some(object_keys) => object_keys
                .iter()
                .filter_map(|k| inner.objects.get(k))
                .map(|indexed| Arc::clone(&indexed.object))
                .collect(),
            None => Vec::new(),
        }
    }

    /// True once the initial list completed. Monotonic.
    pub fn has_synced(&self) -> bool {
        self.inner.read().synced
    }

    /// Number of indexed objects.
    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    /// True if no objects are indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct index keys.
    pub fn keys_len(&self) -> usize {
        self.inner.read().by_key.len()
    }

    /// The kind name this index serves.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    fn rebuild(kind: &'static str, inner: &mut IndexInner<T>) {
        inner.by_key.clear();
        for (object_key, indexed) in &inner.objects {
            for key in &indexed.keys {
                inner
                    .by_key
                    .entry(key.clone())
                    .or_default()
                    .push(object_key.clone());
            }
        }
        metrics::record_index_size(kind, inner.objects.len(), inner.by_key.len());
    }
}
