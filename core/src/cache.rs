//! Append-only caches shared across concurrent evaluations.
//!
//! Readers clone the currently published snapshot and search it without
//! blocking each other. A miss takes the populate lock, checks again, resolves,
//! and publishes a new snapshot holding the old entries plus the new one.
//! Entries are never replaced or removed.
use indexmap::IndexMap;
use std::{
    fmt,
    hash::Hash,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

pub struct SnapshotCache<K, V> {
    snapshot: RwLock<Arc<IndexMap<K, V>>>,
    populate: Mutex<()>,
}

impl<K, V> SnapshotCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IndexMap::new())),
            populate: Mutex::new(()),
        }
    }

    /// Currently published entries.
    pub fn snapshot(&self) -> Arc<IndexMap<K, V>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.snapshot().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Return the cached value for `key`, resolving and publishing it on a miss.
    /// `resolve` runs at most once per missing key.
    /// Failures are returned as is and not cached.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &K,
        resolve: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let _guard = self.populate.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        if let Some(value) = current.get(key) {
            return Ok(value.clone());
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(entries = current.len(), "cache miss");

        let value = resolve()?;
        let mut next = (*current).clone();
        next.insert(key.clone(), value.clone());
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);

        Ok(value)
    }
}

impl<K, V> Default for SnapshotCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for SnapshotCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.snapshot().keys()).finish()
    }
}
