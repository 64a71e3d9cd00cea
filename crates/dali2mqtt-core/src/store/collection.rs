// ── Reactive keyed collection ──
//
// Concurrent storage with O(1) lookups and push-based change notification
// via `watch` channels.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A reactive collection for one record type.
///
/// Uses `DashMap` for concurrent lookups and `watch` channels for
/// push-based change notification. Every mutation bumps a version counter
/// and rebuilds the snapshot that subscribers receive. Snapshots are
/// ordered by key.
pub(crate) struct Collection<K, T>
where
    K: Clone + Ord + Hash + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    by_key: DashMap<K, Arc<T>>,

    /// Bumped on every mutation.
    version: watch::Sender<u64>,

    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<K, T> Collection<K, T>
where
    K: Clone + Ord + Hash + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_key: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or replace. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: K, value: T) -> bool {
        let is_new = self.by_key.insert(key, Arc::new(value)).is_none();
        self.changed();
        is_new
    }

    /// Apply `f` to a copy of the stored value and store the result.
    /// Returns the new value, or `None` if the key is absent.
    pub(crate) fn modify(&self, key: &K, f: impl FnOnce(&mut T)) -> Option<Arc<T>>
    where
        T: Clone,
    {
        let updated = {
            let mut entry = self.by_key.get_mut(key)?;
            let mut value = T::clone(entry.value());
            f(&mut value);
            let value = Arc::new(value);
            *entry.value_mut() = Arc::clone(&value);
            value
        };
        self.changed();
        Some(updated)
    }

    pub(crate) fn remove(&self, key: &K) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.changed();
        }
        removed
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.by_key.contains_key(key)
    }

    /// Current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    /// All keys, ordered.
    pub(crate) fn keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.by_key.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn changed(&self) {
        let mut entries: Vec<(K, Arc<T>)> = self
            .by_key
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}
