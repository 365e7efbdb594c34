//! Typed concurrent collection used for every session-scoped cache.
//!
//! Each cache (room membership, capability flags, activity timestamps) gets
//! its own `Collection`, so unrelated rooms never contend on one lock.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use dashmap::DashMap;

/// Thread-safe key/value map with clone-out reads.
///
/// Reads never hand out references into the map, which keeps callers from
/// holding a shard guard across an `.await`.
pub struct Collection<K, V> {
    inner: DashMap<K, V>,
}

impl<K, V> Collection<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Return a copy of the value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    /// Insert or replace the value, returning the previous one.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    /// Insert only when the key is absent. Returns `true` if inserted.
    pub fn set_if_absent(&self, key: K, value: V) -> bool {
        let mut inserted = false;
        self.inner.entry(key).or_insert_with(|| {
            inserted = true;
            value
        });
        inserted
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.remove(key).map(|(_, value)| value)
    }

    /// Remove the entry only while `predicate` holds for its value.
    pub fn remove_if<Q>(&self, key: &Q, predicate: impl FnOnce(&V) -> bool) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner
            .remove_if(key, |_, value| predicate(value))
            .map(|(_, value)| value)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.contains_key(key)
    }

    /// Mutate the value in place, creating it with `init` first if needed.
    pub fn update<F>(&self, key: K, init: impl FnOnce() -> V, mutate: F)
    where
        F: FnOnce(&mut V),
    {
        let mut entry = self.inner.entry(key).or_insert_with(init);
        mutate(entry.value_mut());
    }

    /// Mutate the value in place only if it exists. Returns whether it did.
    pub fn update_existing<Q, F>(&self, key: &Q, mutate: F) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&mut V),
    {
        match self.inner.get_mut(key) {
            Some(mut entry) => {
                mutate(entry.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl<K, V> Default for Collection<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for Collection<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self
            .inner
            .iter()
            .map(|entry| format!("{:?}", entry.key()))
            .collect();
        f.debug_struct("Collection").field("keys", &keys).finish()
    }
}
