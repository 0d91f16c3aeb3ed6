//! Keyed record storage shared by both sides.
//!
//! Every store is injected into the component that uses it; nothing holds a
//! process-global map. Writes are atomic per key and there are no multi-key
//! transactions.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::error;

/// Identifier-keyed store abstraction.
pub trait Store<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    /// Insert or replace the value stored under `key`.
    fn upsert(&self, key: K, value: V);

    /// Remove and return the value under `key`, if any.
    fn remove(&self, key: &K) -> Option<V>;

    /// All values, ordered by key.
    fn list(&self) -> Vec<V>;

    /// Apply `f` to the value under `key` in place and return the result.
    ///
    /// Returns `None` (and does not call `f`) when the key is absent.
    fn modify(&self, key: &K, f: &mut dyn FnMut(&mut V)) -> Option<V>;

    /// Values matching `predicate`, ordered by key.
    fn find_by(&self, predicate: &dyn Fn(&V) -> bool) -> Vec<V> {
        self.list().into_iter().filter(|v| predicate(v)).collect()
    }
}

impl<K, V, S> Store<K, V> for Arc<S>
where
    S: Store<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) {
        (**self).upsert(key, value)
    }

    fn remove(&self, key: &K) -> Option<V> {
        (**self).remove(key)
    }

    fn list(&self) -> Vec<V> {
        (**self).list()
    }

    fn modify(&self, key: &K, f: &mut dyn FnMut(&mut V)) -> Option<V> {
        (**self).modify(key, f)
    }

    fn find_by(&self, predicate: &dyn Fn(&V) -> bool) -> Vec<V> {
        (**self).find_by(predicate)
    }
}

/// In-memory store for tests/dev.
///
/// Readers take a shared lock and clone out whole values, so a reader sees a
/// value either before or after a write, never halfway.
#[derive(Debug)]
pub struct InMemoryStore<K, V> {
    inner: RwLock<BTreeMap<K, V>>,
}

impl<K, V> InMemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InMemoryStore<K, V> {
    fn read(&self, operation: &'static str) -> Option<RwLockReadGuard<'_, BTreeMap<K, V>>> {
        match self.inner.read() {
            Ok(guard) => Some(guard),
            Err(_) => {
                error!(operation, "store lock poisoned; read skipped");
                None
            }
        }
    }

    fn write(&self, operation: &'static str) -> Option<RwLockWriteGuard<'_, BTreeMap<K, V>>> {
        match self.inner.write() {
            Ok(guard) => Some(guard),
            Err(_) => {
                error!(operation, "store lock poisoned; write dropped");
                None
            }
        }
    }
}

impl<K, V> Store<K, V> for InMemoryStore<K, V>
where
    K: Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        self.read("get")?.get(key).cloned()
    }

    fn upsert(&self, key: K, value: V) {
        if let Some(mut map) = self.write("upsert") {
            map.insert(key, value);
        }
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.write("remove")?.remove(key)
    }

    fn list(&self) -> Vec<V> {
        match self.read("list") {
            Some(map) => map.values().cloned().collect(),
            None => vec![],
        }
    }

    fn modify(&self, key: &K, f: &mut dyn FnMut(&mut V)) -> Option<V> {
        let mut map = self.write("modify")?;
        let value = map.get_mut(key)?;
        f(value);
        Some(value.clone())
    }

    fn find_by(&self, predicate: &dyn Fn(&V) -> bool) -> Vec<V> {
        match self.read("find_by") {
            Some(map) => map.values().filter(|v| predicate(v)).cloned().collect(),
            None => vec![],
        }
    }
}
