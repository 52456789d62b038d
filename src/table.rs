use ahash::{HashMap, HashMapExt};
use parking_lot::RwLock;

/// Concurrent table keyed by a 32-bit ID, shared by the role registries and
/// the callback tables.
///
/// The default HashMap is created without allocating capacity. The tables sit
/// on the dispatch path of every message, so a working set worth of slots is
/// allocated up front.
pub struct Table<T> {
    map: RwLock<HashMap<u32, T>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::with_capacity(32)),
        }
    }
}

impl<T> Table<T>
where
    T: Clone,
{
    pub fn get(&self, key: u32) -> Option<T> {
        self.map.read().get(&key).cloned()
    }

    /// Insert unconditionally, replacing any previous entry.
    pub fn set(&self, key: u32, value: T) {
        self.map.write().insert(key, value);
    }

    /// Insert only when the slot is free. Returns false when it is taken.
    pub fn try_set(&self, key: u32, value: T) -> bool {
        let mut map = self.map.write();
        if map.contains_key(&key) {
            return false;
        }

        map.insert(key, value);
        true
    }

    /// Remove entries. Absent keys are a no-op.
    pub fn delete(&self, keys: &[u32]) {
        let mut map = self.map.write();
        for key in keys {
            map.remove(key);
        }
    }
}
