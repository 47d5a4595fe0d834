use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::Result;

/// Durable store consulted when no in-memory version answers a read.
///
/// Implementations must be side-effect free from the engine's point of view.
pub trait BackingStore: Send + Sync {
    fn search(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// A store that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyStore;

impl BackingStore for EmptyStore {
    fn search(&self, _key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// An in-memory ordered store, useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for MemoryStore
where
    K: Into<Vec<u8>>,
    V: Into<Vec<u8>>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(pairs: I) -> Self {
        let store = MemoryStore::new();
        for (key, value) in pairs {
            store.insert(key, value);
        }
        store
    }
}

impl BackingStore for MemoryStore {
    fn search(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_finds_nothing() {
        assert_eq!(EmptyStore.search(b"k").unwrap(), None);
    }

    #[test]
    fn memory_store_round_trip() {
        let store: MemoryStore = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(store.len(), 2);
        assert_eq!(store.search(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.remove(b"a"), Some(b"1".to_vec()));
        assert_eq!(store.search(b"a").unwrap(), None);
        assert!(!store.is_empty());
    }
}
