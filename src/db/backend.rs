use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::errors::StoreResult;

/// Durable string-keyed byte store.
///
/// Calls are synchronous. Implementations must be safe to share across threads;
/// the store serializes its own read-modify-write cycles on top.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Process-local backend, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Shared handles are backends too, so tests can keep a reference to the
/// backend they hand to the store.
impl<T: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<T> {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        (**self).remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_set_get_remove() {
        let backend = MemoryBackend::new();
        assert!(backend.get("k").unwrap().is_none());

        backend.set("k", b"value").unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some(&b"value"[..]));
        assert_eq!(backend.len(), 1);

        backend.remove("k").unwrap();
        backend.remove("k").unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn arc_handle_shares_entries() {
        let shared = std::sync::Arc::new(MemoryBackend::new());
        let handle = shared.clone();
        handle.set("k", b"1").unwrap();
        assert_eq!(shared.get("k").unwrap(), Some(b"1".to_vec()));
    }
}
