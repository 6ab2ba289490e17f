use tracing::{error, warn};

use crate::db::backend::StorageBackend;
use crate::errors::StoreResult;
use crate::models::StorageRoot;

/// Reads and writes the root record as one JSON blob under a fixed key.
pub struct RootRepository {
    backend: Box<dyn StorageBackend>,
    key: String,
}

impl RootRepository {
    pub fn new(backend: Box<dyn StorageBackend>, key: impl Into<String>) -> Self {
        Self { backend, key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the root record.
    ///
    /// A blob that no longer decodes is reported and treated as absent, so the
    /// caller re-initializes storage instead of failing forever.
    pub fn load(&self) -> StoreResult<Option<StorageRoot>> {
        let Some(bytes) = self.backend.get(&self.key)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<StorageRoot>(&bytes) {
            Ok(root) => Ok(Some(root)),
            Err(e) => {
                warn!("Discarding unreadable chat history under '{}': {e}", self.key);
                Ok(None)
            }
        }
    }

    /// Persists the root record, returning the number of bytes written.
    pub fn save(&self, root: &StorageRoot) -> StoreResult<usize> {
        let bytes = serde_json::to_vec(root).map_err(|e| {
            error!("Failed to serialize chat history: {e}");
            e
        })?;
        self.backend.set(&self.key, &bytes)?;
        Ok(bytes.len())
    }

    pub fn remove(&self) -> StoreResult<()> {
        self.backend.remove(&self.key)
    }

    /// Byte size of the stored blob, 0 when nothing is stored.
    pub fn stored_size(&self) -> StoreResult<usize> {
        Ok(self.backend.get(&self.key)?.map_or(0, |b| b.len()))
    }
}
