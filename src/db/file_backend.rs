use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::db::backend::StorageBackend;
use crate::errors::{StoreError, StoreResult};

/// Stores each key as `<dir>/<key>.json`.
///
/// Writes go to a sibling temp file and are renamed into place, so a crash mid
/// write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Opens (and creates if needed) the data directory.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            error!("Failed to create storage directory {}: {e}", dir.display());
            StoreError::Io(e)
        })?;
        debug!("File backend opened at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!("Failed to read key {key}: {e}");
                Err(StoreError::read(key, e))
            }
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| {
                error!("Failed to write key {key}: {e}");
                let _ = fs::remove_file(&tmp);
                StoreError::write(key, e)
            })
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!("Failed to remove key {key}: {e}");
                Err(StoreError::write(key, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_nested_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let backend = FileBackend::open(&nested).unwrap();
        assert!(backend.dir().is_dir());
    }

    #[test]
    fn values_survive_a_new_handle() {
        let dir = tempdir().unwrap();
        FileBackend::open(dir.path())
            .unwrap()
            .set("ai_chat_history", b"{}")
            .unwrap();

        let reopened = FileBackend::open(dir.path()).unwrap();
        assert_eq!(reopened.get("ai_chat_history").unwrap(), Some(b"{}".to_vec()));
        assert!(!dir.path().join("ai_chat_history.json.tmp").exists());
    }

    #[test]
    fn missing_key_reads_as_none_and_removes_cleanly() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        assert!(backend.get("nothing").unwrap().is_none());
        backend.remove("nothing").unwrap();
    }

    #[test]
    fn keys_are_sanitized_into_file_names() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.set("../escape", b"x").unwrap();
        assert!(dir.path().join("___escape.json").exists());
        assert_eq!(backend.get("../escape").unwrap(), Some(b"x".to_vec()));
    }
}
