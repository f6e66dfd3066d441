//! Persistent license storage.
//!
//! The client keeps one JSON document: the activation snapshot plus any
//! post-update notice left by the last install. Absence of stored data
//! means "not yet activated".

use dm_license::LicenseSnapshot;
use dm_update::PostUpdateNotice;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// File name used inside the data directory.
pub const STORE_FILE_NAME: &str = "license.json";

/// Byte-level persistence.
pub trait PersistentStore: Send + Sync {
    /// Returns the stored bytes, or `None` if nothing was saved.
    fn load(&self) -> StoreResult<Option<Vec<u8>>>;

    /// Replaces the stored bytes.
    fn save(&self, bytes: &[u8]) -> StoreResult<()>;

    /// Removes stored data. Clearing an empty store succeeds.
    fn clear(&self) -> StoreResult<()>;
}

/// The document the client persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredState {
    /// Activation snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<LicenseSnapshot>,
    /// Notice from the last installed update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_update: Option<PostUpdateNotice>,
}

impl StoredState {
    /// Returns true when nothing needs persisting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.license.is_none() && self.post_update.is_none()
    }

    /// Reads the document from `store`.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be read or holds invalid JSON.
    pub fn load_from(store: &dyn PersistentStore) -> StoreResult<Self> {
        match store.load()? {
            Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
            _ => Ok(Self::default()),
        }
    }

    /// Writes the document to `store`, clearing it when empty.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be written.
    pub fn save_to(&self, store: &dyn PersistentStore) -> StoreResult<()> {
        if self.is_empty() {
            return store.clear();
        }
        store.save(&serde_json::to_vec_pretty(self)?)
    }
}

/// Stores license data in `license.json` inside a directory.
///
/// The directory is created on first save. Writes go to a temporary file
/// that is renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `data_directory`.
    pub fn new(data_directory: impl AsRef<Path>) -> Self {
        Self {
            path: data_directory.as_ref().join(STORE_FILE_NAME),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistentStore for FileStore {
    fn load(&self) -> StoreResult<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn save(&self, bytes: &[u8]) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Saved {} bytes to {}", bytes.len(), self.path.display());
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(StoreError::Io(e)),
            _ => Ok(()),
        }
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `bytes`.
    #[must_use]
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes)),
        }
    }

    /// Returns the stored bytes.
    #[must_use]
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PersistentStore for MemoryStore {
    fn load(&self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.contents())
    }

    fn save(&self, bytes: &[u8]) -> StoreResult<()> {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes.to_vec());
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
