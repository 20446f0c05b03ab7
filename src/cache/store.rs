//! On-disk cache store
//!
//! Persists raw response bodies as one file per key, grouped into namespace
//! directories under a single root:
//!
//! ```text
//! <root>/<namespace>/<key>
//! ```
//!
//! Files hold the body exactly as fetched, with no envelope or metadata.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use directories::ProjectDirs;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use super::key::CacheKey;

/// Prefix for in-progress writes; such files are never reported as entries
const TEMP_PREFIX: &str = ".tmp-";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors returned by [`CacheStore`] operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entry exists for the key
    #[error("no cache entry for {namespace}/{key}")]
    NotFound { namespace: String, key: String },

    /// Namespace or key is not a single plain path component
    #[error("invalid cache name: '{0}'")]
    InvalidName(String),

    /// Underlying filesystem failure
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// File-backed key/value store for cached response bodies
///
/// Every key is an independent file, so operations on different keys never
/// contend. Concurrent `create` calls on the same key are last-write-wins.
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// Directory holding one subdirectory per namespace
    root: PathBuf,
}

impl CacheStore {
    /// Creates a store rooted at the given directory
    ///
    /// The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a store in the XDG-compliant cache directory
    ///
    /// Uses `~/.cache/cachedget/` on Linux, or the platform equivalent.
    /// Returns `None` if no home directory can be determined.
    pub fn default_location() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "cachedget")?;
        Some(Self::new(project_dirs.cache_dir()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory backing a namespace
    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf, StoreError> {
        validate_name(namespace)?;
        Ok(self.root.join(namespace))
    }

    fn entry_path(&self, namespace: &str, key: &CacheKey) -> Result<PathBuf, StoreError> {
        validate_name(key.as_str())?;
        Ok(self.namespace_dir(namespace)?.join(key.as_str()))
    }

    /// Reads the body stored under `namespace/key`
    ///
    /// # Arguments
    /// * `namespace` - The partition to read from (e.g. "urls")
    /// * `key` - The entry's cache key
    ///
    /// # Returns
    /// * `Ok(String)` - The stored body
    /// * `Err(StoreError::NotFound)` - No entry exists for the key
    /// * `Err(StoreError::Io)` - The entry exists but could not be read
    pub async fn read(&self, namespace: &str, key: &CacheKey) -> Result<String, StoreError> {
        let path = self.entry_path(namespace, key)?;
        match fs::read_to_string(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                namespace: namespace.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores `body` under `namespace/key`, replacing any existing entry
    ///
    /// The body is written to a hidden temporary file in the namespace
    /// directory and renamed into place, so readers see either the old or the
    /// new body, never a partial one.
    ///
    /// # Arguments
    /// * `namespace` - The partition to write to; created if missing
    /// * `key` - The entry's cache key
    /// * `body` - The raw response body
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err(StoreError::Io)` if the directory or file cannot be written
    pub async fn create(
        &self,
        namespace: &str,
        key: &CacheKey,
        body: &str,
    ) -> Result<(), StoreError> {
        let path = self.entry_path(namespace, key)?;
        let dir = self.namespace_dir(namespace)?;
        fs::create_dir_all(&dir).await?;

        let temp = dir.join(format!(
            "{TEMP_PREFIX}{}-{}-{}",
            key,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = fs::write(&temp, body).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(namespace, key = %key, bytes = body.len(), "Stored cache entry");
        Ok(())
    }

    /// Lists the keys stored in a namespace
    ///
    /// A namespace that was never written to is empty, not an error.
    ///
    /// # Returns
    /// * `Ok(Vec<CacheKey>)` - Stored keys in sorted order
    /// * `Err(StoreError::Io)` if the namespace directory cannot be listed
    pub async fn list_all(&self, namespace: &str) -> Result<Vec<CacheKey>, StoreError> {
        let dir = self.namespace_dir(namespace)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => keys.push(CacheKey::from_hex(name)),
                Ok(_) => {}
                // Removed between listing and inspection
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Removes every entry in a namespace and returns how many were deleted
    ///
    /// A missing namespace, or an entry that disappears mid-sweep, is not an
    /// error. Other failures do not stop the sweep; the first one is returned
    /// once every entry has been attempted.
    ///
    /// # Returns
    /// * `Ok(usize)` - Number of entries removed
    /// * `Err(StoreError::Io)` - The first deletion or listing failure
    pub async fn delete_all(&self, namespace: &str) -> Result<usize, StoreError> {
        let dir = self.namespace_dir(namespace)?;
        let keys = self.list_all(namespace).await?;

        let mut deleted = 0;
        let mut first_error = None;
        for key in keys {
            match fs::remove_file(dir.join(key.as_str())).await {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(namespace, key = %key, error = %e, "Failed to delete cache entry");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => {
                debug!(namespace, deleted, "Cleared cache namespace");
                Ok(deleted)
            }
        }
    }
}

/// Accepts only names that map to exactly one file inside its parent
fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}
