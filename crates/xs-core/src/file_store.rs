use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use serde_json::Value;
use tokio::fs;
use tokio::sync::RwLock;

use crate::errors::{CoreError, Result};
use crate::store::{KeyValueStore, is_same_or_nested};

/// File-backed key-value store
///
/// Keeps every entry in a single JSON document and rewrites it atomically on each
/// mutation.
///
/// # Directory Structure
/// ```text
/// ~/.config/xstream/
/// ├── store.json     # All persisted entries
/// └── store.lock     # Advisory lock file
/// ```
#[derive(Debug)]
pub struct FileKeyValueStore {
    data_file: PathBuf,
    lock_file: PathBuf,
    entries: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl FileKeyValueStore {
    /// Open (or create) the store in `storage_dir`
    ///
    /// A missing or unreadable document starts an empty store instead of failing.
    pub async fn new(storage_dir: impl AsRef<Path>) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        fs::create_dir_all(&storage_dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&storage_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        let data_file = storage_dir.join("store.json");
        let entries = match fs::read_to_string(&data_file).await {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, Value>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(
                        "Ignoring malformed store document {}: {}",
                        data_file.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            data_file,
            lock_file: storage_dir.join("store.lock"),
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    /// Get default storage directory for the current platform
    pub fn default_storage_dir() -> Result<PathBuf> {
        let project_dirs =
            directories::ProjectDirs::from("", "", "xstream").ok_or(CoreError::NoConfigDir)?;

        Ok(project_dirs.config_dir().to_path_buf())
    }

    /// Acquire an exclusive lock on the storage
    fn acquire_lock(&self) -> Result<std::fs::File> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| CoreError::LockTimeout)?;

        Ok(lock_file)
    }

    /// Write the whole document: temp file, fsync, rename
    async fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        let _lock = self.acquire_lock()?;

        let json = serde_json::to_string_pretty(entries)?;
        let temp_path = self.data_file.with_extension("tmp");
        fs::write(&temp_path, json).await?;

        let file = std::fs::File::open(&temp_path)?;
        file.sync_all()?;

        fs::rename(&temp_path, &self.data_file).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.data_file, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.write().await;
        let mut updated = entries.clone();
        updated.insert(key.to_string(), value);

        self.persist(&updated).await?;
        *entries = updated;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let mut updated = entries.clone();
        updated.retain(|candidate, _| !is_same_or_nested(key, candidate));

        if updated.len() == entries.len() {
            return Ok(());
        }
        self.persist(&updated).await?;
        *entries = updated;
        Ok(())
    }
}
