use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::storage::{Error, Result};

/// A flat, string-keyed durable store holding small string values.
///
/// Used only to persist the list of known storage units. Not queryable.
#[async_trait]
pub trait KeyValueSlot: fmt::Debug + Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySlot {
    items: RwLock<HashMap<String, String>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueSlot for MemorySlot {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Stores each key as a file named after the key inside one directory.
#[derive(Debug, Clone)]
pub struct FileSlot {
    dir: PathBuf,
}

impl FileSlot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSlot { dir: dir.into() }
    }

    /// Maps `key` to a file directly inside the slot directory. Keys that would name
    /// anything else are rejected.
    fn item_path(&self, key: &str) -> Result<PathBuf> {
        let plain = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\'])
            && !key.ends_with(".tmp");
        if !plain {
            return Err(Error::StorageUnavailable(format!("invalid slot key '{key}'")));
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl KeyValueSlot for FileSlot {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.item_path(key)?;
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::StorageUnavailable(format!("{}: {}", path.display(), e))),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.item_path(key)?;
        let tmp_path = self.dir.join(format!("{key}.tmp"));
        let unavailable =
            |p: &PathBuf, e: std::io::Error| Error::StorageUnavailable(format!("{}: {}", p.display(), e));
        fs::create_dir_all(&self.dir).await.map_err(|e| unavailable(&self.dir, e))?;
        // Replace the old value in one step so a crash never leaves it half-written
        fs::write(&tmp_path, value).await.map_err(|e| unavailable(&tmp_path, e))?;
        fs::rename(&tmp_path, &path).await.map_err(|e| unavailable(&path, e))?;
        debug!("Wrote slot '{}' to {}", key, path.display());
        Ok(())
    }
}
