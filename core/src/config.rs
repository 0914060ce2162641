use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::storage::{
    DbProvider, Error, FileDbProvider, FileSlot, KeyValueSlot, MemoryDbProvider, MemorySlot, Result,
    DEFAULT_REGISTRY_KEY,
};

/// Name of the optional configuration file inside a data directory.
pub const CONFIG_FILENAME: &str = "config.json";

/// Subdirectory of the data directory holding one database directory per unit.
pub const UNITS_DIRNAME: &str = "units";

/// Subdirectory of the data directory holding the registry slot.
pub const SLOT_DIRNAME: &str = "registry";

/// Where and how a [`DataStore`](crate::cache::DataStore) keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the on-disk layout. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Slot key holding the unit registry.
    pub registry_key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_dir: None,
            registry_key: DEFAULT_REGISTRY_KEY.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn on_disk(data_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    /// Loads `config.json` from `data_dir` if it exists, falling back to the defaults.
    ///
    /// The resulting config always points at `data_dir`, whatever the file says.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILENAME);
        let mut config = match fs::read(&path).await {
            Ok(content) => serde_json::from_slice::<StoreConfig>(&content).map_err(|e| {
                Error::StorageUnavailable(format!("invalid config {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}, using defaults", path.display());
                StoreConfig::default()
            }
            Err(e) => return Err(Error::StorageUnavailable(format!("{}: {}", path.display(), e))),
        };
        config.data_dir = Some(data_dir.to_path_buf());
        Ok(config)
    }

    /// Builds the database provider and registry slot this config describes.
    pub(crate) fn backends(&self) -> (Arc<dyn DbProvider>, Arc<dyn KeyValueSlot>) {
        match &self.data_dir {
            Some(dir) => (
                Arc::new(FileDbProvider::new(dir.join(UNITS_DIRNAME))),
                Arc::new(FileSlot::new(dir.join(SLOT_DIRNAME))),
            ),
            None => (Arc::new(MemoryDbProvider::new()), Arc::new(MemorySlot::new())),
        }
    }
}
