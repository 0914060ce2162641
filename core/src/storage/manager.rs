use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::storage::db::DbProvider;
use crate::storage::{DocumentClient, Error, KeyValueSlot, Result};

/// Slot key under which the list of known storage units is persisted.
pub const DEFAULT_REGISTRY_KEY: &str = "notebox.units";

/// A registered storage unit, as persisted in the registry slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub id: String,
    pub name: String,
}

/// Registry of [`DocumentClient`]s keyed by storage-unit id.
///
/// The manager owns the cache of open database handles. Dropping it, or calling
/// [`close`](Self::close), releases every handle; nothing is shared between managers.
#[derive(Debug)]
pub struct ClientManager {
    provider: Arc<dyn DbProvider>,
    slot: Arc<dyn KeyValueSlot>,
    registry_key: String,
    units: Vec<UnitInfo>,
    clients: HashMap<String, Arc<DocumentClient>>,
}

/// Name of the database instance that backs the unit `id`.
pub(crate) fn db_name(id: &str) -> String {
    format!("unit-{id}")
}

impl ClientManager {
    pub fn new(provider: Arc<dyn DbProvider>, slot: Arc<dyn KeyValueSlot>) -> Self {
        ClientManager {
            provider,
            slot,
            registry_key: DEFAULT_REGISTRY_KEY.to_string(),
            units: Vec::new(),
            clients: HashMap::new(),
        }
    }

    pub fn with_registry_key(mut self, key: impl Into<String>) -> Self {
        self.registry_key = key.into();
        self
    }

    /// Reads the persisted registry and constructs a client for every listed unit.
    ///
    /// Database handles are opened lazily by the engine, so this does no database I/O.
    #[instrument(skip(self), fields(registry_key = %self.registry_key))]
    pub async fn init(&mut self) -> Result<()> {
        let units = self.read_registry().await?;
        self.clients.clear();
        for unit in &units {
            self.clients.insert(unit.id.clone(), Arc::new(self.open_client(unit)));
        }
        debug!("Registered {} storage units", units.len());
        self.units = units;
        Ok(())
    }

    async fn read_registry(&self) -> Result<Vec<UnitInfo>> {
        let Some(raw) = self.slot.get_item(&self.registry_key).await? else {
            return Ok(Vec::new());
        };
        let units: Vec<UnitInfo> = match serde_json::from_str(&raw) {
            Ok(units) => units,
            Err(e) => {
                warn!("Unit registry is corrupted, treating it as empty: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut seen = std::collections::HashSet::new();
        Ok(units
            .into_iter()
            .filter(|unit| {
                let fresh = seen.insert(unit.id.clone());
                if !fresh {
                    warn!(unit = %unit.id, "Ignoring duplicate registry entry");
                }
                fresh
            })
            .collect())
    }

    async fn write_registry(&self, units: &[UnitInfo]) -> Result<()> {
        let raw = serde_json::to_string(units)
            .map_err(|e| Error::StorageUnavailable(format!("cannot serialize unit registry: {e}")))?;
        self.slot.set_item(&self.registry_key, &raw).await
    }

    fn open_client(&self, unit: &UnitInfo) -> DocumentClient {
        let db = self.provider.open(&db_name(&unit.id));
        DocumentClient::new(unit.id.clone(), unit.name.clone(), db)
    }

    /// Registers a new storage unit with a fresh database.
    ///
    /// The returned client is not initialized; call [`DocumentClient::init`] before use.
    #[instrument(skip(self))]
    pub async fn add_client(&mut self, name: &str) -> Result<(UnitInfo, Arc<DocumentClient>)> {
        let unit = UnitInfo {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };

        let mut units = self.units.clone();
        units.push(unit.clone());
        self.write_registry(&units).await?;
        self.units = units;

        let client = Arc::new(self.open_client(&unit));
        self.clients.insert(unit.id.clone(), client.clone());
        debug!(unit = %unit.id, "Storage unit registered");
        Ok((unit, client))
    }

    pub fn get_client(&self, id: &str) -> Result<Arc<DocumentClient>> {
        self.clients
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ClientNotRegistered(id.to_string()))
    }

    /// Forgets a storage unit. Its data stays in place.
    ///
    /// The client is handed back so the caller can [`destroy_db`](DocumentClient::destroy_db)
    /// explicitly if the data should go too.
    #[instrument(skip(self))]
    pub async fn remove_client(&mut self, id: &str) -> Result<Arc<DocumentClient>> {
        let client = self.get_client(id)?;
        let units: Vec<UnitInfo> = self.units.iter().filter(|u| u.id != id).cloned().collect();
        self.write_registry(&units).await?;
        self.units = units;
        self.clients.remove(id);
        debug!("Storage unit unregistered");
        Ok(client)
    }

    /// Registered units in registration order.
    pub fn units(&self) -> &[UnitInfo] {
        &self.units
    }

    /// Releases every cached database handle. The registry itself is untouched.
    pub fn close(&mut self) {
        debug!("Closing {} database handles", self.clients.len());
        self.clients.clear();
        self.units.clear();
    }
}
