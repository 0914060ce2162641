//! The aggregated, in-memory view over every attached storage unit.
//!
//! [`DataStore`] is what UI collaborators talk to. Mutations are delegated to the unit's
//! [`DocumentClient`] and the mirror is updated only from what the database returned, so
//! the database stays the source of truth. Reads are synchronous lookups in the mirror.
//!
//! Mutating methods take `&mut self`: one store applies its writes in sequence, and a failed
//! write leaves the mirror exactly as it was.
//!
//! Updates present the revision held in the mirror. When another writer got there first the
//! call fails with [`Error::Conflict`]; [`DataStore::reload_unit`] refreshes the mirror
//! before retrying.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, instrument};

use crate::config::StoreConfig;
use crate::event::{Event, Listener, ListenerList};
use crate::storage::{
    ClientManager, DocumentClient, Error, Folder, FolderPatch, NewNote, Note, NotePatch, Result,
    UnitInfo, UnitSnapshot,
};

mod unit;

use self::unit::UnitCache;

/// A change applied to the mirror, emitted after the underlying write succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    UnitAttached { unit: String },
    UnitReloaded { unit: String },
    UnitDetached { unit: String },
    FolderUpserted { unit: String, path: String },
    /// A folder removal together with everything it cascaded to.
    FoldersRemoved {
        unit: String,
        folders: Vec<String>,
        notes: Vec<String>,
    },
    NoteUpserted { unit: String, id: String },
    NoteRemoved { unit: String, id: String },
}

impl Event for StoreChange {}

#[derive(Debug)]
pub struct DataStore {
    manager: ClientManager,
    units: HashMap<String, UnitCache>,
    listeners: ListenerList<StoreChange>,
}

async fn load_unit(client: Arc<DocumentClient>) -> Result<(String, UnitSnapshot)> {
    let report = client.init().await?;
    if report.root_created || !report.folders_restored.is_empty() {
        info!(unit = %client.id(), ?report, "Storage unit repaired during init");
    }
    let snapshot = client.get_all_data().await?;
    Ok((client.id().to_string(), snapshot))
}

impl DataStore {
    pub fn new(manager: ClientManager) -> Self {
        DataStore {
            manager,
            units: HashMap::new(),
            listeners: ListenerList::new(),
        }
    }

    /// Builds a store over the engine and registry slot described by `config`.
    ///
    /// Nothing is read until [`init`](Self::init).
    pub fn open(config: &StoreConfig) -> Self {
        let (provider, slot) = config.backends();
        let manager = ClientManager::new(provider, slot).with_registry_key(config.registry_key.clone());
        Self::new(manager)
    }

    /// Loads the registry, then initializes and mirrors every registered unit.
    #[instrument(skip(self))]
    pub async fn init(&mut self) -> Result<()> {
        self.manager.init().await?;
        let clients = self
            .manager
            .units()
            .iter()
            .map(|unit| self.manager.get_client(&unit.id))
            .collect::<Result<Vec<_>>>()?;

        let loaded = try_join_all(clients.into_iter().map(load_unit)).await?;
        self.units.clear();
        for (id, snapshot) in loaded {
            self.units.insert(id.clone(), UnitCache::from_snapshot(snapshot));
            self.emit(StoreChange::UnitAttached { unit: id });
        }
        debug!(units = self.units.len(), "Data store initialized");
        Ok(())
    }

    /// Registers `callback` for every [`StoreChange`]. Dropping the handle unsubscribes.
    pub fn subscribe<F>(&self, callback: F) -> Listener<StoreChange>
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    fn emit(&self, change: StoreChange) {
        self.listeners.dispatch(&change);
    }

    /// Registered units, attached or not.
    pub fn units(&self) -> &[UnitInfo] {
        self.manager.units()
    }

    pub fn is_attached(&self, unit: &str) -> bool {
        self.units.contains_key(unit)
    }

    fn mirror(&self, unit: &str) -> Result<&UnitCache> {
        self.units
            .get(unit)
            .ok_or_else(|| Error::ClientNotRegistered(unit.to_string()))
    }

    /// Client of an attached unit, together with its mirror.
    fn attached(&mut self, unit: &str) -> Result<(Arc<DocumentClient>, &mut UnitCache)> {
        let client = self.manager.get_client(unit)?;
        let cache = self
            .units
            .get_mut(unit)
            .ok_or_else(|| Error::ClientNotRegistered(unit.to_string()))?;
        Ok((client, cache))
    }

    // ---- Unit lifecycle ----

    /// Registers a new unit and attaches it.
    #[instrument(skip(self))]
    pub async fn create_unit(&mut self, name: &str) -> Result<UnitInfo> {
        let (info, _) = self.manager.add_client(name).await?;
        self.attach_unit(&info.id).await?;
        Ok(info)
    }

    /// Initializes a registered unit and mirrors its full content.
    #[instrument(skip(self))]
    pub async fn attach_unit(&mut self, unit: &str) -> Result<()> {
        let client = self.manager.get_client(unit)?;
        let (id, snapshot) = load_unit(client).await?;
        self.units.insert(id.clone(), UnitCache::from_snapshot(snapshot));
        self.emit(StoreChange::UnitAttached { unit: id });
        Ok(())
    }

    /// Drops the mirror of a unit. The unit stays registered.
    pub fn detach_unit(&mut self, unit: &str) -> Result<()> {
        if self.units.remove(unit).is_none() {
            return Err(Error::ClientNotRegistered(unit.to_string()));
        }
        debug!(unit, "Unit detached");
        self.emit(StoreChange::UnitDetached { unit: unit.to_string() });
        Ok(())
    }

    /// Replaces the mirror of an attached unit with a fresh read of its database.
    #[instrument(skip(self))]
    pub async fn reload_unit(&mut self, unit: &str) -> Result<()> {
        let (client, _) = self.attached(unit)?;
        let snapshot = client.get_all_data().await?;
        self.units.insert(unit.to_string(), UnitCache::from_snapshot(snapshot));
        self.emit(StoreChange::UnitReloaded { unit: unit.to_string() });
        Ok(())
    }

    /// Forgets a unit. Its data is left in place.
    #[instrument(skip(self))]
    pub async fn remove_unit(&mut self, unit: &str) -> Result<()> {
        self.manager.remove_client(unit).await?;
        if self.units.remove(unit).is_some() {
            self.emit(StoreChange::UnitDetached { unit: unit.to_string() });
        }
        Ok(())
    }

    /// Irreversibly deletes a unit's data, then forgets the unit.
    #[instrument(skip(self))]
    pub async fn destroy_unit(&mut self, unit: &str) -> Result<()> {
        let client = self.manager.get_client(unit)?;
        client.destroy_db().await?;
        self.remove_unit(unit).await
    }

    // ---- Folders ----

    #[instrument(skip(self, initial))]
    pub async fn create_folder(&mut self, unit: &str, path: &str, initial: FolderPatch) -> Result<Folder> {
        let (client, _) = self.attached(unit)?;
        let folder = client.create_folder_with(path, initial).await?;
        self.apply_folder(unit, folder.clone())?;
        Ok(folder)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_folder(&mut self, unit: &str, path: &str, patch: FolderPatch) -> Result<Folder> {
        let (client, cache) = self.attached(unit)?;
        let expected = cache
            .folder(path)
            .ok_or_else(|| Error::FolderDoesNotExist(path.to_string()))?
            .revision()
            .cloned();
        let patch = match (patch.expected_rev.is_some(), expected) {
            (false, Some(rev)) => patch.expect_revision(rev),
            _ => patch,
        };
        let folder = client.update_folder(path, patch).await?;
        self.apply_folder(unit, folder.clone())?;
        Ok(folder)
    }

    fn apply_folder(&mut self, unit: &str, folder: Folder) -> Result<()> {
        let (_, cache) = self.attached(unit)?;
        let path = folder.path.clone();
        cache.upsert_folder(folder);
        self.emit(StoreChange::FolderUpserted {
            unit: unit.to_string(),
            path,
        });
        Ok(())
    }

    /// Removes a folder and its whole subtree, in the database and in the mirror.
    #[instrument(skip(self))]
    pub async fn remove_folder(&mut self, unit: &str, path: &str) -> Result<()> {
        let (client, _) = self.attached(unit)?;
        client.remove_folder(path).await?;

        let (_, cache) = self.attached(unit)?;
        let removed = cache.remove_subtree(path);
        debug!(folders = removed.folders.len(), notes = removed.notes.len(), "Mirror pruned");
        self.emit(StoreChange::FoldersRemoved {
            unit: unit.to_string(),
            folders: removed.folders,
            notes: removed.notes,
        });
        Ok(())
    }

    // ---- Notes ----

    #[instrument(skip(self, new_note))]
    pub async fn create_note(&mut self, unit: &str, folder: &str, new_note: NewNote) -> Result<Note> {
        let (client, _) = self.attached(unit)?;
        let note = client.create_note(folder, new_note).await?;
        self.apply_note(unit, note.clone())?;
        Ok(note)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_note(&mut self, unit: &str, id: &str, patch: NotePatch) -> Result<Note> {
        let (client, cache) = self.attached(unit)?;
        let expected = cache
            .note(id)
            .ok_or_else(|| Error::NoteDoesNotExist(id.to_string()))?
            .revision()
            .cloned();
        let patch = match (patch.expected_rev.is_some(), expected) {
            (false, Some(rev)) => patch.expect_revision(rev),
            _ => patch,
        };
        let note = client.update_note(id, patch).await?;
        self.apply_note(unit, note.clone())?;
        Ok(note)
    }

    fn apply_note(&mut self, unit: &str, note: Note) -> Result<()> {
        let (_, cache) = self.attached(unit)?;
        let id = note.id.clone();
        cache.upsert_note(note);
        self.emit(StoreChange::NoteUpserted {
            unit: unit.to_string(),
            id,
        });
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_note(&mut self, unit: &str, id: &str) -> Result<Note> {
        let (client, _) = self.attached(unit)?;
        let note = client.remove_note(id).await?;

        let (_, cache) = self.attached(unit)?;
        cache.remove_note(id);
        self.emit(StoreChange::NoteRemoved {
            unit: unit.to_string(),
            id: id.to_string(),
        });
        Ok(note)
    }

    // ---- Reads ----

    /// User folders of a unit in path order. The root folder is implicit and not listed.
    pub fn list_folders(&self, unit: &str) -> Result<Vec<&Folder>> {
        Ok(self.mirror(unit)?.folders())
    }

    pub fn list_notes(&self, unit: &str) -> Result<Vec<&Note>> {
        Ok(self.mirror(unit)?.notes())
    }

    pub fn list_notes_by_tag(&self, unit: &str, tag: &str) -> Result<Vec<&Note>> {
        Ok(self.mirror(unit)?.notes_by_tag(tag))
    }

    /// Notes directly inside `path`. Notes in descendant folders are not included.
    pub fn list_notes_by_folder(&self, unit: &str, path: &str) -> Result<Vec<&Note>> {
        Ok(self.mirror(unit)?.notes_by_folder(path))
    }

    pub fn get_folder(&self, unit: &str, path: &str) -> Result<&Folder> {
        self.mirror(unit)?
            .folder(path)
            .ok_or_else(|| Error::FolderDoesNotExist(path.to_string()))
    }

    pub fn get_note(&self, unit: &str, id: &str) -> Result<&Note> {
        self.mirror(unit)?
            .note(id)
            .ok_or_else(|| Error::NoteDoesNotExist(id.to_string()))
    }

    /// Tags carried by at least one note of the unit.
    pub fn list_tags(&self, unit: &str) -> Result<Vec<&str>> {
        Ok(self.mirror(unit)?.tags())
    }

    /// Drops every mirror and releases the database handles.
    pub fn close(&mut self) {
        let units: Vec<String> = self.units.drain().map(|(id, _)| id).collect();
        for unit in units {
            self.emit(StoreChange::UnitDetached { unit });
        }
        self.manager.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::storage::{MemoryDbProvider, MemorySlot};

    async fn make_store() -> (DataStore, String, Arc<MemoryDbProvider>) {
        let provider = Arc::new(MemoryDbProvider::new());
        let manager = ClientManager::new(provider.clone(), Arc::new(MemorySlot::new()));
        let mut store = DataStore::new(manager);
        store.init().await.unwrap();
        let unit = store.create_unit("work").await.unwrap();
        (store, unit.id, provider)
    }

    fn ids(notes: Vec<&Note>) -> Vec<String> {
        notes.into_iter().map(|n| n.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_retagging_updates_tag_lookup() {
        let (mut store, unit, _) = make_store().await;
        store.create_folder(&unit, "/a", FolderPatch::new()).await.unwrap();
        let n1 = store
            .create_note(&unit, "/a", NewNote::new("t", "c").with_tags(["x", "y"]))
            .await
            .unwrap();
        assert_eq!(ids(store.list_notes_by_tag(&unit, "x").unwrap()), vec![n1.id.clone()]);

        store.update_note(&unit, &n1.id, NotePatch::new().tags(["y"])).await.unwrap();
        assert!(store.list_notes_by_tag(&unit, "x").unwrap().is_empty());
        assert_eq!(ids(store.list_notes_by_tag(&unit, "y").unwrap()), vec![n1.id]);
        assert_eq!(store.list_tags(&unit).unwrap(), vec!["y"]);
    }

    #[tokio::test]
    async fn test_remove_folder_prunes_mirror() {
        let (mut store, unit, _) = make_store().await;
        for path in ["/a", "/a/b", "/a/b/c"] {
            store.create_folder(&unit, path, FolderPatch::new()).await.unwrap();
        }
        for folder in ["/a", "/a/b", "/a/b/c"] {
            store.create_note(&unit, folder, NewNote::new("t", "")).await.unwrap();
        }

        store.remove_folder(&unit, "/a").await.unwrap();
        assert!(store.list_folders(&unit).unwrap().is_empty());
        assert!(store.list_notes(&unit).unwrap().is_empty());
        assert_eq!(store.get_folder(&unit, "/").unwrap().path, "/");
    }

    #[tokio::test]
    async fn test_unknown_unit() {
        let (mut store, _, _) = make_store().await;
        assert!(matches!(store.list_notes("nope"), Err(Error::ClientNotRegistered(_))));
        let result = store.create_folder("nope", "/a", FolderPatch::new()).await;
        assert!(matches!(result, Err(Error::ClientNotRegistered(_))));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_mirror_untouched() {
        let (mut store, unit, provider) = make_store().await;
        store.create_folder(&unit, "/a", FolderPatch::new()).await.unwrap();
        let note = store
            .create_note(&unit, "/a", NewNote::new("t", "").with_tags(["x"]))
            .await
            .unwrap();

        let db = provider.get(&format!("unit-{unit}")).unwrap();
        db.set_simulate_unavailable(true);

        let result = store.update_note(&unit, &note.id, NotePatch::new().tags(["z"])).await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
        let result = store.remove_folder(&unit, "/a").await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));

        assert_eq!(store.get_note(&unit, &note.id).unwrap(), &note);
        assert_eq!(store.list_folders(&unit).unwrap().len(), 1);
        assert_eq!(store.list_tags(&unit).unwrap(), vec!["x"]);
    }

    #[tokio::test]
    async fn test_tag_index_stays_consistent_through_mixed_mutations() {
        let (mut store, unit, _) = make_store().await;
        let tag_sets: [&[&str]; 5] = [&[], &["x"], &["x", "y"], &["y", "z"], &["z"]];
        let folders = ["/", "/a", "/a/b", "/c"];
        let mut live: Vec<String> = Vec::new();

        for step in 0..60usize {
            for path in &folders[1..] {
                if store.get_folder(&unit, path).is_err() {
                    store.create_folder(&unit, path, FolderPatch::new()).await.unwrap();
                }
            }
            let tags = tag_sets[step % tag_sets.len()].iter().copied();
            let target = live.get(step % live.len().max(1)).cloned();

            match (step % 6, target) {
                (0 | 1, _) | (_, None) => {
                    let folder = folders[step % folders.len()];
                    let note = store
                        .create_note(&unit, folder, NewNote::new(format!("n{step}"), "").with_tags(tags))
                        .await
                        .unwrap();
                    live.push(note.id);
                }
                (2, Some(id)) => {
                    store.update_note(&unit, &id, NotePatch::new().tags(tags)).await.unwrap();
                }
                (3, Some(id)) => {
                    let folder = folders[(step / 3) % folders.len()];
                    let patch = NotePatch::new().folder(folder).tags(tags);
                    store.update_note(&unit, &id, patch).await.unwrap();
                }
                (4, Some(id)) => {
                    store.remove_note(&unit, &id).await.unwrap();
                    live.retain(|n| *n != id);
                }
                (_, Some(id)) => {
                    if step % 12 == 5 {
                        store.remove_folder(&unit, "/a").await.unwrap();
                        live.retain(|n| store.get_note(&unit, n).is_ok());
                    } else {
                        // Moving to a missing folder fails and must not touch the index
                        let patch = NotePatch::new().folder("/gone").tags(tags);
                        let moved = store.update_note(&unit, &id, patch).await;
                        assert!(matches!(moved, Err(Error::FolderDoesNotExist(_))));
                    }
                }
            }

            store.units[&unit].assert_tag_index_consistent();
            let mut carried: Vec<&str> = store
                .list_notes(&unit)
                .unwrap()
                .into_iter()
                .flat_map(|n| n.tags.iter().map(String::as_str))
                .collect();
            carried.sort_unstable();
            carried.dedup();
            assert_eq!(store.list_tags(&unit).unwrap(), carried, "step {step}");
        }
    }

    #[tokio::test]
    async fn test_stale_mirror_conflicts_until_reloaded() {
        let (mut store, unit, _) = make_store().await;
        let note = store.create_note(&unit, "/", NewNote::new("t", "")).await.unwrap();

        // A second writer on the same database
        let client = store.manager.get_client(&unit).unwrap();
        client.update_note(&note.id, NotePatch::new().title("theirs")).await.unwrap();

        let result = store.update_note(&unit, &note.id, NotePatch::new().title("mine")).await;
        assert!(matches!(result, Err(ref e) if e.is_retryable()));
        assert_eq!(store.get_note(&unit, &note.id).unwrap().title, "t");

        store.reload_unit(&unit).await.unwrap();
        assert_eq!(store.get_note(&unit, &note.id).unwrap().title, "theirs");
        let updated = store.update_note(&unit, &note.id, NotePatch::new().title("mine")).await.unwrap();
        assert_eq!(updated.title, "mine");
    }

    #[tokio::test]
    async fn test_listeners_see_changes() {
        let (mut store, unit, _) = make_store().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = store.subscribe(move |change| sink.lock().unwrap().push(change.clone()));

        store.create_folder(&unit, "/a", FolderPatch::new()).await.unwrap();
        let note = store.create_note(&unit, "/a", NewNote::new("t", "")).await.unwrap();
        store.remove_folder(&unit, "/a").await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                StoreChange::FolderUpserted { unit: unit.clone(), path: "/a".into() },
                StoreChange::NoteUpserted { unit: unit.clone(), id: note.id.clone() },
                StoreChange::FoldersRemoved {
                    unit: unit.clone(),
                    folders: vec!["/a".into()],
                    notes: vec![note.id],
                },
            ]
        );

        drop(listener);
        store.detach_unit(&unit).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_detach_and_remove_unit() {
        let (mut store, unit, provider) = make_store().await;
        store.detach_unit(&unit).unwrap();
        assert!(!store.is_attached(&unit));
        assert!(matches!(store.list_folders(&unit), Err(Error::ClientNotRegistered(_))));

        store.attach_unit(&unit).await.unwrap();
        store.remove_unit(&unit).await.unwrap();
        assert!(store.units().is_empty());
        assert!(!provider.get(&format!("unit-{unit}")).unwrap().is_destroyed());
    }

    #[tokio::test]
    async fn test_destroy_unit_wipes_data() {
        let (mut store, unit, provider) = make_store().await;
        store.destroy_unit(&unit).await.unwrap();
        assert!(store.units().is_empty());
        assert!(provider.get(&format!("unit-{unit}")).unwrap().is_destroyed());
    }
}
