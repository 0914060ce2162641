use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::storage::db::{DbError, DocumentDb, KeyRange};
use crate::storage::model::Record;
use crate::storage::path::{
    self, folder_key, is_folder_key, is_in_subtree, is_note_key, is_tag_key, note_key, tag_key,
    validate_folder_path, ROOT_PATH, TAG_KEY_PREFIX,
};
use crate::storage::{Error, Folder, FolderPatch, NewNote, Note, NotePatch, Result, TagRecord};

/// Everything stored in one unit, partitioned by document kind.
#[derive(Debug, Clone, Default)]
pub struct UnitSnapshot {
    pub folders: Vec<Folder>,
    pub notes: Vec<Note>,
    pub tags: Vec<TagRecord>,
}

/// What [`DocumentClient::init`] had to repair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub root_created: bool,
    /// Folders re-created because notes or subfolders still referenced them, parents first.
    pub folders_restored: Vec<String>,
}

/// Folder and note operations on the database of one storage unit.
///
/// The client exclusively owns its database handle. Every write presents the revision it
/// read; stale writes surface as [`Error::Conflict`].
#[derive(Debug)]
pub struct DocumentClient {
    id: String,
    name: String,
    db: Arc<dyn DocumentDb>,
}

fn map_db_err(e: DbError, not_found: impl FnOnce() -> Error) -> Error {
    match e {
        DbError::NotFound(_) => not_found(),
        DbError::Conflict(key) => Error::Conflict(key),
        DbError::Unavailable(msg) => Error::StorageUnavailable(msg),
    }
}

fn unavailable(e: DbError) -> Error {
    map_db_err(e, || Error::StorageUnavailable("document disappeared during a scan".to_string()))
}

impl DocumentClient {
    pub fn new(id: impl Into<String>, name: impl Into<String>, db: Arc<dyn DocumentDb>) -> Self {
        DocumentClient {
            id: id.into(),
            name: name.into(),
            db,
        }
    }

    /// Id of the storage unit this client serves.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prepares the unit for use.
    ///
    /// Creates the root folder if it is missing, then re-creates every folder that a note
    /// references or that is the ancestor of a stored folder, but that the database no
    /// longer holds (for example after a folder removal was interrupted). Notes and
    /// folders are never dropped as orphans.
    #[instrument(skip(self), fields(unit = %self.id))]
    pub async fn init(&self) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        match self.db.get(&folder_key(ROOT_PATH)).await {
            Ok(_) => debug!("Root folder present"),
            Err(DbError::NotFound(_)) => {
                debug!("Root folder missing, creating it");
                match self.insert_folder(Folder::new(ROOT_PATH)).await {
                    Ok(_) => report.root_created = true,
                    Err(Error::Conflict(_)) => debug!("Root folder was created concurrently"),
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(unavailable(e)),
        }

        let snapshot = self.get_all_data().await?;
        let existing: HashSet<&str> = snapshot.folders.iter().map(|f| f.path.as_str()).collect();

        // BTreeSet orders every parent before its children
        let mut missing = BTreeSet::new();
        for note in &snapshot.notes {
            if existing.contains(note.folder.as_str()) {
                continue;
            }
            if !validate_folder_path(&note.folder) {
                warn!(note = %note.id, folder = %note.folder, "Note references an invalid folder path, leaving it as is");
                continue;
            }
            for path in path::ancestors(&note.folder).into_iter().chain([note.folder.clone()]) {
                if !existing.contains(path.as_str()) {
                    missing.insert(path);
                }
            }
        }
        // Folders that outlived their parent
        for folder in &snapshot.folders {
            for path in path::ancestors(&folder.path) {
                if !existing.contains(path.as_str()) {
                    missing.insert(path);
                }
            }
        }

        for path in missing {
            match self.insert_folder(Folder::new(path.as_str())).await {
                Ok(_) => {
                    warn!(folder = %path, "Restored folder referenced by existing notes");
                    report.folders_restored.push(path);
                }
                Err(Error::Conflict(_)) => debug!(folder = %path, "Folder already restored"),
                Err(e) => return Err(e),
            }
        }

        debug!(?report, "Unit initialized");
        Ok(report)
    }

    /// Creates a folder below an existing parent.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPath`] for malformed paths, [`Error::ParentDoesNotExist`] if the parent
    /// is missing, and [`Error::Conflict`] if the folder already exists.
    pub async fn create_folder(&self, path: &str) -> Result<Folder> {
        self.create_folder_with(path, FolderPatch::new()).await
    }

    /// Like [`create_folder`](Self::create_folder), with initial field values taken from
    /// `initial`. Its expected revision is ignored.
    #[instrument(skip(self, initial), fields(unit = %self.id))]
    pub async fn create_folder_with(&self, path: &str, initial: FolderPatch) -> Result<Folder> {
        if !validate_folder_path(path) {
            return Err(Error::InvalidPath(path.to_string()));
        }
        if path != ROOT_PATH {
            let parent = path::parent_folder_path(path)?;
            self.db
                .get(&folder_key(&parent))
                .await
                .map_err(|e| map_db_err(e, || Error::ParentDoesNotExist(parent.clone())))?;
        }
        let mut folder = Folder::new(path);
        folder.apply(FolderPatch {
            expected_rev: None,
            ..initial
        });
        let folder = self.insert_folder(folder).await?;
        debug!("Folder created");
        Ok(folder)
    }

    async fn insert_folder(&self, mut folder: Folder) -> Result<Folder> {
        let rev = self
            .db
            .put(folder.to_doc()?)
            .await
            .map_err(|e| map_db_err(e, || Error::FolderDoesNotExist(folder.path.clone())))?;
        folder.rev = Some(rev);
        Ok(folder)
    }

    #[instrument(skip(self, patch), fields(unit = %self.id))]
    pub async fn update_folder(&self, path: &str, patch: FolderPatch) -> Result<Folder> {
        let mut folder = self.get_folder(path).await?;
        if let Some(expected) = &patch.expected_rev {
            if folder.rev.as_ref() != Some(expected) {
                debug!(%expected, "Stale folder revision");
                return Err(Error::Conflict(folder_key(path)));
            }
        }
        folder.apply(patch);
        let rev = self
            .db
            .put(folder.to_doc()?)
            .await
            .map_err(|e| map_db_err(e, || Error::FolderDoesNotExist(path.to_string())))?;
        folder.rev = Some(rev);
        Ok(folder)
    }

    pub async fn get_folder(&self, path: &str) -> Result<Folder> {
        let doc = self
            .db
            .get(&folder_key(path))
            .await
            .map_err(|e| map_db_err(e, || Error::FolderDoesNotExist(path.to_string())))?;
        Folder::from_doc(doc)
    }

    /// Removes a folder together with every descendant folder and every note inside them.
    ///
    /// The folder record goes first, then the notes, then the descendant folders. There is
    /// no rollback: if a step fails, the remaining notes keep their folder reference and
    /// the next [`init`](Self::init) restores the folders they need.
    #[instrument(skip(self), fields(unit = %self.id))]
    pub async fn remove_folder(&self, path: &str) -> Result<()> {
        if path == ROOT_PATH {
            return Err(Error::InvalidPath(format!("{path} (the root folder cannot be removed)")));
        }
        let folder = self.get_folder(path).await?;
        let snapshot = self.get_all_data().await?;

        self.remove_doc(&folder, || Error::FolderDoesNotExist(path.to_string()))
            .await?;

        let notes: Vec<&Note> = snapshot
            .notes
            .iter()
            .filter(|note| is_in_subtree(&note.folder, path))
            .collect();
        for note in &notes {
            self.cascade_remove(*note).await?;
        }

        let mut descendants: Vec<&Folder> = snapshot
            .folders
            .iter()
            .filter(|f| f.path != path && is_in_subtree(&f.path, path))
            .collect();
        // Children sort after their parents, so reversed order removes leaves first
        descendants.sort_by(|a, b| b.path.cmp(&a.path));
        for descendant in &descendants {
            self.cascade_remove(*descendant).await?;
        }

        debug!(notes = notes.len(), folders = descendants.len() + 1, "Folder subtree removed");
        Ok(())
    }

    async fn remove_doc<R: Record>(
        &self,
        record: &R,
        not_found: impl FnOnce() -> Error,
    ) -> Result<()> {
        let key = record.key();
        let Some(rev) = record.rev() else {
            return Err(Error::Conflict(key));
        };
        self.db.remove(&key, rev).await.map_err(|e| map_db_err(e, not_found))
    }

    /// Removal step of a cascade. A document that is already gone has reached the target state.
    async fn cascade_remove<R: Record>(&self, record: &R) -> Result<()> {
        let key = record.key();
        let Some(rev) = record.rev() else {
            return Err(Error::Conflict(key));
        };
        match self.db.remove(&key, rev).await {
            Ok(()) => Ok(()),
            Err(DbError::NotFound(_)) => {
                debug!(%key, "Already removed");
                Ok(())
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    /// Creates a note in an existing folder and registers its tags.
    #[instrument(skip(self, new_note), fields(unit = %self.id))]
    pub async fn create_note(&self, folder: &str, new_note: NewNote) -> Result<Note> {
        self.ensure_folder(folder).await?;
        let mut note = Note::new(Uuid::new_v4().to_string(), folder.to_string(), new_note);
        self.register_tags(&note.tags).await?;

        let rev = self
            .db
            .put(note.to_doc()?)
            .await
            .map_err(|e| map_db_err(e, || Error::NoteDoesNotExist(note.id.clone())))?;
        note.rev = Some(rev);
        debug!(note = %note.id, "Note created");
        Ok(note)
    }

    #[instrument(skip(self, patch), fields(unit = %self.id))]
    pub async fn update_note(&self, id: &str, patch: NotePatch) -> Result<Note> {
        let mut note = self.get_note(id).await?;
        if let Some(expected) = &patch.expected_rev {
            if note.rev.as_ref() != Some(expected) {
                debug!(%expected, "Stale note revision");
                return Err(Error::Conflict(note_key(id)));
            }
        }
        let retagged = patch.tags.is_some();
        note.apply(patch);

        self.ensure_folder(&note.folder).await?;
        if retagged {
            self.register_tags(&note.tags).await?;
        }

        let rev = self
            .db
            .put(note.to_doc()?)
            .await
            .map_err(|e| map_db_err(e, || Error::NoteDoesNotExist(id.to_string())))?;
        note.rev = Some(rev);
        Ok(note)
    }

    pub async fn get_note(&self, id: &str) -> Result<Note> {
        let doc = self
            .db
            .get(&note_key(id))
            .await
            .map_err(|e| map_db_err(e, || Error::NoteDoesNotExist(id.to_string())))?;
        Note::from_doc(doc)
    }

    /// Removes a note and returns its last stored version.
    #[instrument(skip(self), fields(unit = %self.id))]
    pub async fn remove_note(&self, id: &str) -> Result<Note> {
        let note = self.get_note(id).await?;
        self.remove_doc(&note, || Error::NoteDoesNotExist(id.to_string()))
            .await?;
        debug!("Note removed");
        Ok(note)
    }

    async fn ensure_folder(&self, path: &str) -> Result<()> {
        self.db
            .get(&folder_key(path))
            .await
            .map(|_| ())
            .map_err(|e| map_db_err(e, || Error::FolderDoesNotExist(path.to_string())))
    }

    async fn register_tags(&self, tags: &BTreeSet<String>) -> Result<()> {
        for tag in tags {
            self.register_tag(tag).await?;
        }
        Ok(())
    }

    /// Makes sure a tag record exists. A conflicting concurrent registration is merged by
    /// reading the record again, once.
    async fn register_tag(&self, name: &str) -> Result<TagRecord> {
        match self.merge_tag(name).await {
            Err(Error::Conflict(key)) => {
                warn!(%key, "Tag registration conflicted, re-reading");
                self.merge_tag(name).await
            }
            other => other,
        }
    }

    async fn merge_tag(&self, name: &str) -> Result<TagRecord> {
        let key = tag_key(name);
        match self.db.get(&key).await {
            Ok(doc) => TagRecord::from_doc(doc),
            Err(DbError::NotFound(_)) => {
                let mut record = TagRecord::new(name);
                let rev = self.db.put(record.to_doc()?).await.map_err(unavailable)?;
                record.rev = Some(rev);
                debug!(tag = name, "Tag registered");
                Ok(record)
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    /// Reads every document of the unit, partitioned by key prefix.
    #[instrument(skip(self), fields(unit = %self.id))]
    pub async fn get_all_data(&self) -> Result<UnitSnapshot> {
        let docs = self.db.all_docs(KeyRange::All).await.map_err(unavailable)?;
        let mut snapshot = UnitSnapshot::default();
        for doc in docs {
            if is_folder_key(&doc.key) {
                snapshot.folders.push(Folder::from_doc(doc)?);
            } else if is_note_key(&doc.key) {
                snapshot.notes.push(Note::from_doc(doc)?);
            } else if is_tag_key(&doc.key) {
                snapshot.tags.push(TagRecord::from_doc(doc)?);
            } else {
                debug!(key = %doc.key, "Skipping document with unknown key prefix");
            }
        }
        debug!(
            folders = snapshot.folders.len(),
            notes = snapshot.notes.len(),
            tags = snapshot.tags.len(),
            "Loaded unit snapshot"
        );
        Ok(snapshot)
    }

    pub async fn list_tags(&self) -> Result<Vec<TagRecord>> {
        let docs = self
            .db
            .all_docs(KeyRange::prefix(TAG_KEY_PREFIX))
            .await
            .map_err(unavailable)?;
        docs.into_iter().map(TagRecord::from_doc).collect()
    }

    /// Irreversibly deletes the database of this unit.
    ///
    /// Never called implicitly; forgetting a unit leaves its data in place.
    #[instrument(skip(self), fields(unit = %self.id))]
    pub async fn destroy_db(&self) -> Result<()> {
        self.db.destroy().await.map_err(unavailable)?;
        warn!(name = %self.name, "Storage unit database destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::storage::db::{DbResult, Doc, MemoryDb, Revision};
    use async_trait::async_trait;
    use serde_json::json;

    /// Rejects the next `conflicts` tag writes as if another writer got there first.
    /// With `plant` set, that other writer's record really lands in the database.
    #[derive(Debug)]
    struct RacingTagDb {
        inner: MemoryDb,
        conflicts: AtomicUsize,
        plant: bool,
    }

    impl RacingTagDb {
        fn new(conflicts: usize, plant: bool) -> Self {
            RacingTagDb {
                inner: MemoryDb::new("unit"),
                conflicts: AtomicUsize::new(conflicts),
                plant,
            }
        }
    }

    #[async_trait]
    impl DocumentDb for RacingTagDb {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn get(&self, key: &str) -> DbResult<Doc> {
            self.inner.get(key).await
        }

        async fn put(&self, doc: Doc) -> DbResult<Revision> {
            let racing = is_tag_key(&doc.key)
                && self
                    .conflicts
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if !racing {
                return self.inner.put(doc).await;
            }
            if self.plant {
                self.inner.put(doc.clone()).await?;
            }
            Err(DbError::Conflict(doc.key))
        }

        async fn remove(&self, key: &str, rev: &Revision) -> DbResult<()> {
            self.inner.remove(key, rev).await
        }

        async fn all_docs(&self, range: KeyRange) -> DbResult<Vec<Doc>> {
            self.inner.all_docs(range).await
        }

        async fn destroy(&self) -> DbResult<()> {
            self.inner.destroy().await
        }
    }

    async fn make_client() -> (DocumentClient, Arc<MemoryDb>) {
        let db = Arc::new(MemoryDb::new("unit"));
        let client = DocumentClient::new("unit", "Work", db.clone());
        client.init().await.unwrap();
        (client, db)
    }

    #[tokio::test]
    async fn test_init_creates_root_once() {
        let db = Arc::new(MemoryDb::new("unit"));
        let client = DocumentClient::new("unit", "Work", db);
        let first = client.init().await.unwrap();
        assert!(first.root_created);
        let second = client.init().await.unwrap();
        assert_eq!(second, RepairReport::default());
        assert_eq!(client.get_folder("/").await.unwrap().path, "/");
    }

    #[tokio::test]
    async fn test_create_folder_requires_parent() {
        let (client, _) = make_client().await;
        let result = client.create_folder("/a/b").await;
        assert!(matches!(result, Err(Error::ParentDoesNotExist(p)) if p == "/a"));

        client.create_folder("/a").await.unwrap();
        let folder = client.create_folder("/a/b").await.unwrap();
        assert_eq!(folder.path, "/a/b");
        assert!(folder.revision().is_some());
    }

    #[tokio::test]
    async fn test_create_folder_rejects_invalid_paths() {
        let (client, _) = make_client().await;
        for path in ["", "a", "/a/", "//", "/a|b"] {
            let result = client.create_folder(path).await;
            assert!(matches!(result, Err(Error::InvalidPath(_))), "{path:?} accepted");
        }
    }

    #[tokio::test]
    async fn test_create_folder_with_initial_fields() {
        let (client, _) = make_client().await;
        let folder = client
            .create_folder_with("/a", FolderPatch::new().color(Some("green")))
            .await
            .unwrap();
        assert_eq!(folder.color.as_deref(), Some("green"));
        assert_eq!(client.get_folder("/a").await.unwrap().color.as_deref(), Some("green"));
    }

    #[tokio::test]
    async fn test_create_existing_folder_conflicts() {
        let (client, _) = make_client().await;
        client.create_folder("/a").await.unwrap();
        assert!(matches!(client.create_folder("/a").await, Err(Error::Conflict(_))));
        assert!(matches!(client.create_folder("/").await, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_get_missing_folder() {
        let (client, _) = make_client().await;
        let result = client.get_folder("/nope").await;
        assert!(matches!(result, Err(Error::FolderDoesNotExist(p)) if p == "/nope"));
    }

    #[tokio::test]
    async fn test_update_folder_with_stale_revision_conflicts() {
        let (client, _) = make_client().await;
        let created = client.create_folder("/a").await.unwrap();
        let old_rev = created.revision().cloned().unwrap();

        let updated = client
            .update_folder("/a", FolderPatch::new().color(Some("red")).expect_revision(old_rev.clone()))
            .await
            .unwrap();
        let new_rev = updated.revision().cloned().unwrap();
        assert_ne!(old_rev, new_rev);
        assert_eq!(updated.color.as_deref(), Some("red"));

        let stale = client
            .update_folder("/a", FolderPatch::new().color(Some("blue")).expect_revision(old_rev))
            .await;
        assert!(matches!(stale, Err(Error::Conflict(_))));
        assert_eq!(client.get_folder("/a").await.unwrap().color.as_deref(), Some("red"));
    }

    #[tokio::test]
    async fn test_note_crud_and_revisions() {
        let (client, _) = make_client().await;
        client.create_folder("/a").await.unwrap();
        let note = client
            .create_note("/a", NewNote::new("t", "c").with_tags(["x", "y"]))
            .await
            .unwrap();
        let rev1 = note.revision().cloned().unwrap();

        let updated = client
            .update_note(&note.id, NotePatch::new().title("t2").expect_revision(rev1.clone()))
            .await
            .unwrap();
        assert_eq!(updated.title, "t2");
        assert_eq!(updated.tags, note.tags);
        assert_ne!(updated.revision(), Some(&rev1));

        let stale = client
            .update_note(&note.id, NotePatch::new().title("t3").expect_revision(rev1))
            .await;
        assert!(matches!(stale, Err(Error::Conflict(_))));

        let removed = client.remove_note(&note.id).await.unwrap();
        assert_eq!(removed.title, "t2");
        assert!(matches!(client.get_note(&note.id).await, Err(Error::NoteDoesNotExist(_))));
        assert!(matches!(client.remove_note(&note.id).await, Err(Error::NoteDoesNotExist(_))));
    }

    #[tokio::test]
    async fn test_note_requires_existing_folder() {
        let (client, _) = make_client().await;
        let result = client.create_note("/missing", NewNote::new("t", "c")).await;
        assert!(matches!(result, Err(Error::FolderDoesNotExist(p)) if p == "/missing"));

        let note = client.create_note("/", NewNote::new("t", "c")).await.unwrap();
        let moved = client.update_note(&note.id, NotePatch::new().folder("/missing")).await;
        assert!(matches!(moved, Err(Error::FolderDoesNotExist(_))));
        assert_eq!(client.get_note(&note.id).await.unwrap().folder, "/");
    }

    #[tokio::test]
    async fn test_tags_are_registered_once() {
        let (client, _) = make_client().await;
        client.create_note("/", NewNote::new("a", "").with_tags(["x", "y"])).await.unwrap();
        client.create_note("/", NewNote::new("b", "").with_tags(["y", "z"])).await.unwrap();

        let names: Vec<String> = client.list_tags().await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn test_remove_folder_cascades() {
        let (client, _) = make_client().await;
        client.create_folder("/a").await.unwrap();
        client.create_folder("/a/b").await.unwrap();
        client.create_folder("/ab").await.unwrap();
        let inner = client.create_note("/a/b", NewNote::new("inner", "")).await.unwrap();
        let sibling = client.create_note("/ab", NewNote::new("sibling", "")).await.unwrap();

        client.remove_folder("/a").await.unwrap();

        assert!(matches!(client.get_folder("/a").await, Err(Error::FolderDoesNotExist(_))));
        assert!(matches!(client.get_folder("/a/b").await, Err(Error::FolderDoesNotExist(_))));
        assert!(matches!(client.get_note(&inner.id).await, Err(Error::NoteDoesNotExist(_))));
        // Prefix match must respect segment boundaries
        assert!(client.get_folder("/ab").await.is_ok());
        assert!(client.get_note(&sibling.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_root_is_rejected() {
        let (client, _) = make_client().await;
        assert!(matches!(client.remove_folder("/").await, Err(Error::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_init_restores_folders_of_orphaned_notes() {
        let (client, db) = make_client().await;
        // Simulate an interrupted cascade: the note survived but its folders did not
        let note = json!({
            "id": "n1",
            "title": "survivor",
            "content": "",
            "tags": [],
            "folder": "/gone/deeper",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        });
        db.put(Doc::new(note_key("n1"), None, note)).await.unwrap();

        let report = client.init().await.unwrap();
        assert!(!report.root_created);
        assert_eq!(report.folders_restored, vec!["/gone", "/gone/deeper"]);
        assert!(client.get_folder("/gone/deeper").await.is_ok());
        assert_eq!(client.get_note("n1").await.unwrap().title, "survivor");

        let again = client.init().await.unwrap();
        assert!(again.folders_restored.is_empty());
    }

    #[tokio::test]
    async fn test_init_restores_parents_of_surviving_folders() {
        let (client, db) = make_client().await;
        client.create_folder("/a").await.unwrap();
        client.create_folder("/a/b").await.unwrap();
        client.create_folder("/a/b/c").await.unwrap();
        // A cascade that stopped right after removing the top folder
        let top = client.get_folder("/a").await.unwrap();
        db.remove(&folder_key("/a"), top.revision().unwrap()).await.unwrap();

        let report = client.init().await.unwrap();
        assert_eq!(report.folders_restored, vec!["/a"]);
        for path in ["/a", "/a/b", "/a/b/c"] {
            assert!(client.get_folder(path).await.is_ok(), "{path} missing");
        }

        let again = client.init().await.unwrap();
        assert_eq!(again, RepairReport::default());
    }

    #[tokio::test]
    async fn test_tag_conflict_is_resolved_by_reading_again() {
        let db = Arc::new(RacingTagDb::new(1, true));
        let client = DocumentClient::new("unit", "Work", db);
        client.init().await.unwrap();

        let note = client
            .create_note("/", NewNote::new("t", "").with_tags(["x"]))
            .await
            .unwrap();
        assert!(note.tags.contains("x"));

        let names: Vec<String> = client.list_tags().await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["x"]);
        assert!(client.get_note(&note.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_repeated_tag_conflict_surfaces() {
        let db = Arc::new(RacingTagDb::new(2, false));
        let client = DocumentClient::new("unit", "Work", db);
        client.init().await.unwrap();

        let result = client.create_note("/", NewNote::new("t", "").with_tags(["x"])).await;
        assert!(matches!(result, Err(Error::Conflict(key)) if key == tag_key("x")));
        assert!(client.list_tags().await.unwrap().is_empty());
        assert!(client.get_all_data().await.unwrap().notes.is_empty());
    }

    #[tokio::test]
    async fn test_get_all_data_partitions_by_prefix() {
        let (client, db) = make_client().await;
        client.create_folder("/a").await.unwrap();
        client.create_note("/a", NewNote::new("t", "").with_tags(["x"])).await.unwrap();
        db.put(Doc::new("meta:unrelated", None, json!({}))).await.unwrap();

        let snapshot = client.get_all_data().await.unwrap();
        assert_eq!(snapshot.folders.len(), 2);
        assert_eq!(snapshot.notes.len(), 1);
        assert_eq!(snapshot.tags.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_database_is_reported() {
        let (client, db) = make_client().await;
        db.set_simulate_unavailable(true);
        let result = client.create_folder("/a").await;
        match result {
            Err(e) => {
                assert!(e.is_blocking());
                assert!(!e.is_retryable());
            }
            Ok(_) => panic!("write should fail"),
        }
    }

    #[tokio::test]
    async fn test_destroy_db() {
        let (client, _) = make_client().await;
        client.destroy_db().await.unwrap();
        assert!(matches!(client.get_folder("/").await, Err(Error::StorageUnavailable(_))));
    }
}
