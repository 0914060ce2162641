use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, instrument, warn};

use super::{check_revision, DbError, DbProvider, DbResult, Doc, DocumentDb, KeyRange, Revision};

pub const DOCS_FILENAME: &str = "docs.json";

/// Document database persisted as a single JSON file in its own directory.
///
/// The file is read lazily on first access and rewritten after every successful write,
/// via a temporary file and a rename so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct FileDb {
    name: String,
    dir: PathBuf,
    // `None` until loaded from disk
    state: Mutex<Option<BTreeMap<String, Doc>>>,
    destroyed: AtomicBool,
}

impl FileDb {
    /// Creates a handle for the database stored in `dir`. Does not touch the filesystem.
    pub fn new(name: impl Into<String>, dir: PathBuf) -> Self {
        FileDb {
            name: name.into(),
            dir,
            state: Mutex::new(None),
            destroyed: Default::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn docs_path(&self) -> PathBuf {
        self.dir.join(DOCS_FILENAME)
    }

    fn ensure_alive(&self) -> DbResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable(format!("database '{}' was destroyed", self.name)));
        }
        Ok(())
    }

    async fn load(&self) -> DbResult<BTreeMap<String, Doc>> {
        let path = self.docs_path();
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No documents file at {}, starting empty", path.display());
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(unavailable(&path, e)),
        };
        let docs: Vec<Doc> = serde_json::from_slice(&content).map_err(|e| {
            warn!("Failed to parse documents file '{}': {}", path.display(), e);
            unavailable(&path, e)
        })?;
        debug!("Loaded {} documents from {}", docs.len(), path.display());
        Ok(docs.into_iter().map(|doc| (doc.key.clone(), doc)).collect())
    }

    async fn persist(&self, docs: &BTreeMap<String, Doc>) -> DbResult<()> {
        let path = self.docs_path();
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(&docs.values().collect::<Vec<_>>())
            .map_err(|e| unavailable(&path, e))?;

        fs::create_dir_all(&self.dir).await.map_err(|e| unavailable(&self.dir, e))?;
        fs::write(&tmp_path, content).await.map_err(|e| unavailable(&tmp_path, e))?;
        fs::rename(&tmp_path, &path).await.map_err(|e| unavailable(&path, e))?;
        Ok(())
    }

    /// Locks the state, loading it from disk on first use.
    async fn loaded(&self) -> DbResult<MutexGuard<'_, Option<BTreeMap<String, Doc>>>> {
        self.ensure_alive()?;
        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(self.load().await?);
        }
        Ok(state)
    }

    /// Runs `f` against the loaded documents without copying them.
    async fn read_docs<T: Send>(
        &self,
        f: impl FnOnce(&BTreeMap<String, Doc>) -> DbResult<T> + Send,
    ) -> DbResult<T> {
        let mut state = self.loaded().await?;
        f(state.get_or_insert_with(BTreeMap::new))
    }

    /// Applies `f` to a copy of the documents, persists the copy and only then swaps it in.
    async fn write_docs<T: Send>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Doc>) -> DbResult<T> + Send,
    ) -> DbResult<T> {
        let mut state = self.loaded().await?;
        let docs = state.get_or_insert_with(BTreeMap::new);

        // A failed persist leaves the in-memory state untouched
        let mut working = docs.clone();
        let value = f(&mut working)?;
        self.persist(&working).await?;
        *docs = working;
        Ok(value)
    }
}

fn unavailable(path: &Path, e: impl std::fmt::Display) -> DbError {
    DbError::Unavailable(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl DocumentDb for FileDb {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> DbResult<Doc> {
        self.read_docs(|docs| docs.get(key).cloned().ok_or_else(|| DbError::NotFound(key.to_string())))
            .await
    }

    #[instrument(skip(self, doc), fields(db = %self.name, key = %doc.key))]
    async fn put(&self, mut doc: Doc) -> DbResult<Revision> {
        self.write_docs(move |docs| {
            let stored = docs.get(&doc.key).and_then(|d| d.rev.as_ref());
            check_revision(&doc.key, stored, doc.rev.as_ref())?;
            let rev = Revision::next(stored);
            doc.rev = Some(rev.clone());
            docs.insert(doc.key.clone(), doc);
            Ok(rev)
        })
        .await
    }

    #[instrument(skip(self, rev), fields(db = %self.name))]
    async fn remove(&self, key: &str, rev: &Revision) -> DbResult<()> {
        self.write_docs(|docs| {
            let stored = docs.get(key).and_then(|d| d.rev.as_ref());
            check_revision(key, stored, Some(rev))?;
            docs.remove(key);
            Ok(())
        })
        .await
    }

    async fn all_docs(&self, range: KeyRange) -> DbResult<Vec<Doc>> {
        self.read_docs(|docs| {
            Ok(docs
                .values()
                .filter(|doc| range.contains(&doc.key))
                .cloned()
                .collect())
        })
        .await
    }

    #[instrument(skip(self), fields(db = %self.name, dir = %self.dir.display()))]
    async fn destroy(&self) -> DbResult<()> {
        self.ensure_alive()?;
        let mut state = self.state.lock().await;
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(unavailable(&self.dir, e)),
        }
        *state = None;
        self.destroyed.store(true, Ordering::SeqCst);
        debug!("Database directory removed");
        Ok(())
    }
}

/// Opens [`FileDb`] handles in subdirectories of a root directory.
#[derive(Debug, Clone)]
pub struct FileDbProvider {
    root: PathBuf,
}

impl FileDbProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileDbProvider { root: root.into() }
    }
}

impl DbProvider for FileDbProvider {
    fn open(&self, name: &str) -> Arc<dyn DocumentDb> {
        Arc::new(FileDb::new(name, self.root.join(name)))
    }
}
