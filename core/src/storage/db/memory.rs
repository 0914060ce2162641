use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{check_revision, DbError, DbProvider, DbResult, Doc, DocumentDb, KeyRange, Revision};

/// In-memory document database.
///
/// Used for tests and for stores opened without a data directory. Data lives as long as
/// the handle (or the [`MemoryDbProvider`] that handed it out).
#[derive(Debug, Default)]
pub struct MemoryDb {
    name: String,
    docs: RwLock<BTreeMap<String, Doc>>,
    destroyed: AtomicBool,
    simulate_unavailable: AtomicBool,
}

impl MemoryDb {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryDb {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Makes every subsequent write fail with [`DbError::Unavailable`].
    /// Reads keep working. Intended for testing error propagation.
    pub fn set_simulate_unavailable(&self, simulate: bool) {
        self.simulate_unavailable.store(simulate, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_readable(&self) -> DbResult<()> {
        if self.is_destroyed() {
            return Err(DbError::Unavailable(format!("database '{}' was destroyed", self.name)));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> DbResult<()> {
        self.ensure_readable()?;
        if self.simulate_unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable(format!("simulated write failure in '{}'", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentDb for MemoryDb {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> DbResult<Doc> {
        self.ensure_readable()?;
        let docs = self.docs.read().await;
        docs.get(key).cloned().ok_or_else(|| DbError::NotFound(key.to_string()))
    }

    async fn put(&self, mut doc: Doc) -> DbResult<Revision> {
        self.ensure_writable()?;
        let mut docs = self.docs.write().await;
        let stored = docs.get(&doc.key).and_then(|d| d.rev.as_ref());
        check_revision(&doc.key, stored, doc.rev.as_ref())?;

        let rev = Revision::next(stored);
        doc.rev = Some(rev.clone());
        docs.insert(doc.key.clone(), doc);
        Ok(rev)
    }

    async fn remove(&self, key: &str, rev: &Revision) -> DbResult<()> {
        self.ensure_writable()?;
        let mut docs = self.docs.write().await;
        let stored = docs.get(key).and_then(|d| d.rev.as_ref());
        check_revision(key, stored, Some(rev))?;
        docs.remove(key);
        Ok(())
    }

    async fn all_docs(&self, range: KeyRange) -> DbResult<Vec<Doc>> {
        self.ensure_readable()?;
        let docs = self.docs.read().await;
        Ok(docs
            .values()
            .filter(|doc| range.contains(&doc.key))
            .cloned()
            .collect())
    }

    async fn destroy(&self) -> DbResult<()> {
        self.ensure_readable()?;
        self.docs.write().await.clear();
        self.destroyed.store(true, Ordering::SeqCst);
        debug!(name = %self.name, "In-memory database destroyed");
        Ok(())
    }
}

/// Hands out [`MemoryDb`] handles, returning the same instance for the same name so data
/// survives a client being dropped and re-created.
#[derive(Debug, Default)]
pub struct MemoryDbProvider {
    open: Mutex<HashMap<String, Arc<MemoryDb>>>,
}

impl MemoryDbProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the concrete handle for `name`, if it was opened before.
    pub fn get(&self, name: &str) -> Option<Arc<MemoryDb>> {
        let open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        open.get(name).cloned()
    }
}

impl DbProvider for MemoryDbProvider {
    fn open(&self, name: &str) -> Arc<dyn DocumentDb> {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        let db = match open.get(name) {
            Some(db) if !db.is_destroyed() => db.clone(),
            _ => {
                let db = Arc::new(MemoryDb::new(name));
                open.insert(name.to_string(), db.clone());
                db
            }
        };
        db
    }
}
