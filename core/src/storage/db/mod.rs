//! The embedded document database capability consumed by [`DocumentClient`](super::DocumentClient).
//!
//! A database stores JSON documents under string keys. Each stored document carries a
//! [`Revision`]; `put` and `remove` must present the revision they read, otherwise they
//! fail with [`DbError::Conflict`]. The client depends only on [`DocumentDb`], never on a
//! concrete engine.

pub use self::file::{FileDb, FileDbProvider};
pub use self::memory::{MemoryDb, MemoryDbProvider};

mod file;
mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque revision token: `{generation}-{random}`.
///
/// The generation grows by one on every write to the same key, so two revisions of the
/// same document are never equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Produces the revision that follows `previous` (or the first one).
    pub(crate) fn next(previous: Option<&Revision>) -> Self {
        let generation = previous.map_or(0, Revision::generation) + 1;
        Revision(format!("{}-{}", generation, Uuid::new_v4().simple()))
    }

    fn generation(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(generation, _)| generation.parse().ok())
            .unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document: key, revision and JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    pub key: String,
    /// `None` when inserting a document that must not exist yet.
    pub rev: Option<Revision>,
    pub body: serde_json::Value,
}

impl Doc {
    pub fn new(key: impl Into<String>, rev: Option<Revision>, body: serde_json::Value) -> Self {
        Doc { key: key.into(), rev, body }
    }
}

/// Selects which documents `all_docs` returns, in key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRange {
    All,
    Prefix(String),
}

impl KeyRange {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        KeyRange::Prefix(prefix.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        match self {
            KeyRange::All => true,
            KeyRange::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The presented revision does not match the stored one (or the key already exists).
    #[error("Document update conflict: {0}")]
    Conflict(String),

    #[error("Database unavailable: {0}")]
    Unavailable(String),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// An embedded, revision-tracked key-value document database.
#[async_trait]
pub trait DocumentDb: fmt::Debug + Send + Sync {
    /// Name of the database instance, unique per storage unit.
    fn name(&self) -> &str;

    /// Fetches the current version of a document, including its revision.
    async fn get(&self, key: &str) -> DbResult<Doc>;

    /// Inserts (`doc.rev == None`) or replaces (`doc.rev == current`) a document.
    ///
    /// Returns the new revision.
    async fn put(&self, doc: Doc) -> DbResult<Revision>;

    /// Removes a document if `rev` is its current revision.
    async fn remove(&self, key: &str, rev: &Revision) -> DbResult<()>;

    /// Returns every document whose key falls in `range`, ordered by key.
    async fn all_docs(&self, range: KeyRange) -> DbResult<Vec<Doc>>;

    /// Irreversibly deletes all persisted data. The handle is unusable afterwards.
    async fn destroy(&self) -> DbResult<()>;
}

/// Opens database handles by name.
///
/// Opening never touches storage; engines acquire their resources on first use.
pub trait DbProvider: fmt::Debug + Send + Sync {
    fn open(&self, name: &str) -> Arc<dyn DocumentDb>;
}

/// Checks a write against the stored revision, shared by the bundled engines.
pub(crate) fn check_revision(
    key: &str,
    stored: Option<&Revision>,
    presented: Option<&Revision>,
) -> DbResult<()> {
    match (stored, presented) {
        (None, None) => Ok(()),
        (Some(current), Some(rev)) if current == rev => Ok(()),
        (None, Some(_)) => Err(DbError::NotFound(key.to_string())),
        _ => Err(DbError::Conflict(key.to_string())),
    }
}
