//! Provides the revision-tracked document storage that backs folders and notes.
//!
//! This module turns an embedded key-value document database into a
//! filesystem-like hierarchy of folders and notes, multiplexed across
//! independently named storage units.
//!
//! # Core Concepts
//!
//! *   **[`DocumentDb`]:** The capability every embedded engine implements: `get`, `put`,
//!     `remove` and `all_docs`, each carrying a [`Revision`] token. A write that presents a
//!     stale revision fails with [`DbError::Conflict`] instead of overwriting. Two engines
//!     ship with the crate: [`MemoryDb`] and the JSON-file backed [`FileDb`].
//! *   **[`DocumentClient`]:** Owns exactly one database handle for one storage unit and
//!     enforces the folder hierarchy: valid paths, parent-before-child and cascading
//!     deletion. On [`DocumentClient::init`] it materializes the root folder and repairs
//!     folders that notes still reference after an interrupted cascade.
//! *   **[`ClientManager`]:** A registry of clients keyed by storage-unit id. The list of
//!     known units is persisted as JSON in one [`KeyValueSlot`].
//!
//! # Key Namespacing
//!
//! Every document key starts with a prefix naming its kind (see [`path`]):
//!
//! *   `folder:/a/b` for folders,
//! *   `note:{uuid}` for notes,
//! *   `tag:{name}` for tag registration records.
//!
//! The prefixes are mutually exclusive, so the kind of a key is recoverable from the key
//! alone. Nothing in this crate infers kind from document shape.
//!
//! # Optimistic Concurrency
//!
//! There are no locks across operations. Every read returns a revision; every write must
//! present the revision it read. Callers doing read-modify-write treat
//! [`Error::Conflict`] as retryable (see [`Error::is_retryable`]): re-read and reapply.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use notebox_core::storage::{DocumentClient, MemoryDb, NewNote};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DocumentClient::new("unit-1", "work", Arc::new(MemoryDb::new("unit-1")));
//!     client.init().await?;
//!
//!     client.create_folder("/projects").await?;
//!     let note = client
//!         .create_note("/projects", NewNote::new("Plan", "Ship it").with_tags(["todo"]))
//!         .await?;
//!     println!("Created note {} in {}", note.id, note.folder);
//!     Ok(())
//! }
//! ```

pub use self::client::{DocumentClient, RepairReport, UnitSnapshot};
pub use self::db::{
    DbError, DbProvider, DbResult, Doc, DocumentDb, FileDb, FileDbProvider, KeyRange, MemoryDb,
    MemoryDbProvider, Revision,
};
pub use self::manager::{ClientManager, UnitInfo, DEFAULT_REGISTRY_KEY};
pub use self::model::{Folder, FolderPatch, NewNote, Note, NotePatch, TagRecord};
pub use self::slot::{FileSlot, KeyValueSlot, MemorySlot};

pub mod path;

mod client;
mod db;
mod manager;
mod model;
mod slot;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid folder path: {0}")]
    InvalidPath(String),

    #[error("The root folder has no parent")]
    RootHasNoParent,

    #[error("Parent folder does not exist: {0}")]
    ParentDoesNotExist(String),

    #[error("Folder does not exist: {0}")]
    FolderDoesNotExist(String),

    #[error("Note does not exist: {0}")]
    NoteDoesNotExist(String),

    /// The document was written by someone else since it was last read.
    #[error("Revision conflict on document '{0}'")]
    Conflict(String),

    #[error("Storage unit is not registered: {0}")]
    ClientNotRegistered(String),

    /// The underlying database is unreachable or its contents are corrupted.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl Error {
    /// Returns `true` for failures a caller should resolve by re-reading and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Returns `true` for failures that need user action before the store is usable again.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_))
    }
}

// Define a standard Result type for the library
pub type Result<T> = std::result::Result<T, Error>;
