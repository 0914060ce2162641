use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::storage::db::{Doc, Revision};
use crate::storage::path::{folder_key, note_key, tag_key};
use crate::storage::{Error, Result};

/// A folder in the hierarchy of one storage unit. Identified by its path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub path: String,
    /// Display tag chosen by the user; not interpreted by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) rev: Option<Revision>,
}

impl Folder {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        let now = Utc::now();
        Folder {
            path: path.into(),
            color: None,
            created_at: now,
            updated_at: now,
            rev: None,
        }
    }

    /// Revision this copy was read or written at.
    pub fn revision(&self) -> Option<&Revision> {
        self.rev.as_ref()
    }

    pub(crate) fn apply(&mut self, patch: FolderPatch) {
        if let Some(color) = patch.color {
            self.color = color;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update of a [`Folder`]. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderPatch {
    /// `Some(None)` clears the color.
    pub color: Option<Option<String>>,
    /// When set, the update fails with a conflict unless the stored revision matches.
    pub expected_rev: Option<Revision>,
}

impl FolderPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color(mut self, color: Option<impl Into<String>>) -> Self {
        self.color = Some(color.map(Into::into));
        self
    }

    pub fn expect_revision(mut self, rev: Revision) -> Self {
        self.expected_rev = Some(rev);
        self
    }
}

/// A note. Its id is independent of the folder it lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Path of the owning folder.
    pub folder: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) rev: Option<Revision>,
}

impl Note {
    pub(crate) fn new(id: String, folder: String, new_note: NewNote) -> Self {
        let now = Utc::now();
        Note {
            id,
            title: new_note.title,
            content: new_note.content,
            tags: new_note.tags,
            folder,
            created_at: now,
            updated_at: now,
            rev: None,
        }
    }

    pub fn revision(&self) -> Option<&Revision> {
        self.rev.as_ref()
    }

    pub(crate) fn apply(&mut self, patch: NotePatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(folder) = patch.folder {
            self.folder = folder;
        }
        self.updated_at = Utc::now();
    }
}

/// Fields of a note to be created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub tags: BTreeSet<String>,
}

impl NewNote {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        NewNote {
            title: title.into(),
            content: content.into(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Partial update of a [`Note`]. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    /// Replaces the whole tag set.
    pub tags: Option<BTreeSet<String>>,
    /// Moves the note to another existing folder.
    pub folder: Option<String>,
    pub expected_rev: Option<Revision>,
}

impl NotePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn expect_revision(mut self, rev: Revision) -> Self {
        self.expected_rev = Some(rev);
        self
    }
}

/// Registration of a tag name within a storage unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) rev: Option<Revision>,
}

impl TagRecord {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        TagRecord {
            name: name.into(),
            created_at: now,
            updated_at: now,
            rev: None,
        }
    }
}

/// Conversion between typed records and raw database documents.
pub(crate) trait Record: Serialize + DeserializeOwned {
    fn key(&self) -> String;
    fn rev(&self) -> Option<&Revision>;
    fn set_rev(&mut self, rev: Option<Revision>);

    fn from_doc(doc: Doc) -> Result<Self> {
        let mut record: Self = serde_json::from_value(doc.body).map_err(|e| {
            Error::StorageUnavailable(format!("corrupted document '{}': {}", doc.key, e))
        })?;
        record.set_rev(doc.rev);
        Ok(record)
    }

    fn to_doc(&self) -> Result<Doc> {
        let body = serde_json::to_value(self).map_err(|e| {
            Error::StorageUnavailable(format!("cannot serialize '{}': {}", self.key(), e))
        })?;
        Ok(Doc::new(self.key(), self.rev().cloned(), body))
    }
}

impl Record for Folder {
    fn key(&self) -> String {
        folder_key(&self.path)
    }
    fn rev(&self) -> Option<&Revision> {
        self.rev.as_ref()
    }
    fn set_rev(&mut self, rev: Option<Revision>) {
        self.rev = rev;
    }
}

impl Record for Note {
    fn key(&self) -> String {
        note_key(&self.id)
    }
    fn rev(&self) -> Option<&Revision> {
        self.rev.as_ref()
    }
    fn set_rev(&mut self, rev: Option<Revision>) {
        self.rev = rev;
    }
}

impl Record for TagRecord {
    fn key(&self) -> String {
        tag_key(&self.name)
    }
    fn rev(&self) -> Option<&Revision> {
        self.rev.as_ref()
    }
    fn set_rev(&mut self, rev: Option<Revision>) {
        self.rev = rev;
    }
}
