use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::storage::path::{is_in_subtree, ROOT_PATH};
use crate::storage::{Folder, Note, UnitSnapshot};

/// In-memory mirror of one storage unit.
///
/// The tag index holds `id` under `tag` exactly when the note `id` carries `tag`. Tags with
/// no notes have no entry.
#[derive(Debug, Clone, Default)]
pub(crate) struct UnitCache {
    folders: BTreeMap<String, Folder>,
    notes: HashMap<String, Note>,
    tag_index: BTreeMap<String, BTreeSet<String>>,
}

/// What a subtree removal dropped from the mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RemovedSubtree {
    pub folders: Vec<String>,
    pub notes: Vec<String>,
}

impl UnitCache {
    pub fn from_snapshot(snapshot: UnitSnapshot) -> Self {
        let mut cache = UnitCache::default();
        for folder in snapshot.folders {
            cache.upsert_folder(folder);
        }
        for note in snapshot.notes {
            cache.upsert_note(note);
        }
        cache
    }

    pub fn folder(&self, path: &str) -> Option<&Folder> {
        self.folders.get(path)
    }

    /// User folders in path order. The root is implicit and not listed.
    pub fn folders(&self) -> Vec<&Folder> {
        self.folders
            .values()
            .filter(|f| f.path != ROOT_PATH)
            .collect()
    }

    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.get(id)
    }

    pub fn notes(&self) -> Vec<&Note> {
        sorted(self.notes.values())
    }

    pub fn notes_by_tag(&self, tag: &str) -> Vec<&Note> {
        let Some(ids) = self.tag_index.get(tag) else {
            return Vec::new();
        };
        sorted(ids.iter().filter_map(|id| self.notes.get(id)))
    }

    /// Notes directly inside `path`, not in its descendants.
    pub fn notes_by_folder(&self, path: &str) -> Vec<&Note> {
        sorted(self.notes.values().filter(|n| n.folder == path))
    }

    /// Tags carried by at least one note, in name order.
    pub fn tags(&self) -> Vec<&str> {
        self.tag_index.keys().map(String::as_str).collect()
    }

    pub fn upsert_folder(&mut self, folder: Folder) {
        self.folders.insert(folder.path.clone(), folder);
    }

    /// Drops `path`, every folder below it and every note inside any of them.
    pub fn remove_subtree(&mut self, path: &str) -> RemovedSubtree {
        let folders: Vec<String> = self
            .folders
            .keys()
            .filter(|p| is_in_subtree(p, path))
            .cloned()
            .collect();
        for folder in &folders {
            self.folders.remove(folder);
        }

        let mut notes: Vec<String> = self
            .notes
            .values()
            .filter(|n| is_in_subtree(&n.folder, path))
            .map(|n| n.id.clone())
            .collect();
        notes.sort();
        for id in &notes {
            self.remove_note(id);
        }

        RemovedSubtree { folders, notes }
    }

    /// Inserts or replaces a note, returning the previous version.
    pub fn upsert_note(&mut self, note: Note) -> Option<Note> {
        let id = note.id.clone();
        let previous = self.notes.insert(id.clone(), note);
        let empty = BTreeSet::new();
        let old_tags = previous.as_ref().map_or(&empty, |n| &n.tags);
        let new_tags = self.notes.get(&id).map_or(&empty, |n| &n.tags);

        let dropped: Vec<String> = old_tags.difference(new_tags).cloned().collect();
        let added: Vec<String> = new_tags.difference(old_tags).cloned().collect();
        for tag in dropped {
            self.unindex(&tag, &id);
        }
        for tag in added {
            self.tag_index.entry(tag).or_default().insert(id.clone());
        }
        previous
    }

    pub fn remove_note(&mut self, id: &str) -> Option<Note> {
        let note = self.notes.remove(id)?;
        for tag in &note.tags {
            self.unindex(tag, id);
        }
        Some(note)
    }

    fn unindex(&mut self, tag: &str, id: &str) {
        if let Some(ids) = self.tag_index.get_mut(tag) {
            ids.remove(id);
            if ids.is_empty() {
                self.tag_index.remove(tag);
            }
        }
    }

    #[cfg(test)]
    pub fn assert_tag_index_consistent(&self) {
        for note in self.notes.values() {
            for tag in &note.tags {
                assert!(
                    self.tag_index.get(tag).is_some_and(|ids| ids.contains(&note.id)),
                    "note {} missing from index entry {}",
                    note.id,
                    tag
                );
            }
        }
        for (tag, ids) in &self.tag_index {
            assert!(!ids.is_empty(), "empty index entry {tag}");
            for id in ids {
                let note = self.notes.get(id).unwrap_or_else(|| panic!("dangling id {id} under {tag}"));
                assert!(note.tags.contains(tag), "note {id} indexed under {tag} without carrying it");
            }
        }
    }
}

fn sorted<'a>(notes: impl Iterator<Item = &'a Note>) -> Vec<&'a Note> {
    let mut notes: Vec<&Note> = notes.collect();
    notes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    notes
}
