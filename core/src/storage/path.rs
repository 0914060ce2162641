//! Maps folder paths, note ids and tag names to namespaced document keys.
//!
//! Folder paths are absolute, `/`-separated and normalized: the root is `/`, every other
//! path is `/segment(/segment)*` with no empty segments and no reserved characters.

use crate::storage::{Error, Result};

pub const ROOT_PATH: &str = "/";

pub const FOLDER_KEY_PREFIX: &str = "folder:";
pub const NOTE_KEY_PREFIX: &str = "note:";
pub const TAG_KEY_PREFIX: &str = "tag:";

/// Replaces reserved characters during normalization.
pub const PLACEHOLDER: char = '_';

const RESERVED_CHARS: [char; 8] = ['<', '>', ':', '"', '\\', '|', '?', '*'];

fn is_reserved(c: char) -> bool {
    RESERVED_CHARS.contains(&c) || ('\u{0}'..='\u{1f}').contains(&c)
}

/// Returns `true` if `path` is a valid, already-normalized folder path.
///
/// The root `/` is valid. Anything empty, relative, containing an empty segment
/// (including a trailing slash) or a reserved character is not.
pub fn validate_folder_path(path: &str) -> bool {
    if path == ROOT_PATH {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/')
        .all(|segment| !segment.is_empty() && !segment.chars().any(is_reserved))
}

/// Normalizes arbitrary input into a valid folder path.
///
/// Empty segments are dropped and reserved characters in the remaining segments are
/// replaced with [`PLACEHOLDER`]. The result always passes [`validate_folder_path`].
pub fn normalize_folder_path(raw: &str) -> String {
    let segments: Vec<String> = raw
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(sanitize_segment)
        .collect();
    format!("/{}", segments.join("/"))
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if is_reserved(c) { PLACEHOLDER } else { c })
        .collect()
}

/// Returns the parent of `path`. The parent of a top-level folder is the root.
pub fn parent_folder_path(path: &str) -> Result<String> {
    if path == ROOT_PATH {
        return Err(Error::RootHasNoParent);
    }
    match path.rfind('/') {
        Some(0) => Ok(ROOT_PATH.to_string()),
        Some(idx) => Ok(path[..idx].to_string()),
        None => Err(Error::InvalidPath(path.to_string())),
    }
}

/// Returns `true` if `path` is `ancestor` itself or lies anywhere below it.
pub fn is_in_subtree(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT_PATH {
        return path.starts_with('/');
    }
    path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Lists the ancestors of `path` from the root down, excluding `path` itself.
pub(crate) fn ancestors(path: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = path.to_string();
    while let Ok(parent) = parent_folder_path(&current) {
        chain.push(parent.clone());
        current = parent;
    }
    chain.reverse();
    chain
}

pub fn folder_key(path: &str) -> String {
    format!("{FOLDER_KEY_PREFIX}{path}")
}

pub fn note_key(id: &str) -> String {
    format!("{NOTE_KEY_PREFIX}{id}")
}

pub fn tag_key(name: &str) -> String {
    format!("{TAG_KEY_PREFIX}{name}")
}

pub fn is_folder_key(key: &str) -> bool {
    key.starts_with(FOLDER_KEY_PREFIX)
}

pub fn is_note_key(key: &str) -> bool {
    key.starts_with(NOTE_KEY_PREFIX)
}

pub fn is_tag_key(key: &str) -> bool {
    key.starts_with(TAG_KEY_PREFIX)
}

pub fn path_from_folder_key(key: &str) -> Option<&str> {
    key.strip_prefix(FOLDER_KEY_PREFIX)
}

pub fn id_from_note_key(key: &str) -> Option<&str> {
    key.strip_prefix(NOTE_KEY_PREFIX)
}

pub fn name_from_tag_key(key: &str) -> Option<&str> {
    key.strip_prefix(TAG_KEY_PREFIX)
}
