use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ContentId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// One named link inside a directory listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub cid: ContentId,
    pub kind: EntryKind,
}

impl DirectoryEntry {
    pub fn file(name: impl Into<String>, cid: ContentId) -> Self {
        Self {
            name: name.into(),
            cid,
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>, cid: ContentId) -> Self {
        Self {
            name: name.into(),
            cid,
            kind: EntryKind::Directory,
        }
    }

    /// Checks that the name is a single normal path component,
    /// so joining it onto a destination can never escape that destination.
    pub fn validate_name(&self) -> Result<(), InvalidEntryName> {
        let name = self.name.as_str();

        if name.is_empty() || name.contains(['/', '\\', '\0']) {
            return Err(InvalidEntryName(self.name.clone()));
        }

        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(()),
            _ => Err(InvalidEntryName(self.name.clone())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid directory entry name: {0:?}")]
pub struct InvalidEntryName(pub String);

/// Ordered listing of a directory object.
///
/// The canonical encoding is the JSON array of entries, and the directory's
/// [`ContentId`] is the hash of that encoding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryListing {
    entries: Vec<DirectoryEntry>,
}

impl DirectoryListing {
    /// Builds a listing with entries sorted by name.
    pub fn new(mut entries: Vec<DirectoryEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { entries }
    }

    /// Decodes a listing as received, keeping the order it was published in.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serializing plain structs and strings into a Vec cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn content_id(&self) -> ContentId {
        ContentId::of(&self.encode())
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for DirectoryListing {
    type Item = DirectoryEntry;
    type IntoIter = std::vec::IntoIter<DirectoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
