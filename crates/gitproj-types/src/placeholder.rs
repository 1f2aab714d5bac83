//! Placeholder records: which paths the OS has materialized.

use serde::{Deserialize, Serialize};

use crate::ObjectId;

/// What kind of on-disk stand-in exists at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaceholderKind {
    /// A file placeholder (possibly hydrated).
    File,
    /// A folder placeholder whose children have not all been written.
    PartialFolder,
    /// A folder whose children were all written as placeholders.
    ExpandedFolder,
    /// A projected folder that was deleted from disk; Git bookkeeping
    /// must decide whether the deletion is real.
    PossibleTombstone,
}

impl PlaceholderKind {
    /// Integer form used by the SQLite schema.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::File => 0,
            Self::PartialFolder => 1,
            Self::ExpandedFolder => 2,
            Self::PossibleTombstone => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::File),
            1 => Some(Self::PartialFolder),
            2 => Some(Self::ExpandedFolder),
            3 => Some(Self::PossibleTombstone),
            _ => None,
        }
    }

    pub fn is_folder(self) -> bool {
        !matches!(self, Self::File)
    }
}

/// One row of the placeholder store. A path has at most one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderEntry {
    pub path: String,
    pub kind: PlaceholderKind,
    /// Content version the placeholder was written with (files only).
    pub content_id: Option<ObjectId>,
}

impl PlaceholderEntry {
    pub fn file(path: impl Into<String>, content_id: ObjectId) -> Self {
        Self {
            path: path.into(),
            kind: PlaceholderKind::File,
            content_id: Some(content_id),
        }
    }

    pub fn folder(path: impl Into<String>, kind: PlaceholderKind) -> Self {
        Self {
            path: path.into(),
            kind,
            content_id: None,
        }
    }
}
