//! Directory enumeration sessions.
//!
//! The OS may read one directory listing across several calls. A session
//! freezes the child list at start so every call sees the same view, and
//! remembers where the previous call stopped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gitproj_types::{CallbackResult, ObjectId};

use super::provider::EnumerationId;
use crate::index::FileMode;
use crate::projection::ProjectedItem;
use crate::projection::names::wildcard_match;

/// Fixed per-entry cost in a [`DirectoryEntryBuffer`], on top of the name.
pub const ENTRY_OVERHEAD: usize = 64;

/// One listing row handed to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub content_id: Option<ObjectId>,
    pub mode: Option<FileMode>,
}

impl From<&ProjectedItem> for DirectoryEntry {
    fn from(item: &ProjectedItem) -> Self {
        match item {
            ProjectedItem::File(file) => Self {
                name: file.name.clone(),
                is_directory: false,
                size: file.size,
                content_id: Some(file.id),
                mode: Some(file.mode),
            },
            ProjectedItem::Folder { name } => Self {
                name: name.clone(),
                is_directory: true,
                size: 0,
                content_id: None,
                mode: None,
            },
        }
    }
}

/// Caller-owned, byte-bounded output buffer.
#[derive(Debug, Clone)]
pub struct DirectoryEntryBuffer {
    capacity: usize,
    used: usize,
    entries: Vec<DirectoryEntry>,
}

impl DirectoryEntryBuffer {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            capacity: bytes,
            used: 0,
            entries: Vec::new(),
        }
    }

    /// Append `entry` if it fits. Returns false and leaves the buffer
    /// untouched otherwise.
    pub fn try_add(&mut self, entry: DirectoryEntry) -> bool {
        let cost = ENTRY_OVERHEAD + entry.name.len();
        if self.used + cost > self.capacity {
            return false;
        }
        self.used += cost;
        self.entries.push(entry);
        true
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn clear(&mut self) {
        self.used = 0;
        self.entries.clear();
    }
}

struct Session {
    path: String,
    items: Arc<[ProjectedItem]>,
    next: usize,
    filter: Option<String>,
}

/// Live sessions keyed by the OS's enumeration id.
#[derive(Default)]
pub struct EnumerationSessions {
    sessions: Mutex<HashMap<EnumerationId, Session>>,
}

impl EnumerationSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session over a frozen child list. Reusing an id replaces the
    /// earlier session.
    pub fn start(&self, id: EnumerationId, path: impl Into<String>, items: Arc<[ProjectedItem]>) {
        let session = Session {
            path: path.into(),
            items,
            next: 0,
            filter: None,
        };
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id, session);
        }
    }

    /// Fill `buffer` from where the last call stopped.
    ///
    /// The filter sticks from the first call (or the latest restart) of a
    /// session. A buffer too small for even one pending entry is
    /// `InvalidArgs`; an exhausted session answers `Success` with nothing
    /// added.
    pub fn fill(
        &self,
        id: EnumerationId,
        filter: Option<&str>,
        restart_scan: bool,
        buffer: &mut DirectoryEntryBuffer,
    ) -> CallbackResult {
        let Ok(mut sessions) = self.sessions.lock() else {
            return CallbackResult::IoError;
        };
        let Some(session) = sessions.get_mut(&id) else {
            return CallbackResult::InvalidArgs;
        };

        if restart_scan {
            session.next = 0;
            session.filter = filter.map(str::to_string);
        } else if session.next == 0 && session.filter.is_none() {
            session.filter = filter.map(str::to_string);
        }

        let mut added = 0usize;
        while session.next < session.items.len() {
            let item = &session.items[session.next];
            let matches = session
                .filter
                .as_deref()
                .is_none_or(|pattern| wildcard_match(pattern, item.name()));
            if matches {
                if !buffer.try_add(DirectoryEntry::from(item)) {
                    if added == 0 {
                        tracing::debug!(enumeration = %id, path = %session.path, "buffer too small for one entry");
                        return CallbackResult::InvalidArgs;
                    }
                    break;
                }
                added += 1;
            }
            session.next += 1;
        }
        CallbackResult::Success
    }

    /// Close a session. Unknown ids are `InvalidArgs`.
    pub fn end(&self, id: EnumerationId) -> CallbackResult {
        match self.sessions.lock() {
            Ok(mut sessions) => match sessions.remove(&id) {
                Some(_) => CallbackResult::Success,
                None => CallbackResult::InvalidArgs,
            },
            Err(_) => CallbackResult::IoError,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.clear();
        }
    }
}
