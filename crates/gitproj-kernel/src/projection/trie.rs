//! The projection trie: folders and files decoded from one index snapshot.
//!
//! ```text
//!   ProjectionTrie ── snapshot: Arc<IndexSnapshot>
//!        │
//!        └─ root: FolderNode ── contents: OnceLock<FolderContents>
//!                                  ├─ items   [a.txt, B, C.txt]   sorted
//!                                  └─ folders [B]                 sorted
//! ```
//!
//! A folder's children are either built eagerly by a full parse or decoded
//! from its recorded index ranges on first access. Expansion of one folder
//! runs under that folder's own lock; readers of other folders never wait
//! on it. Once `contents` is set it is never replaced: a changed index
//! produces a whole new trie.

use std::sync::{Arc, Mutex, OnceLock};

use gitproj_types::{ObjectId, ProjectionError};

use super::names::{name_cmp, name_cmp_folded};
use crate::index::entry::{EntryKind, FileMode, IndexEntry};
use crate::index::parser::{self, ParseStats};
use crate::index::{IndexCursor, IndexSnapshot};

/// One contiguous run of index entries under a folder.
///
/// A folder normally has a single range. Folders whose names differ only in
/// case are merged and keep one range per spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRange {
    /// Cursor at the first entry under this folder.
    pub cursor: IndexCursor,
    /// The folder's path as spelled in this range, with a trailing `/`
    /// (empty for the root).
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub name: String,
    pub id: ObjectId,
    pub size: u64,
    pub mode: FileMode,
}

impl FileNode {
    pub fn from_entry(entry: &IndexEntry) -> Self {
        Self {
            name: entry.name().to_string(),
            id: entry.id,
            size: entry.size,
            mode: entry.mode,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.mode.kind()
    }
}

/// A child as seen by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectedItem {
    File(FileNode),
    Folder { name: String },
}

impl ProjectedItem {
    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => &file.name,
            Self::Folder { name } => name,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder { .. })
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Self::File(file) => Some(file),
            Self::Folder { .. } => None,
        }
    }
}

/// The children of one folder, frozen.
#[derive(Debug, Default)]
pub struct FolderContents {
    items: Arc<[ProjectedItem]>,
    folders: Vec<Arc<FolderNode>>,
}

impl FolderContents {
    pub(crate) fn new(mut items: Vec<ProjectedItem>, mut folders: Vec<Arc<FolderNode>>) -> Self {
        items.sort_by(|a, b| name_cmp(a.name(), b.name()));
        folders.sort_by(|a, b| name_cmp(a.name(), b.name()));
        Self {
            items: items.into(),
            folders,
        }
    }

    /// Every child, sorted. Shared, so handing it out is cheap.
    pub fn items(&self) -> &Arc<[ProjectedItem]> {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Child by case-insensitive name.
    pub fn find(&self, name: &str) -> Option<&ProjectedItem> {
        self.items
            .binary_search_by(|item| name_cmp_folded(item.name(), name))
            .ok()
            .map(|i| &self.items[i])
    }

    /// Child folder by case-insensitive name.
    pub fn folder(&self, name: &str) -> Option<&Arc<FolderNode>> {
        self.folders
            .binary_search_by(|node| name_cmp_folded(node.name(), name))
            .ok()
            .map(|i| &self.folders[i])
    }

    pub fn folders(&self) -> &[Arc<FolderNode>] {
        &self.folders
    }
}

pub struct FolderNode {
    name: String,
    /// Full path as first spelled in the index. Empty for the root.
    path: String,
    ranges: Vec<FolderRange>,
    contents: OnceLock<Arc<FolderContents>>,
    expand_lock: Mutex<()>,
}

impl FolderNode {
    /// A folder whose children are decoded on first access.
    pub(crate) fn lazy(name: String, path: String, ranges: Vec<FolderRange>) -> Self {
        Self {
            name,
            path,
            ranges,
            contents: OnceLock::new(),
            expand_lock: Mutex::new(()),
        }
    }

    /// A folder with its children already known.
    pub(crate) fn expanded(name: String, path: String, contents: FolderContents) -> Self {
        let node = Self::lazy(name, path, Vec::new());
        let _ = node.contents.set(Arc::new(contents));
        node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn ranges(&self) -> &[FolderRange] {
        &self.ranges
    }

    /// Children have been loaded. Until then a listing is not trustworthy.
    pub fn is_fully_enumerated(&self) -> bool {
        self.contents.get().is_some()
    }

    /// Children, decoding them from `snapshot` if this is the first access.
    pub fn contents(&self, snapshot: &IndexSnapshot) -> Result<Arc<FolderContents>, ProjectionError> {
        if let Some(contents) = self.contents.get() {
            return Ok(Arc::clone(contents));
        }

        let _guard = self
            .expand_lock
            .lock()
            .map_err(|_| ProjectionError::Io(format!("folder lock poisoned: {}", self.path)))?;
        if let Some(contents) = self.contents.get() {
            return Ok(Arc::clone(contents));
        }

        let contents = Arc::new(parser::read_folder(snapshot, &self.path, &self.ranges)?);
        tracing::trace!(folder = %self.path, children = contents.len(), "expanded folder");
        let _ = self.contents.set(Arc::clone(&contents));
        Ok(contents)
    }
}

impl std::fmt::Debug for FolderNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderNode")
            .field("path", &self.path)
            .field("ranges", &self.ranges.len())
            .field("fully_enumerated", &self.is_fully_enumerated())
            .finish()
    }
}

/// A trie built from one index snapshot.
#[derive(Debug)]
pub struct ProjectionTrie {
    root: Arc<FolderNode>,
    snapshot: Arc<IndexSnapshot>,
    stats: ParseStats,
}

impl ProjectionTrie {
    pub(crate) fn new(root: Arc<FolderNode>, snapshot: Arc<IndexSnapshot>, stats: ParseStats) -> Self {
        Self {
            root,
            snapshot,
            stats,
        }
    }

    pub fn root(&self) -> &Arc<FolderNode> {
        &self.root
    }

    pub fn snapshot(&self) -> &Arc<IndexSnapshot> {
        &self.snapshot
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    pub fn contents(&self, folder: &FolderNode) -> Result<Arc<FolderContents>, ProjectionError> {
        folder.contents(&self.snapshot)
    }

    /// Folder at a normalized path (`""` is the root), expanding every
    /// folder on the way.
    pub fn find_folder(&self, path: &str) -> Result<Option<Arc<FolderNode>>, ProjectionError> {
        let mut folder = Arc::clone(&self.root);
        if path.is_empty() {
            return Ok(Some(folder));
        }
        for component in path.split('/') {
            let contents = folder.contents(&self.snapshot)?;
            match contents.folder(component) {
                Some(child) => folder = Arc::clone(child),
                None => return Ok(None),
            }
        }
        Ok(Some(folder))
    }

    /// Whatever lives at a normalized path.
    pub fn lookup(&self, path: &str) -> Result<Option<ProjectedItem>, ProjectionError> {
        if path.is_empty() {
            return Ok(Some(ProjectedItem::Folder {
                name: String::new(),
            }));
        }
        let (parent, name) = match path.rfind('/') {
            Some(slash) => (&path[..slash], &path[slash + 1..]),
            None => ("", path),
        };
        let Some(folder) = self.find_folder(parent)? else {
            return Ok(None);
        };
        let contents = folder.contents(&self.snapshot)?;
        Ok(contents.find(name).cloned())
    }

    /// Visit every file in the trie with its full path, expanding every
    /// folder. Order is depth-first, children sorted.
    pub fn for_each_file(
        &self,
        mut visit: impl FnMut(&str, &FileNode),
    ) -> Result<(), ProjectionError> {
        let mut stack = vec![Arc::clone(&self.root)];
        let mut path = String::new();
        while let Some(folder) = stack.pop() {
            let contents = folder.contents(&self.snapshot)?;
            for item in contents.items().iter() {
                if let ProjectedItem::File(file) = item {
                    path.clear();
                    if !folder.path().is_empty() {
                        path.push_str(folder.path());
                        path.push('/');
                    }
                    path.push_str(&file.name);
                    visit(&path, file);
                }
            }
            stack.extend(contents.folders().iter().rev().cloned());
        }
        Ok(())
    }
}
