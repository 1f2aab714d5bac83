//! The projection: what the virtualized working directory looks like.
//!
//! The dispatcher only sees the [`Projection`] capability. The engine's
//! implementation, [`GitIndexProjection`], combines the current
//! [`ProjectionTrie`] with the sparse markers and rebuilds the trie when
//! the index changes on disk or is explicitly invalidated.

pub mod names;
pub mod sparse;
pub mod trie;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use gitproj_types::{ProjectionError, SparseState};

use crate::config::ProjectionMode;
use crate::index::{IndexParser, IndexSnapshot};
use crate::pool::PoolConfig;

pub use sparse::{SparseFolders, SparseSet};
pub use trie::{FileNode, FolderContents, FolderNode, ProjectedItem, ProjectionTrie};

/// What lives at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    NotProjected,
    File,
    Folder,
}

impl PathKind {
    pub fn exists(self) -> bool {
        self != Self::NotProjected
    }

    pub fn is_folder(self) -> bool {
        self == Self::Folder
    }
}

/// Read-side view of the projection used by the dispatcher.
///
/// Paths are normalized (see [`normalize_path`]); `""` is the root.
pub trait Projection: Send + Sync {
    fn is_path_projected(&self, path: &str) -> Result<PathKind, ProjectionError>;

    /// Children of a folder, sorted, excluding sparse-excluded ones. The
    /// returned list never changes; callers may hold it across calls.
    fn get_projected_items(&self, folder: &str) -> Result<Arc<[ProjectedItem]>, ProjectionError>;

    fn get_folder_sparse_state(&self, path: &str) -> SparseState;

    /// The projected file at `path`. `PathNotFound` for folders too.
    fn get_file_info(&self, path: &str) -> Result<FileNode, ProjectionError>;
}

/// Normalize an OS-supplied relative path: either separator, no leading or
/// trailing separators, `.` components dropped, `..` rejected.
pub fn normalize_path(raw: &str) -> Result<String, ProjectionError> {
    let mut out = String::with_capacity(raw.len());
    for component in raw.split(['/', '\\']) {
        match component {
            "" | "." => continue,
            ".." => return Err(ProjectionError::InvalidPath(raw.to_string())),
            _ => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(component);
            }
        }
    }
    Ok(out)
}

/// `parent/name`, or just `name` under the root.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

pub fn parent_path(path: &str) -> &str {
    path.rfind('/').map_or("", |slash| &path[..slash])
}

/// The engine-owned projection of one enlistment's index.
pub struct GitIndexProjection {
    index_path: PathBuf,
    mode: ProjectionMode,
    /// Parsing is single-threaded; this also serializes reparses.
    parser: Mutex<IndexParser>,
    current: RwLock<Option<Arc<ProjectionTrie>>>,
    stale: AtomicBool,
    sparse: Arc<SparseFolders>,
}

impl GitIndexProjection {
    pub fn new(
        index_path: impl Into<PathBuf>,
        mode: ProjectionMode,
        pool: PoolConfig,
        sparse: Arc<SparseFolders>,
    ) -> Self {
        Self {
            index_path: index_path.into(),
            mode,
            parser: Mutex::new(IndexParser::new(pool)),
            current: RwLock::new(None),
            stale: AtomicBool::new(true),
            sparse,
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn sparse(&self) -> &Arc<SparseFolders> {
        &self.sparse
    }

    /// Mark the current trie stale; the next read reparses.
    pub fn invalidate(&self) {
        tracing::debug!(index = %self.index_path.display(), "projection invalidated");
        self.stale.store(true, Ordering::Release);
    }

    /// True when the current trie was built from the index now on disk and
    /// no reparse is pending.
    pub fn is_parse_complete(&self) -> bool {
        if self.stale.load(Ordering::Acquire) {
            return false;
        }
        self.loaded()
            .is_some_and(|trie| trie.snapshot().fingerprint().matches_file(&self.index_path))
    }

    /// The trie most recently built, without checking freshness.
    pub fn loaded(&self) -> Option<Arc<ProjectionTrie>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// A trie that reflects the index on disk, reparsing if needed.
    pub fn trie(&self) -> Result<Arc<ProjectionTrie>, ProjectionError> {
        if !self.stale.load(Ordering::Acquire)
            && let Some(trie) = self.loaded()
        {
            if trie.snapshot().fingerprint().matches_file(&self.index_path) {
                return Ok(trie);
            }
            tracing::info!(index = %self.index_path.display(), "index changed on disk");
            self.stale.store(true, Ordering::Release);
        }
        self.reparse()
    }

    /// Parse the index now, unless another caller just did.
    pub fn reparse(&self) -> Result<Arc<ProjectionTrie>, ProjectionError> {
        let mut parser = self
            .parser
            .lock()
            .map_err(|_| ProjectionError::Io("index parser lock poisoned".into()))?;

        if !self.stale.load(Ordering::Acquire)
            && let Some(trie) = self.loaded()
            && trie.snapshot().fingerprint().matches_file(&self.index_path)
        {
            return Ok(trie);
        }

        // Cleared before reading, so an invalidation racing the parse wins.
        self.stale.store(false, Ordering::Release);
        let parsed = IndexSnapshot::read(&self.index_path)
            .and_then(|snapshot| parser.parse(Arc::new(snapshot), self.mode));
        let trie = match parsed {
            Ok(trie) => Arc::new(trie),
            Err(err) => {
                self.stale.store(true, Ordering::Release);
                return Err(err);
            }
        };

        let mut current = self
            .current
            .write()
            .map_err(|_| ProjectionError::Io("projection lock poisoned".into()))?;
        *current = Some(Arc::clone(&trie));
        Ok(trie)
    }
}

impl Projection for GitIndexProjection {
    fn is_path_projected(&self, path: &str) -> Result<PathKind, ProjectionError> {
        let trie = self.trie()?;
        let sparse = self.sparse.snapshot();
        Ok(match trie.lookup(path)? {
            Some(ProjectedItem::Folder { .. }) if sparse.is_folder_projected(path) => PathKind::Folder,
            Some(ProjectedItem::File(_)) if sparse.is_file_projected(path) => PathKind::File,
            _ => PathKind::NotProjected,
        })
    }

    fn get_projected_items(&self, folder: &str) -> Result<Arc<[ProjectedItem]>, ProjectionError> {
        let trie = self.trie()?;
        let sparse = self.sparse.snapshot();
        let node = trie
            .find_folder(folder)?
            .filter(|_| sparse.is_folder_projected(folder))
            .ok_or_else(|| ProjectionError::PathNotFound(folder.to_string()))?;
        let items = Arc::clone(trie.contents(&node)?.items());
        if sparse.is_empty() {
            return Ok(items);
        }

        let visible: Vec<ProjectedItem> = items
            .iter()
            .filter(|item| {
                let path = join_path(folder, item.name());
                if item.is_folder() {
                    sparse.is_folder_projected(&path)
                } else {
                    sparse.is_file_projected(&path)
                }
            })
            .cloned()
            .collect();
        Ok(visible.into())
    }

    fn get_folder_sparse_state(&self, path: &str) -> SparseState {
        self.sparse.folder_state(path)
    }

    fn get_file_info(&self, path: &str) -> Result<FileNode, ProjectionError> {
        let trie = self.trie()?;
        match trie.lookup(path)? {
            Some(ProjectedItem::File(file)) if self.sparse.snapshot().is_file_projected(path) => Ok(file),
            _ => Err(ProjectionError::PathNotFound(path.to_string())),
        }
    }
}
