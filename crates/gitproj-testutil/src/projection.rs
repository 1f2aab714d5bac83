//! A [`Projection`] over a fixed set of paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use gitproj_kernel::index::FileMode;
use gitproj_kernel::projection::names::{fold, name_cmp};
use gitproj_kernel::projection::{FileNode, PathKind, ProjectedItem, Projection};
use gitproj_types::{ProjectionError, SparseState};

use crate::IndexBuilder;

/// Serves a hand-written tree without any index file. Counts listings so
/// tests can tell which folders were read.
#[derive(Default)]
pub struct StaticProjection {
    /// Folded folder path to its children.
    folders: BTreeMap<String, Vec<ProjectedItem>>,
    states: HashMap<String, SparseState>,
    listings: AtomicUsize,
    corrupt: Option<ProjectionError>,
}

impl StaticProjection {
    pub fn new() -> Self {
        let mut folders = BTreeMap::new();
        folders.insert(String::new(), Vec::new());
        Self {
            folders,
            ..Default::default()
        }
    }

    /// Add a regular file, creating parent folders.
    pub fn file(self, path: &str, content: &[u8]) -> Self {
        self.file_with_mode(path, content, FileMode::REGULAR)
    }

    pub fn file_with_mode(mut self, path: &str, content: &[u8], mode: FileMode) -> Self {
        let (parent, name) = split(path);
        self.ensure_folder(parent);
        let node = FileNode {
            name: name.to_string(),
            id: IndexBuilder::blob_id(content),
            size: content.len() as u64,
            mode,
        };
        self.insert_child(parent, ProjectedItem::File(node));
        self
    }

    /// Add an empty folder, creating parents.
    pub fn folder(mut self, path: &str) -> Self {
        self.ensure_folder(path);
        self
    }

    /// Report `state` for the folder at `path`.
    pub fn sparse_state(mut self, path: &str, state: SparseState) -> Self {
        self.states.insert(fold(path), state);
        self
    }

    /// Every read fails with `err`.
    pub fn failing(mut self, err: ProjectionError) -> Self {
        self.corrupt = Some(err);
        self
    }

    /// Calls to `get_projected_items` so far.
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    fn ensure_folder(&mut self, path: &str) {
        if path.is_empty() || self.folders.contains_key(&fold(path)) {
            return;
        }
        let (parent, name) = split(path);
        self.ensure_folder(parent);
        self.insert_child(
            parent,
            ProjectedItem::Folder {
                name: name.to_string(),
            },
        );
        self.folders.insert(fold(path), Vec::new());
    }

    fn insert_child(&mut self, parent: &str, item: ProjectedItem) {
        let children = self.folders.entry(fold(parent)).or_default();
        children.retain(|c| fold(c.name()) != fold(item.name()));
        children.push(item);
        children.sort_by(|a, b| name_cmp(a.name(), b.name()));
    }

    fn check(&self) -> Result<(), ProjectionError> {
        match &self.corrupt {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn lookup(&self, path: &str) -> Option<&ProjectedItem> {
        let (parent, name) = split(path);
        let folded = fold(name);
        self.folders
            .get(&fold(parent))?
            .iter()
            .find(|item| fold(item.name()) == folded)
    }
}

fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(slash) => (&path[..slash], &path[slash + 1..]),
        None => ("", path),
    }
}

impl Projection for StaticProjection {
    fn is_path_projected(&self, path: &str) -> Result<PathKind, ProjectionError> {
        self.check()?;
        if path.is_empty() {
            return Ok(PathKind::Folder);
        }
        Ok(match self.lookup(path) {
            Some(ProjectedItem::Folder { .. }) => PathKind::Folder,
            Some(ProjectedItem::File(_)) => PathKind::File,
            None => PathKind::NotProjected,
        })
    }

    fn get_projected_items(&self, folder: &str) -> Result<Arc<[ProjectedItem]>, ProjectionError> {
        self.check()?;
        self.listings.fetch_add(1, Ordering::SeqCst);
        self.folders
            .get(&fold(folder))
            .map(|items| items.clone().into())
            .ok_or_else(|| ProjectionError::PathNotFound(folder.to_string()))
    }

    fn get_folder_sparse_state(&self, path: &str) -> SparseState {
        self.states
            .get(&fold(path))
            .copied()
            .unwrap_or(SparseState::Included)
    }

    fn get_file_info(&self, path: &str) -> Result<FileNode, ProjectionError> {
        self.check()?;
        match self.lookup(path) {
            Some(ProjectedItem::File(file)) => Ok(file.clone()),
            _ => Err(ProjectionError::PathNotFound(path.to_string())),
        }
    }
}
