//! Sparse-checkout inheritance.
//!
//! A folder's *base* state comes from the nearest explicit marker at or
//! above it; with no marker anywhere it is Included. A folder whose
//! descendants carry a marker disagreeing with its base state is
//! PartiallyIncluded. The root never carries a marker.
//!
//! ```text
//!   markers: A = Excluded, A/B/C = Included
//!
//!   ""        Included  -> PartiallyIncluded (A disagrees)
//!   A         Excluded  -> PartiallyIncluded (A/B/C disagrees)
//!   A/B       Excluded  -> PartiallyIncluded
//!   A/B/C     Included
//!   A/D       Excluded
//! ```

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use gitproj_types::{ProjectionError, SparseMarker, SparseState};

use super::names::fold;
use crate::state::SparseStore;

/// In-memory set of sparse markers, keyed by folded path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseSet {
    markers: BTreeMap<String, SparseMarker>,
}

impl SparseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_markers<I, S>(markers: I) -> Result<Self, ProjectionError>
    where
        I: IntoIterator<Item = (S, SparseMarker)>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for (path, marker) in markers {
            set.insert(path.as_ref(), marker)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, path: &str, marker: SparseMarker) -> Result<(), ProjectionError> {
        if path.is_empty() {
            return Err(ProjectionError::InvalidPath(
                "the root cannot carry a sparse marker".into(),
            ));
        }
        self.markers.insert(fold(path), marker);
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Option<SparseMarker> {
        self.markers.remove(&fold(path))
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Marker set on exactly this path.
    pub fn marker(&self, path: &str) -> Option<SparseMarker> {
        self.markers.get(&fold(path)).copied()
    }

    /// Nearest marker at or above `path`, Included when there is none.
    pub fn base_marker(&self, path: &str) -> SparseMarker {
        if self.markers.is_empty() || path.is_empty() {
            return SparseMarker::Included;
        }
        let folded = fold(path);
        let mut end = folded.len();
        loop {
            if let Some(marker) = self.markers.get(&folded[..end]) {
                return *marker;
            }
            match folded[..end].rfind('/') {
                Some(slash) => end = slash,
                None => return SparseMarker::Included,
            }
        }
    }

    /// Sparse state of a folder.
    pub fn folder_state(&self, path: &str) -> SparseState {
        let base = self.base_marker(path);
        if self.has_descendant_marker_other_than(path, base) {
            SparseState::PartiallyIncluded
        } else {
            base.into()
        }
    }

    /// Whether a file at `path` is projected: its parent's base state decides.
    pub fn is_file_projected(&self, path: &str) -> bool {
        let parent = path.rfind('/').map_or("", |slash| &path[..slash]);
        self.base_marker(parent) == SparseMarker::Included
    }

    pub fn is_folder_projected(&self, path: &str) -> bool {
        self.folder_state(path).is_projected()
    }

    fn has_descendant_marker_other_than(&self, path: &str, base: SparseMarker) -> bool {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            let mut prefix = fold(path);
            prefix.push('/');
            prefix
        };
        self.markers
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(&prefix))
            .any(|(_, marker)| *marker != base)
    }
}

/// The engine's shared view of the sparse markers: reads come from an
/// immutable snapshot, writes go to the store first and then swap in a
/// new snapshot.
pub struct SparseFolders {
    store: Arc<dyn SparseStore>,
    current: RwLock<Arc<SparseSet>>,
}

impl SparseFolders {
    /// Load every marker from `store`.
    pub fn load(store: Arc<dyn SparseStore>) -> Result<Self, ProjectionError> {
        let set = SparseSet::from_markers(store.get_all_markers()?)?;
        tracing::debug!(markers = set.len(), "loaded sparse folders");
        Ok(Self {
            store,
            current: RwLock::new(Arc::new(set)),
        })
    }

    pub fn snapshot(&self) -> Arc<SparseSet> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn folder_state(&self, path: &str) -> SparseState {
        self.snapshot().folder_state(path)
    }

    pub fn set(&self, path: &str, marker: SparseMarker) -> Result<(), ProjectionError> {
        if path.is_empty() {
            return Err(ProjectionError::InvalidPath(
                "the root cannot carry a sparse marker".into(),
            ));
        }
        self.store.set_marker(path, marker)?;
        self.update(|set| set.insert(path, marker))
    }

    pub fn remove(&self, path: &str) -> Result<(), ProjectionError> {
        self.store.remove_marker(path)?;
        self.update(|set| {
            set.remove(path);
            Ok(())
        })
    }

    fn update(
        &self,
        change: impl FnOnce(&mut SparseSet) -> Result<(), ProjectionError>,
    ) -> Result<(), ProjectionError> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| ProjectionError::Store("sparse set lock poisoned".into()))?;
        let mut next = SparseSet::clone(&guard);
        change(&mut next)?;
        *guard = Arc::new(next);
        Ok(())
    }
}
