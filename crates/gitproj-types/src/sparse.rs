//! Sparse-checkout state.

use serde::{Deserialize, Serialize};

/// How much of a folder is projected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SparseState {
    /// Projected in full.
    Included,
    /// Not projected at all.
    Excluded,
    /// Projected, but some descendants are excluded (or some descendants
    /// of an excluded folder were re-included).
    PartiallyIncluded,
}

impl SparseState {
    /// Whether the folder itself appears in the projection.
    pub fn is_projected(self) -> bool {
        !matches!(self, Self::Excluded)
    }
}

/// An explicit marker persisted in the sparse store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SparseMarker {
    Included,
    Excluded,
}

impl SparseMarker {
    /// Integer form used by the SQLite schema.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Included => 0,
            Self::Excluded => 1,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Included),
            1 => Some(Self::Excluded),
            _ => None,
        }
    }
}

impl From<SparseMarker> for SparseState {
    fn from(marker: SparseMarker) -> Self {
        match marker {
            SparseMarker::Included => Self::Included,
            SparseMarker::Excluded => Self::Excluded,
        }
    }
}
