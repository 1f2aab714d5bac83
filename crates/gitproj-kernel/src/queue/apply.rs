//! What each task does to the stores.
//!
//! Every effect is an upsert or a remove-if-present, so applying a task a
//! second time (after a crash between apply and acknowledge) changes
//! nothing.

use std::sync::Arc;

use async_trait::async_trait;
use gitproj_types::{FileSystemTask, ProjectionError, SparseMarker, SparseState, TaskOperation};

use super::{TaskError, TaskHandler};
use crate::projection::{Projection, SparseFolders};
use crate::state::{ModifiedPathsStore, PlaceholderStore};

/// Reacts to a rewritten `.git/index`.
#[async_trait]
pub trait IndexChangeListener: Send + Sync {
    async fn index_changed(&self) -> Result<(), ProjectionError>;
}

/// The production [`TaskHandler`].
pub struct TaskApplier {
    projection: Arc<dyn Projection>,
    placeholders: Arc<dyn PlaceholderStore>,
    modified: Arc<dyn ModifiedPathsStore>,
    sparse: Arc<SparseFolders>,
    index: Arc<dyn IndexChangeListener>,
}

impl TaskApplier {
    pub fn new(
        projection: Arc<dyn Projection>,
        placeholders: Arc<dyn PlaceholderStore>,
        modified: Arc<dyn ModifiedPathsStore>,
        sparse: Arc<SparseFolders>,
        index: Arc<dyn IndexChangeListener>,
    ) -> Self {
        Self {
            projection,
            placeholders,
            modified,
            sparse,
            index,
        }
    }

    fn mark_file(&self, path: &str) -> Result<(), ProjectionError> {
        if self.modified.add_modified(path)? {
            tracing::trace!(path, "now modified");
        }
        Ok(())
    }

    fn mark_folder(&self, path: &str) -> Result<(), ProjectionError> {
        self.mark_file(&format!("{path}/"))
    }

    fn mark_stale_file(&self, path: &str) -> Result<(), ProjectionError> {
        self.placeholders.remove(path)?;
        self.mark_file(path)
    }
}

#[async_trait]
impl TaskHandler for TaskApplier {
    async fn apply(&self, task: &FileSystemTask) -> Result<(), TaskError> {
        let path = task.path();
        match task.operation() {
            TaskOperation::FileCreated
            | TaskOperation::FileDeleted
            | TaskOperation::FileOverwritten
            | TaskOperation::FileSuperseded
            | TaskOperation::FileConvertedToFull
            | TaskOperation::SymlinkCreated => self.mark_stale_file(path)?,

            TaskOperation::FolderCreated => {
                self.mark_folder(path)?;
                self.placeholders.add_expanded_folder(path)?;
                if self.projection.get_folder_sparse_state(path) == SparseState::Excluded {
                    tracing::debug!(path, "folder created inside sparse exclusion, including it");
                    self.sparse.set(path, SparseMarker::Included)?;
                }
            }

            TaskOperation::FileRenamed => {
                let old = prior_path(task)?;
                self.placeholders.remove(old)?;
                self.mark_file(old)?;
                self.mark_file(path)?;
            }

            TaskOperation::FolderRenamed => {
                let old = prior_path(task)?;
                self.placeholders.remove_all_entries_for_folder(old)?;
                self.mark_folder(old)?;
                self.mark_folder(path)?;
                self.placeholders.add_expanded_folder(path)?;
            }

            TaskOperation::FolderDeleted => {
                self.placeholders.remove_all_entries_for_folder(path)?;
                if self.projection.is_path_projected(path)?.is_folder() {
                    self.placeholders.add_possible_tombstone_folder(path)?;
                }
                self.mark_folder(path)?;
            }

            TaskOperation::HardLinkCreated => self.mark_file(path)?,

            TaskOperation::FailedToHydrate | TaskOperation::FailedPlaceholderUpdate => self.mark_file(path)?,

            TaskOperation::IndexWriteRequiringValidation => self.index.index_changed().await?,

            TaskOperation::PlaceholderCreationBlocked => self.placeholders.remove(path)?,
        }
        Ok(())
    }
}

fn prior_path(task: &FileSystemTask) -> Result<&str, TaskError> {
    task.old_path().ok_or_else(|| {
        TaskError::Fatal(ProjectionError::Store(format!("{} task without a prior path", task.operation())))
    })
}
