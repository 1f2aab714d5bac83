//! Deferred filesystem side effects.
//!
//! A `FileSystemTask` is what the dispatcher hands to the background queue
//! instead of doing bookkeeping on the OS callback thread. Tasks are values:
//! built once, persisted, applied exactly once, never mutated.

use serde::{Deserialize, Serialize};

/// The closed set of things a task can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOperation {
    FileCreated,
    FolderCreated,
    FileRenamed,
    FolderRenamed,
    FileDeleted,
    FolderDeleted,
    FileOverwritten,
    FileSuperseded,
    FileConvertedToFull,
    HardLinkCreated,
    SymlinkCreated,
    FailedToHydrate,
    FailedPlaceholderUpdate,
    IndexWriteRequiringValidation,
    PlaceholderCreationBlocked,
}

impl TaskOperation {
    /// Operations that carry a prior path (`old_path`).
    pub fn has_prior_path(self) -> bool {
        matches!(
            self,
            Self::FileRenamed | Self::FolderRenamed | Self::HardLinkCreated
        )
    }

    /// Operations whose target is a folder rather than a file.
    pub fn is_folder_operation(self) -> bool {
        matches!(
            self,
            Self::FolderCreated | Self::FolderRenamed | Self::FolderDeleted
        )
    }

    /// Stable name, used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileCreated => "file_created",
            Self::FolderCreated => "folder_created",
            Self::FileRenamed => "file_renamed",
            Self::FolderRenamed => "folder_renamed",
            Self::FileDeleted => "file_deleted",
            Self::FolderDeleted => "folder_deleted",
            Self::FileOverwritten => "file_overwritten",
            Self::FileSuperseded => "file_superseded",
            Self::FileConvertedToFull => "file_converted_to_full",
            Self::HardLinkCreated => "hard_link_created",
            Self::SymlinkCreated => "symlink_created",
            Self::FailedToHydrate => "failed_to_hydrate",
            Self::FailedPlaceholderUpdate => "failed_placeholder_update",
            Self::IndexWriteRequiringValidation => "index_write_requiring_validation",
            Self::PlaceholderCreationBlocked => "placeholder_creation_blocked",
        }
    }
}

impl std::fmt::Display for TaskOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One queued side effect.
///
/// Fields are private so a task cannot change between enqueue and apply.
/// Use the per-operation constructors; renames and hard links are the only
/// tasks carrying a prior path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemTask {
    operation: TaskOperation,
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_path: Option<String>,
}

impl FileSystemTask {
    fn single(operation: TaskOperation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            old_path: None,
        }
    }

    fn moved(operation: TaskOperation, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            operation,
            path: to.into(),
            old_path: Some(from.into()),
        }
    }

    pub fn file_created(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::FileCreated, path)
    }

    pub fn folder_created(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::FolderCreated, path)
    }

    pub fn file_renamed(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::moved(TaskOperation::FileRenamed, from, to)
    }

    pub fn folder_renamed(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::moved(TaskOperation::FolderRenamed, from, to)
    }

    pub fn file_deleted(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::FileDeleted, path)
    }

    pub fn folder_deleted(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::FolderDeleted, path)
    }

    pub fn file_overwritten(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::FileOverwritten, path)
    }

    pub fn file_superseded(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::FileSuperseded, path)
    }

    pub fn file_converted_to_full(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::FileConvertedToFull, path)
    }

    /// A new name (`link`) was created for the existing file `existing`.
    pub fn hard_link_created(existing: impl Into<String>, link: impl Into<String>) -> Self {
        Self::moved(TaskOperation::HardLinkCreated, existing, link)
    }

    pub fn symlink_created(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::SymlinkCreated, path)
    }

    pub fn failed_to_hydrate(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::FailedToHydrate, path)
    }

    pub fn failed_placeholder_update(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::FailedPlaceholderUpdate, path)
    }

    pub fn index_write_requiring_validation(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::IndexWriteRequiringValidation, path)
    }

    pub fn placeholder_creation_blocked(path: impl Into<String>) -> Self {
        Self::single(TaskOperation::PlaceholderCreationBlocked, path)
    }

    pub fn operation(&self) -> TaskOperation {
        self.operation
    }

    /// Target virtual path (the destination, for renames).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Prior path for renames and hard links.
    pub fn old_path(&self) -> Option<&str> {
        self.old_path.as_deref()
    }
}

impl std::fmt::Display for FileSystemTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.old_path {
            Some(old) => write!(f, "{} {} -> {}", self.operation, old, self.path),
            None => write!(f, "{} {}", self.operation, self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_carries_prior_path() {
        let task = FileSystemTask::file_renamed("a.txt", "b.txt");
        assert_eq!(task.operation(), TaskOperation::FileRenamed);
        assert_eq!(task.path(), "b.txt");
        assert_eq!(task.old_path(), Some("a.txt"));
        assert!(task.operation().has_prior_path());
    }

    #[test]
    fn test_single_path_task_has_no_prior() {
        let task = FileSystemTask::file_deleted("src/lib.rs");
        assert_eq!(task.old_path(), None);
        assert!(!task.operation().has_prior_path());
    }

    #[test]
    fn test_json_shape_is_stable() {
        let task = FileSystemTask::folder_renamed("old", "new");
        let json = serde_json::to_string(&task).expect("serialize");
        assert_eq!(
            json,
            r#"{"operation":"folder_renamed","path":"new","old_path":"old"}"#
        );

        let plain = FileSystemTask::file_created("x");
        let json = serde_json::to_string(&plain).expect("serialize");
        assert_eq!(json, r#"{"operation":"file_created","path":"x"}"#);
        let back: FileSystemTask = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, plain);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            FileSystemTask::hard_link_created("a", "b").to_string(),
            "hard_link_created a -> b"
        );
        assert_eq!(
            FileSystemTask::file_overwritten("a").to_string(),
            "file_overwritten a"
        );
    }
}
