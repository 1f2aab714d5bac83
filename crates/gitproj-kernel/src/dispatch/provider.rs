//! The OS virtualization boundary.
//!
//! Two traits face each other across it. [`VirtualizationInstance`] is what
//! the OS driver offers us (placeholder writes, content writes). The
//! [`VirtualizationCallbacks`] are what we register with it at start; the
//! [`Dispatcher`](super::Dispatcher) implements them.
//!
//! Paths on both sides are relative to the enlistment root.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use gitproj_types::{CallbackResult, ObjectId, ProviderResult};

use super::enumeration::DirectoryEntryBuffer;
use crate::index::FileMode;
use crate::projection::FileNode;

/// OS-assigned identifier of one callback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OS-assigned identifier of a directory enumeration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumerationId(pub u64);

impl fmt::Display for EnumerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Metadata written with a file placeholder. The content id is provisional:
/// bytes arrive later through hydration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderInfo {
    pub content_id: ObjectId,
    pub size: u64,
    pub mode: FileMode,
}

impl From<&FileNode> for PlaceholderInfo {
    fn from(file: &FileNode) -> Self {
        Self {
            content_id: file.id,
            size: file.size,
            mode: file.mode,
        }
    }
}

/// Operations the OS provider accepts from us.
#[async_trait]
pub trait VirtualizationInstance: Send + Sync {
    /// Register `callbacks` and begin answering OS requests with them.
    async fn start_virtualizing(&self, callbacks: Arc<dyn VirtualizationCallbacks>) -> ProviderResult;

    /// Unregister. No callbacks arrive after this returns.
    async fn stop_virtualizing(&self);

    async fn write_placeholder_file(&self, path: &str, info: &PlaceholderInfo) -> ProviderResult;

    async fn write_placeholder_directory(&self, path: &str) -> ProviderResult;

    /// Supply hydrated bytes for `path` at `offset`.
    async fn write_file_contents(&self, path: &str, offset: u64, bytes: &[u8]) -> ProviderResult;

    /// Rewrite a placeholder whose projected content changed. Full files
    /// are left alone by the OS.
    async fn update_placeholder_if_needed(&self, path: &str, info: &PlaceholderInfo) -> ProviderResult;

    async fn delete_file(&self, path: &str) -> ProviderResult;
}

/// Entry points the OS driver calls. Every method answers with a result
/// code; nothing here may panic or return an error type across the boundary.
///
/// Notifications are already-happened facts except `notify_pre_delete`,
/// which may veto.
#[async_trait]
pub trait VirtualizationCallbacks: Send + Sync {
    /// Write a placeholder for every child of `path`.
    async fn enumerate_directory(&self, command: CommandId, path: &str) -> CallbackResult;

    /// Write a placeholder for the single path `path`.
    async fn get_placeholder_info(&self, command: CommandId, path: &str) -> CallbackResult;

    async fn start_directory_enumeration(
        &self,
        command: CommandId,
        enumeration: EnumerationId,
        path: &str,
    ) -> CallbackResult;

    async fn get_directory_enumeration(
        &self,
        command: CommandId,
        enumeration: EnumerationId,
        filter: Option<&str>,
        restart_scan: bool,
        buffer: &mut DirectoryEntryBuffer,
    ) -> CallbackResult;

    async fn end_directory_enumeration(&self, enumeration: EnumerationId) -> CallbackResult;

    /// Stream the content of `path` through `write_file_contents`.
    async fn get_file_stream(&self, command: CommandId, path: &str) -> CallbackResult;

    /// The OS gave up on `command`.
    fn cancel_command(&self, command: CommandId);

    async fn notify_new_file_created(&self, path: &str, is_directory: bool) -> CallbackResult;

    async fn notify_file_renamed(&self, old_path: &str, new_path: &str, is_directory: bool) -> CallbackResult;

    /// Ask before deleting. `AccessDenied` vetoes.
    async fn notify_pre_delete(&self, path: &str, is_directory: bool) -> CallbackResult;

    async fn notify_file_deleted(&self, path: &str, is_directory: bool) -> CallbackResult;

    /// A handle that wrote to `path` was closed.
    async fn notify_file_modified(&self, path: &str) -> CallbackResult;

    async fn notify_file_superseded(&self, path: &str) -> CallbackResult;

    async fn notify_file_converted_to_full(&self, path: &str) -> CallbackResult;

    async fn notify_hard_link_created(&self, existing_path: &str, new_link_path: &str) -> CallbackResult;

    async fn notify_symlink_created(&self, path: &str) -> CallbackResult;
}
