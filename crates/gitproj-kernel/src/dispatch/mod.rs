//! Virtualization callback dispatch.
//!
//! The [`Dispatcher`] answers every OS callback for one mounted
//! enlistment. Each request moves through a small state machine:
//!
//! ```text
//!   Received ─► Resolving ─┬─► Answering ─┬─► Completed
//!       │                  │              └─► Cancelled
//!       │                  ├─► Rejecting ───► Completed
//!       └──────────────────┴─► Cancelled
//! ```
//!
//! Reads (enumeration, placeholder info, hydration) resolve against the
//! [`Projection`] and write back through the [`VirtualizationInstance`].
//! Notifications only validate and enqueue a [`FileSystemTask`]; the
//! bookkeeping happens later on the queue worker.
//!
//! A cancelled request answers `Pending` and is never completed: after
//! cancellation nothing more is written to the OS for that command.

pub mod enumeration;
pub mod hydrate;
pub mod policy;
pub mod provider;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gitproj_types::{CallbackResult, FileSystemTask, ProjectionError, ProviderResult};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::DEFAULT_HYDRATION_CHUNK_SIZE;
use crate::engine::EngineHealth;
use crate::git::GitObjectProvider;
use crate::projection::{PathKind, ProjectedItem, Projection, join_path, normalize_path};
use crate::queue::TaskSink;
use crate::state::PlaceholderStore;

pub use enumeration::{DirectoryEntry, DirectoryEntryBuffer, EnumerationSessions};
pub use hydrate::OsWriteSink;
pub use policy::{PathClass, classify, is_delete_allowed};
pub use provider::{
    CommandId, EnumerationId, PlaceholderInfo, VirtualizationCallbacks, VirtualizationInstance,
};

/// Where one request is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Resolving,
    Answering,
    Rejecting,
    Completed,
    Cancelled,
}

impl RequestState {
    pub fn can_advance_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, Resolving | Rejecting | Cancelled)
                | (Resolving, Answering | Rejecting | Cancelled)
                | (Answering, Completed | Cancelled)
                | (Rejecting, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Tracks one request's state; transitions are logged at trace level.
#[derive(Debug)]
struct Request {
    state: RequestState,
}

impl Request {
    fn new() -> Self {
        Self {
            state: RequestState::Received,
        }
    }

    fn advance(&mut self, next: RequestState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal request transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(from = ?self.state, to = ?next, "request");
        self.state = next;
    }

    /// Move to a terminal state matching `result`.
    fn finish(mut self, result: CallbackResult) -> CallbackResult {
        match result {
            CallbackResult::Pending => self.advance(RequestState::Cancelled),
            CallbackResult::Success => {
                if self.state != RequestState::Answering {
                    self.advance(RequestState::Answering);
                }
                self.advance(RequestState::Completed);
            }
            _ => {
                if self.state != RequestState::Answering {
                    self.advance(RequestState::Rejecting);
                }
                self.advance(RequestState::Completed);
            }
        }
        result
    }

    fn fail(self, err: &ProjectionError) -> CallbackResult {
        if err.is_cancelled() {
            tracing::debug!("cancelled");
        } else if err.is_recoverable() {
            tracing::debug!(error = %err, "request failed");
        } else {
            tracing::error!(error = %err, "request failed");
        }
        self.finish(err.result_code())
    }
}

/// Unregisters a command's token when the callback returns.
struct CommandGuard<'a> {
    commands: &'a Mutex<HashMap<CommandId, CancellationToken>>,
    command: CommandId,
    token: CancellationToken,
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.remove(&self.command);
        }
    }
}

/// Answers OS callbacks for one enlistment.
pub struct Dispatcher {
    projection: Arc<dyn Projection>,
    provider: Arc<dyn VirtualizationInstance>,
    objects: Arc<dyn GitObjectProvider>,
    placeholders: Arc<dyn PlaceholderStore>,
    tasks: Arc<dyn TaskSink>,
    health: Arc<EngineHealth>,
    sessions: EnumerationSessions,
    commands: Mutex<HashMap<CommandId, CancellationToken>>,
    shutdown: Mutex<CancellationToken>,
    chunk_size: usize,
}

impl Dispatcher {
    pub fn new(
        projection: Arc<dyn Projection>,
        provider: Arc<dyn VirtualizationInstance>,
        objects: Arc<dyn GitObjectProvider>,
        placeholders: Arc<dyn PlaceholderStore>,
        tasks: Arc<dyn TaskSink>,
    ) -> Self {
        Self {
            projection,
            provider,
            objects,
            placeholders,
            tasks,
            health: Arc::new(EngineHealth::new()),
            sessions: EnumerationSessions::new(),
            commands: Mutex::new(HashMap::new()),
            shutdown: Mutex::new(CancellationToken::new()),
            chunk_size: DEFAULT_HYDRATION_CHUNK_SIZE,
        }
    }

    /// Share the engine's health so a degraded engine stops serving.
    pub fn with_health(mut self, health: Arc<EngineHealth>) -> Self {
        self.health = health;
        self
    }

    /// Bytes per `write_file_contents` call during hydration.
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    /// Every command token is a child of `token`.
    pub fn with_shutdown_token(self, token: CancellationToken) -> Self {
        self.rearm(token);
        self
    }

    /// Serve again after [`Dispatcher::shutdown`], under a fresh parent token.
    pub fn rearm(&self, token: CancellationToken) {
        match self.shutdown.lock() {
            Ok(mut shutdown) => *shutdown = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    fn shutdown_token(&self) -> CancellationToken {
        match self.shutdown.lock() {
            Ok(shutdown) => shutdown.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn health(&self) -> &Arc<EngineHealth> {
        &self.health
    }

    /// Cancel every in-flight and future command.
    pub fn shutdown(&self) {
        self.shutdown_token().cancel();
        self.sessions.clear();
    }

    /// Commands currently holding a cancellation token.
    pub fn in_flight(&self) -> usize {
        self.commands.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn open_enumerations(&self) -> usize {
        self.sessions.len()
    }

    fn begin_command(&self, command: CommandId) -> CommandGuard<'_> {
        let token = self.shutdown_token().child_token();
        if let Ok(mut commands) = self.commands.lock() {
            commands.insert(command, token.clone());
        }
        CommandGuard {
            commands: &self.commands,
            command,
            token,
        }
    }

    /// Normalize the path and refuse to serve while degraded.
    fn admit(&self, raw: &str) -> Result<String, ProjectionError> {
        self.health.check()?;
        normalize_path(raw)
    }

    /// A corrupt index takes the whole mount down.
    fn note(&self, err: ProjectionError) -> ProjectionError {
        if !err.is_recoverable() {
            self.health.degrade(err.clone());
        }
        err
    }

    fn enqueue(&self, task: FileSystemTask) -> CallbackResult {
        match self.tasks.enqueue(task) {
            Ok(()) => CallbackResult::Success,
            Err(err) => {
                tracing::error!(error = %err, "could not queue task");
                CallbackResult::IoError
            }
        }
    }

    async fn write_child(&self, folder: &str, item: &ProjectedItem) -> Result<(), ProjectionError> {
        let path = join_path(folder, item.name());
        let result = match item {
            ProjectedItem::File(file) => {
                let info = PlaceholderInfo::from(file);
                self.provider.write_placeholder_file(&path, &info).await
            }
            ProjectedItem::Folder { .. } => self.provider.write_placeholder_directory(&path).await,
        };
        match result {
            ProviderResult::Success => {}
            ProviderResult::AccessDenied => {
                tracing::warn!(path = %path, "placeholder creation blocked");
                if let Err(err) = self.tasks.enqueue(FileSystemTask::placeholder_creation_blocked(path.clone())) {
                    tracing::error!(error = %err, "could not queue task");
                }
                return Err(ProjectionError::Io(format!("placeholder creation blocked: {path}")));
            }
            other => return Err(hydrate::provider_error(other, &path)),
        }
        match item {
            ProjectedItem::File(file) => self.placeholders.add_file(&path, file.id),
            ProjectedItem::Folder { .. } => self.placeholders.add_partial_folder(&path),
        }
    }

    async fn enumerate(&self, command: CommandId, raw: &str, request: &mut Request) -> Result<(), ProjectionError> {
        let guard = self.begin_command(command);
        let path = self.admit(raw)?;
        if classify(&path).is_git() {
            return Err(ProjectionError::PathNotFound(path));
        }
        request.advance(RequestState::Resolving);
        let items = self.projection.get_projected_items(&path).map_err(|e| self.note(e))?;

        request.advance(RequestState::Answering);
        for item in items.iter() {
            if guard.token.is_cancelled() {
                return Err(ProjectionError::Cancelled);
            }
            self.write_child(&path, item).await.map_err(|err| match err {
                ProjectionError::Cancelled | ProjectionError::Io(_) => err,
                other => ProjectionError::Io(other.to_string()),
            })?;
        }
        if !path.is_empty() {
            self.placeholders.add_expanded_folder(&path)?;
        }
        tracing::debug!(path = %path, children = items.len(), "enumerated");
        Ok(())
    }

    async fn placeholder_info(&self, raw: &str, request: &mut Request) -> Result<(), ProjectionError> {
        let path = self.admit(raw)?;
        if classify(&path).is_git() {
            return Err(ProjectionError::PathNotFound(path));
        }
        request.advance(RequestState::Resolving);
        let result = match self.projection.is_path_projected(&path).map_err(|e| self.note(e))? {
            PathKind::NotProjected => return Err(ProjectionError::PathNotFound(path)),
            PathKind::File => {
                let file = self.projection.get_file_info(&path).map_err(|e| self.note(e))?;
                request.advance(RequestState::Answering);
                let result = self
                    .provider
                    .write_placeholder_file(&path, &PlaceholderInfo::from(&file))
                    .await;
                if result.is_success() {
                    self.placeholders.add_file(&path, file.id)?;
                }
                result
            }
            PathKind::Folder => {
                request.advance(RequestState::Answering);
                let result = self.provider.write_placeholder_directory(&path).await;
                if result.is_success() {
                    self.placeholders.add_partial_folder(&path)?;
                }
                result
            }
        };
        match result {
            ProviderResult::Success => Ok(()),
            other => Err(hydrate::provider_error(other, &path)),
        }
    }

    async fn hydrate(&self, command: CommandId, raw: &str, request: &mut Request) -> Result<u64, ProjectionError> {
        let guard = self.begin_command(command);
        let path = self.admit(raw)?;
        request.advance(RequestState::Resolving);
        let file = self.projection.get_file_info(&path).map_err(|e| self.note(e))?;

        request.advance(RequestState::Answering);
        let mut sink = OsWriteSink::new(
            Arc::clone(&self.provider),
            path.clone(),
            self.chunk_size,
            guard.token.clone(),
        );
        let copied = self
            .objects
            .try_copy_blob_content_stream(&file.id, &guard.token, &mut sink)
            .await;
        let written = match copied {
            Ok(_) => sink.finish().await,
            Err(err) => Err(err),
        };
        match written {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "hydration failed");
                if let Err(queue_err) = self.tasks.enqueue(FileSystemTask::failed_to_hydrate(path)) {
                    tracing::error!(error = %queue_err, "could not queue task");
                }
                Err(err)
            }
        }
    }

    /// Shared shape of every notification: admit, then build a task (or
    /// nothing) from the normalized path.
    async fn notify(
        &self,
        callback: &'static str,
        raw: &str,
        to_task: impl FnOnce(String) -> Option<FileSystemTask>,
    ) -> CallbackResult {
        let span = tracing::debug_span!("notify", callback, path = raw);
        async {
            let path = match self.admit(raw) {
                Ok(path) => path,
                Err(err) => return err.result_code(),
            };
            match to_task(path) {
                Some(task) => self.enqueue(task),
                None => CallbackResult::Success,
            }
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl VirtualizationCallbacks for Dispatcher {
    async fn enumerate_directory(&self, command: CommandId, path: &str) -> CallbackResult {
        let span = tracing::debug_span!("enumerate_directory", %command, path);
        async {
            let mut request = Request::new();
            match self.enumerate(command, path, &mut request).await {
                Ok(()) => request.finish(CallbackResult::Success),
                Err(err) => request.fail(&err),
            }
        }
        .instrument(span)
        .await
    }

    async fn get_placeholder_info(&self, command: CommandId, path: &str) -> CallbackResult {
        let span = tracing::debug_span!("get_placeholder_info", %command, path);
        async {
            let mut request = Request::new();
            match self.placeholder_info(path, &mut request).await {
                Ok(()) => request.finish(CallbackResult::Success),
                Err(err) => request.fail(&err),
            }
        }
        .instrument(span)
        .await
    }

    async fn start_directory_enumeration(
        &self,
        command: CommandId,
        enumeration: EnumerationId,
        path: &str,
    ) -> CallbackResult {
        let span = tracing::debug_span!("start_directory_enumeration", %command, %enumeration, path);
        async {
            let mut request = Request::new();
            let path = match self.admit(path) {
                Ok(path) => path,
                Err(err) => return request.fail(&err),
            };
            request.advance(RequestState::Resolving);
            match self.projection.get_projected_items(&path) {
                Ok(items) => {
                    self.sessions.start(enumeration, path, items);
                    request.finish(CallbackResult::Success)
                }
                Err(err) => {
                    let err = self.note(err);
                    request.fail(&err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn get_directory_enumeration(
        &self,
        command: CommandId,
        enumeration: EnumerationId,
        filter: Option<&str>,
        restart_scan: bool,
        buffer: &mut DirectoryEntryBuffer,
    ) -> CallbackResult {
        let _span = tracing::trace_span!("get_directory_enumeration", %command, %enumeration).entered();
        if let Err(err) = self.health.check() {
            return err.result_code();
        }
        self.sessions.fill(enumeration, filter, restart_scan, buffer)
    }

    async fn end_directory_enumeration(&self, enumeration: EnumerationId) -> CallbackResult {
        self.sessions.end(enumeration)
    }

    async fn get_file_stream(&self, command: CommandId, path: &str) -> CallbackResult {
        let span = tracing::debug_span!("get_file_stream", %command, path);
        async {
            let mut request = Request::new();
            match self.hydrate(command, path, &mut request).await {
                Ok(bytes) => {
                    tracing::debug!(bytes, "hydrated");
                    request.finish(CallbackResult::Success)
                }
                Err(err) => request.fail(&err),
            }
        }
        .instrument(span)
        .await
    }

    fn cancel_command(&self, command: CommandId) {
        let token = self.commands.lock().ok().and_then(|c| c.get(&command).cloned());
        match token {
            Some(token) => {
                tracing::debug!(%command, "command cancelled by OS");
                token.cancel();
            }
            None => tracing::trace!(%command, "cancel for unknown command"),
        }
    }

    async fn notify_new_file_created(&self, path: &str, is_directory: bool) -> CallbackResult {
        self.notify("new_file_created", path, |path| {
            if classify(&path).is_git() {
                None
            } else if is_directory {
                Some(FileSystemTask::folder_created(path))
            } else {
                Some(FileSystemTask::file_created(path))
            }
        })
        .await
    }

    async fn notify_file_renamed(&self, old_path: &str, new_path: &str, is_directory: bool) -> CallbackResult {
        let old = match self.admit(old_path) {
            Ok(old) => old,
            Err(err) => return err.result_code(),
        };
        self.notify("file_renamed", new_path, move |new| {
            let (old_class, new_class) = (classify(&old), classify(&new));
            if new_class == PathClass::GitIndex {
                return Some(FileSystemTask::index_write_requiring_validation(new));
            }
            match (old_class.is_git(), new_class.is_git(), is_directory) {
                (true, true, _) => None,
                (true, false, false) => Some(FileSystemTask::file_created(new)),
                (true, false, true) => Some(FileSystemTask::folder_created(new)),
                (false, true, false) => Some(FileSystemTask::file_deleted(old)),
                (false, true, true) => Some(FileSystemTask::folder_deleted(old)),
                (false, false, false) => Some(FileSystemTask::file_renamed(old, new)),
                (false, false, true) => Some(FileSystemTask::folder_renamed(old, new)),
            }
        })
        .await
    }

    async fn notify_pre_delete(&self, path: &str, _is_directory: bool) -> CallbackResult {
        let span = tracing::debug_span!("notify", callback = "pre_delete", path);
        let _entered = span.enter();
        let path = match normalize_path(path) {
            Ok(path) => path,
            Err(err) => return err.result_code(),
        };
        if is_delete_allowed(&path) {
            CallbackResult::Success
        } else {
            tracing::info!(path = %path, "refused delete of protected path");
            CallbackResult::AccessDenied
        }
    }

    async fn notify_file_deleted(&self, path: &str, is_directory: bool) -> CallbackResult {
        self.notify("file_deleted", path, |path| {
            if classify(&path).is_git() {
                None
            } else if is_directory {
                Some(FileSystemTask::folder_deleted(path))
            } else {
                Some(FileSystemTask::file_deleted(path))
            }
        })
        .await
    }

    async fn notify_file_modified(&self, path: &str) -> CallbackResult {
        self.notify("file_modified", path, |path| match classify(&path) {
            PathClass::GitIndex => Some(FileSystemTask::index_write_requiring_validation(path)),
            PathClass::WorkingTree => Some(FileSystemTask::file_overwritten(path)),
            PathClass::GitDir | PathClass::GitMetadata => None,
        })
        .await
    }

    async fn notify_file_superseded(&self, path: &str) -> CallbackResult {
        self.notify("file_superseded", path, |path| match classify(&path) {
            PathClass::GitIndex => Some(FileSystemTask::index_write_requiring_validation(path)),
            PathClass::WorkingTree => Some(FileSystemTask::file_superseded(path)),
            PathClass::GitDir | PathClass::GitMetadata => None,
        })
        .await
    }

    async fn notify_file_converted_to_full(&self, path: &str) -> CallbackResult {
        self.notify("file_converted_to_full", path, |path| {
            (!classify(&path).is_git()).then(|| FileSystemTask::file_converted_to_full(path))
        })
        .await
    }

    async fn notify_hard_link_created(&self, existing_path: &str, new_link_path: &str) -> CallbackResult {
        let existing = match self.admit(existing_path) {
            Ok(existing) => existing,
            Err(err) => return err.result_code(),
        };
        self.notify("hard_link_created", new_link_path, move |link| {
            (!classify(&link).is_git()).then(|| FileSystemTask::hard_link_created(existing, link))
        })
        .await
    }

    async fn notify_symlink_created(&self, path: &str) -> CallbackResult {
        self.notify("symlink_created", path, |path| {
            (!classify(&path).is_git()).then(|| FileSystemTask::symlink_created(path))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_transitions() {
        use RequestState::*;
        assert!(Received.can_advance_to(Resolving));
        assert!(Resolving.can_advance_to(Answering));
        assert!(Answering.can_advance_to(Cancelled));
        assert!(Rejecting.can_advance_to(Completed));
        assert!(!Completed.can_advance_to(Answering));
        assert!(!Cancelled.can_advance_to(Completed));
        assert!(!Rejecting.can_advance_to(Cancelled));
        assert!(Completed.is_terminal() && Cancelled.is_terminal());
    }

    #[test]
    fn test_request_finish_paths() {
        let mut request = Request::new();
        request.advance(RequestState::Resolving);
        assert_eq!(request.finish(CallbackResult::PathNotFound), CallbackResult::PathNotFound);

        let mut request = Request::new();
        request.advance(RequestState::Resolving);
        request.advance(RequestState::Answering);
        assert_eq!(request.finish(CallbackResult::Pending), CallbackResult::Pending);

        assert_eq!(
            Request::new().fail(&ProjectionError::InvalidPath("..".into())),
            CallbackResult::InvalidArgs
        );
    }
}
