//! Durable background task queue.
//!
//! Callbacks enqueue [`FileSystemTask`]s; one worker applies them in
//! enqueue order. A task is written to the [`TaskStore`] before `enqueue`
//! returns and deleted only after it has been applied, so a crash at any
//! point replays at most the task that was in flight. Every task is
//! idempotent, which makes that replay harmless.
//!
//! Failures split two ways:
//! - retryable (store busy, transient I/O): back off and retry the same
//!   task, forever, until stopped
//! - fatal (corrupt index, undecodable payload): halt the queue and degrade
//!   the engine; later tasks may depend on this one

pub mod apply;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use gitproj_types::{FileSystemTask, ProjectionError};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::QueueConfig;
use crate::engine::EngineHealth;
use crate::state::{QueuedRow, TaskStore};

pub use apply::{IndexChangeListener, TaskApplier};

/// Where dispatcher callbacks hand off deferred work.
pub trait TaskSink: Send + Sync {
    /// Durably record `task`. Returns once it would survive a crash.
    fn enqueue(&self, task: FileSystemTask) -> Result<(), ProjectionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("retryable: {0}")]
    Retryable(ProjectionError),
    #[error("fatal: {0}")]
    Fatal(ProjectionError),
}

impl TaskError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn into_inner(self) -> ProjectionError {
        match self {
            Self::Retryable(err) | Self::Fatal(err) => err,
        }
    }
}

impl From<ProjectionError> for TaskError {
    fn from(err: ProjectionError) -> Self {
        if err.is_recoverable() {
            Self::Retryable(err)
        } else {
            Self::Fatal(err)
        }
    }
}

/// Applies one task's effects.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn apply(&self, task: &FileSystemTask) -> Result<(), TaskError>;
}

/// The queue over a durable [`TaskStore`].
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    config: QueueConfig,
    wake: Notify,
    halted: RwLock<Option<TaskError>>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            wake: Notify::new(),
            halted: RwLock::new(None),
        }
    }

    /// Tasks not yet applied.
    pub fn len(&self) -> Result<u64, ProjectionError> {
        self.store.task_count()
    }

    pub fn is_empty(&self) -> Result<bool, ProjectionError> {
        Ok(self.len()? == 0)
    }

    /// Pending tasks, oldest first, with their row ids.
    pub fn pending(&self) -> Result<Vec<(i64, FileSystemTask)>, ProjectionError> {
        self.store
            .pending_tasks()?
            .into_iter()
            .map(|row| decode(&row).map(|task| (row.id, task)).map_err(TaskError::into_inner))
            .collect()
    }

    /// Why the queue stopped draining, if it did.
    pub fn halted(&self) -> Option<TaskError> {
        match self.halted.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply the oldest task once. `Ok(None)` when the queue is empty.
    ///
    /// The task stays queued unless it applied cleanly.
    pub async fn process_next(&self, handler: &dyn TaskHandler) -> Result<Option<FileSystemTask>, TaskError> {
        let Some(row) = self.store.oldest_task().map_err(TaskError::Retryable)? else {
            return Ok(None);
        };
        let task = decode(&row)?;
        let span = tracing::debug_span!("task", id = row.id, operation = %task.operation());
        async {
            handler.apply(&task).await?;
            self.store.delete_task(row.id).map_err(TaskError::Retryable)?;
            tracing::trace!(path = %task.path(), "task applied");
            Ok::<_, TaskError>(Some(task))
        }
        .instrument(span)
        .await
    }

    /// Drain everything queued now, stopping at the first failure. Applies
    /// each task once, without backoff.
    pub async fn process_pending(&self, handler: &dyn TaskHandler) -> Result<usize, TaskError> {
        let mut applied = 0;
        while self.process_next(handler).await?.is_some() {
            applied += 1;
        }
        Ok(applied)
    }

    /// Start the single worker. It resumes from the oldest persisted task,
    /// then waits for more, until `cancel` fires or a task fails fatally.
    pub fn spawn_worker(
        self: &Arc<Self>,
        handler: Arc<dyn TaskHandler>,
        health: Arc<EngineHealth>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.run(handler.as_ref(), &health, &cancel).await })
    }

    async fn run(&self, handler: &dyn TaskHandler, health: &EngineHealth, cancel: &CancellationToken) {
        match self.len() {
            Ok(0) => {}
            Ok(n) => tracing::info!(pending = n, "resuming queued tasks"),
            Err(e) => tracing::warn!(error = %e, "could not count queued tasks"),
        }

        let mut attempt = 0u32;
        while !cancel.is_cancelled() {
            match self.process_next(handler).await {
                Ok(Some(_)) => attempt = 0,
                Ok(None) => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = cancel.cancelled() => break,
                    }
                }
                Err(TaskError::Retryable(err)) => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "task failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
                Err(fatal @ TaskError::Fatal(_)) => {
                    tracing::error!(error = %fatal, "task queue halted");
                    if let Ok(mut halted) = self.halted.write() {
                        *halted = Some(fatal.clone());
                    }
                    health.degrade(fatal.into_inner());
                    break;
                }
            }
        }
        tracing::debug!("task worker stopped");
    }
}

impl TaskSink for TaskQueue {
    fn enqueue(&self, task: FileSystemTask) -> Result<(), ProjectionError> {
        let payload =
            serde_json::to_string(&task).map_err(|e| ProjectionError::Io(format!("encoding task: {e}")))?;
        let id = self.store.append_task(&payload)?;
        tracing::debug!(id, operation = %task.operation(), path = %task.path(), "task enqueued");
        self.wake.notify_one();
        Ok(())
    }
}

fn decode(row: &QueuedRow) -> Result<FileSystemTask, TaskError> {
    serde_json::from_str(&row.payload).map_err(|e| {
        TaskError::Fatal(ProjectionError::Store(format!("undecodable task {}: {e}", row.id)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SqliteState;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<FileSystemTask>>,
        /// Fail this many times before succeeding.
        transient_failures: AtomicUsize,
        fatal_on: Option<String>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<FileSystemTask> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        async fn apply(&self, task: &FileSystemTask) -> Result<(), TaskError> {
            if self.fatal_on.as_deref() == Some(task.path()) {
                return Err(TaskError::Fatal(ProjectionError::corrupt(0, "index gone bad")));
            }
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TaskError::Retryable(ProjectionError::Store("busy".into())));
            }
            self.seen.lock().unwrap().push(task.clone());
            Ok(())
        }
    }

    fn queue() -> (SqliteState, Arc<TaskQueue>) {
        let state = SqliteState::in_memory().unwrap();
        let queue = Arc::new(TaskQueue::new(Arc::new(state.clone()), QueueConfig::default()));
        (state, queue)
    }

    #[tokio::test]
    async fn test_fifo_application() {
        let (_state, queue) = queue();
        queue.enqueue(FileSystemTask::file_created("a")).unwrap();
        queue.enqueue(FileSystemTask::file_renamed("a", "b")).unwrap();
        queue.enqueue(FileSystemTask::file_deleted("b")).unwrap();
        assert_eq!(queue.len().unwrap(), 3);

        let recorder = Recorder::default();
        assert_eq!(queue.process_pending(&recorder).await.unwrap(), 3);
        assert_eq!(
            recorder.seen(),
            vec![
                FileSystemTask::file_created("a"),
                FileSystemTask::file_renamed("a", "b"),
                FileSystemTask::file_deleted("b"),
            ]
        );
        assert!(queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_failed_task_stays_at_head() {
        let (_state, queue) = queue();
        queue.enqueue(FileSystemTask::file_created("a")).unwrap();
        queue.enqueue(FileSystemTask::file_created("b")).unwrap();

        let recorder = Recorder {
            transient_failures: AtomicUsize::new(1),
            ..Default::default()
        };
        let err = queue.process_pending(&recorder).await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(queue.len().unwrap(), 2);

        queue.process_pending(&recorder).await.unwrap();
        assert_eq!(recorder.seen()[0].path(), "a");
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_fatal() {
        let (state, queue) = queue();
        state.append_task("{not json").unwrap();
        let err = queue.process_pending(&Recorder::default()).await.unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_retries_with_backoff() {
        let (_state, queue) = queue();
        let recorder = Arc::new(Recorder {
            transient_failures: AtomicUsize::new(3),
            ..Default::default()
        });
        let health = Arc::new(EngineHealth::new());
        let cancel = CancellationToken::new();
        let worker = queue.spawn_worker(recorder.clone(), health.clone(), cancel.clone());

        queue.enqueue(FileSystemTask::file_created("x")).unwrap();
        while !queue.is_empty().unwrap() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.seen(), vec![FileSystemTask::file_created("x")]);
        assert!(!health.is_degraded());

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_halts_on_fatal_and_degrades() {
        let (_state, queue) = queue();
        queue.enqueue(FileSystemTask::file_created("poison")).unwrap();
        queue.enqueue(FileSystemTask::file_created("after")).unwrap();

        let recorder = Arc::new(Recorder {
            fatal_on: Some("poison".into()),
            ..Default::default()
        });
        let health = Arc::new(EngineHealth::new());
        let worker = queue.spawn_worker(recorder.clone(), health.clone(), CancellationToken::new());
        worker.await.unwrap();

        assert!(health.is_degraded());
        assert!(matches!(queue.halted(), Some(TaskError::Fatal(_))));
        assert!(recorder.seen().is_empty());
        assert_eq!(queue.len().unwrap(), 2);
    }

    #[test]
    fn test_error_classification() {
        assert!(TaskError::from(ProjectionError::Store("x".into())).is_recoverable());
        assert!(!TaskError::from(ProjectionError::corrupt(4, "x")).is_recoverable());
    }
}
