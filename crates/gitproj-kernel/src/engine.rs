//! The mount-owned engine.
//!
//! One [`Engine`] per virtualized enlistment. It owns the projection, the
//! state database, the queue and its worker, and the dispatcher it
//! registers with the OS provider. Several engines can live in one process.
//!
//! ```text
//!   OS provider ──callbacks──► Dispatcher ──reads──► GitIndexProjection
//!        ▲                         │                       ▲
//!        └──placeholder writes─────┤                       │ invalidate
//!                                  └──enqueue──► TaskQueue ─► TaskApplier
//!                                                  (SQLite)     │
//!                                                               └─► Reconciler
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use gitproj_types::{PlaceholderKind, ProjectionError, ProviderResult};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::dispatch::{Dispatcher, PlaceholderInfo, VirtualizationCallbacks, VirtualizationInstance};
use crate::git::GitObjectProvider;
use crate::projection::names::names_equal;
use crate::projection::{GitIndexProjection, Projection, SparseFolders};
use crate::queue::{IndexChangeListener, TaskApplier, TaskQueue, TaskSink};
use crate::state::{PlaceholderStore, SqliteState};

/// Meta key holding the hex checksum of the index last reconciled against.
pub const INDEX_CHECKSUM_KEY: &str = "index_checksum";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("state database: {0}")]
    State(String),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("virtualization provider refused to start: {0:?}")]
    ProviderStart(ProviderResult),

    #[error("engine is already running")]
    AlreadyRunning,
}

impl EngineError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Projection(err) => err.is_recoverable(),
            Self::State(_) | Self::ProviderStart(_) | Self::AlreadyRunning => true,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::State(format!("{err:#}"))
    }
}

/// Whether the engine may keep serving. The first fatal error sticks.
#[derive(Debug, Default)]
pub struct EngineHealth {
    failure: RwLock<Option<ProjectionError>>,
}

impl EngineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn degrade(&self, err: ProjectionError) {
        let Ok(mut failure) = self.failure.write() else {
            return;
        };
        if failure.is_none() {
            tracing::error!(error = %err, "engine degraded, refusing further requests");
            *failure = Some(err);
        }
    }

    /// `Err(Io)` while degraded, carrying the original failure.
    pub fn check(&self) -> Result<(), ProjectionError> {
        match self.failure() {
            None => Ok(()),
            Some(err) => Err(ProjectionError::Io(format!("engine degraded: {err}"))),
        }
    }

    pub fn failure(&self) -> Option<ProjectionError> {
        match self.failure.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.failure().is_some()
    }

    /// Forget the failure, e.g. after the index was repaired.
    pub fn clear(&self) {
        if let Ok(mut failure) = self.failure.write() {
            *failure = None;
        }
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub updated: usize,
    pub removed: usize,
    pub demoted: usize,
    pub failed: usize,
}

/// Brings materialized placeholders in line with a changed index.
pub struct Reconciler {
    projection: Arc<GitIndexProjection>,
    provider: Arc<dyn VirtualizationInstance>,
    state: SqliteState,
    tasks: Arc<dyn TaskSink>,
}

impl Reconciler {
    pub fn new(
        projection: Arc<GitIndexProjection>,
        provider: Arc<dyn VirtualizationInstance>,
        state: SqliteState,
        tasks: Arc<dyn TaskSink>,
    ) -> Self {
        Self {
            projection,
            provider,
            state,
            tasks,
        }
    }

    /// Reconcile only if the index differs from the one last reconciled.
    pub async fn reconcile_if_changed(&self) -> Result<Option<ReconcileStats>, ProjectionError> {
        let trie = self.projection.trie()?;
        let checksum = hex(&trie.snapshot().fingerprint().checksum);
        let recorded = self.state.get_meta(INDEX_CHECKSUM_KEY).map_err(store_error)?;
        match recorded {
            Some(previous) if previous == checksum => Ok(None),
            Some(_) => self.reconcile().await.map(Some),
            None => {
                self.record(&checksum)?;
                Ok(None)
            }
        }
    }

    /// Walk every placeholder and fix what the new projection disagrees with.
    pub async fn reconcile(&self) -> Result<ReconcileStats, ProjectionError> {
        let trie = self.projection.trie()?;
        let mut stats = ReconcileStats::default();
        // Folders deleted this pass; their subtree went with them.
        let mut removed_folders: Vec<String> = Vec::new();

        for entry in self.state.get_all_entries()? {
            let path = entry.path.as_str();
            if removed_folders.iter().any(|folder| is_within(path, folder)) {
                continue;
            }
            match entry.kind {
                PlaceholderKind::File => match self.projection.get_file_info(path) {
                    Ok(file) if Some(file.id) == entry.content_id => {}
                    Ok(file) => {
                        let info = PlaceholderInfo::from(&file);
                        match self.provider.update_placeholder_if_needed(path, &info).await {
                            ProviderResult::Success => {
                                self.state.add_file(path, file.id)?;
                                stats.updated += 1;
                            }
                            result => self.failed(path, result, &mut stats)?,
                        }
                    }
                    Err(ProjectionError::PathNotFound(_)) => self.delete(path, &mut stats).await?,
                    Err(err) => return Err(err),
                },
                PlaceholderKind::PartialFolder | PlaceholderKind::ExpandedFolder => {
                    if !self.projection.is_path_projected(path)?.is_folder() {
                        self.delete(path, &mut stats).await?;
                        removed_folders.push(path.to_string());
                    } else if entry.kind == PlaceholderKind::ExpandedFolder {
                        // Children may have changed; the next enumeration rewrites them.
                        self.state.add_partial_folder(path)?;
                        stats.demoted += 1;
                    }
                }
                PlaceholderKind::PossibleTombstone => {
                    if !self.projection.is_path_projected(path)?.is_folder() {
                        self.state.remove(path)?;
                        stats.removed += 1;
                    }
                }
            }
        }

        self.record(&hex(&trie.snapshot().fingerprint().checksum))?;
        tracing::info!(
            updated = stats.updated,
            removed = stats.removed,
            demoted = stats.demoted,
            failed = stats.failed,
            "placeholders reconciled"
        );
        Ok(stats)
    }

    async fn delete(&self, path: &str, stats: &mut ReconcileStats) -> Result<(), ProjectionError> {
        match self.provider.delete_file(path).await {
            ProviderResult::Success | ProviderResult::PathNotFound => {
                self.state.remove_all_entries_for_folder(path)?;
                stats.removed += 1;
                Ok(())
            }
            result => self.failed(path, result, stats),
        }
    }

    fn failed(&self, path: &str, result: ProviderResult, stats: &mut ReconcileStats) -> Result<(), ProjectionError> {
        tracing::warn!(path, ?result, "placeholder update failed");
        stats.failed += 1;
        self.tasks
            .enqueue(gitproj_types::FileSystemTask::failed_placeholder_update(path))
    }

    fn record(&self, checksum: &str) -> Result<(), ProjectionError> {
        self.state
            .set_meta(INDEX_CHECKSUM_KEY, checksum)
            .map_err(store_error)
    }
}

#[async_trait]
impl IndexChangeListener for Reconciler {
    async fn index_changed(&self) -> Result<(), ProjectionError> {
        self.projection.invalidate();
        self.projection.reparse()?;
        self.reconcile().await.map(|_| ())
    }
}

fn store_error(err: anyhow::Error) -> ProjectionError {
    ProjectionError::Store(format!("{err:#}"))
}

/// `path` lies strictly below `folder`, ignoring case.
fn is_within(path: &str, folder: &str) -> bool {
    path.len() > folder.len() + 1
        && path.as_bytes()[folder.len()] == b'/'
        && path.is_char_boundary(folder.len())
        && names_equal(&path[..folder.len()], folder)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// One mounted enlistment.
pub struct Engine {
    config: EngineConfig,
    state: SqliteState,
    sparse: Arc<SparseFolders>,
    projection: Arc<GitIndexProjection>,
    provider: Arc<dyn VirtualizationInstance>,
    queue: Arc<TaskQueue>,
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
    health: Arc<EngineHealth>,
    shutdown: Mutex<CancellationToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Engine {
    /// Assemble an engine, opening (or creating) its state database. Nothing
    /// is parsed or registered until [`Engine::try_start`].
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn VirtualizationInstance>,
        objects: Arc<dyn GitObjectProvider>,
    ) -> Result<Self, EngineError> {
        let state = if config.persist {
            SqliteState::open(config.state_db_path())?
        } else {
            SqliteState::in_memory()?
        };
        let sparse = Arc::new(SparseFolders::load(Arc::new(state.clone()))?);
        let projection = Arc::new(GitIndexProjection::new(
            config.index_path(),
            config.projection,
            config.pool,
            Arc::clone(&sparse),
        ));
        let queue = Arc::new(TaskQueue::new(Arc::new(state.clone()), config.queue));
        let health = Arc::new(EngineHealth::new());

        let dispatcher = Dispatcher::new(
            projection.clone(),
            Arc::clone(&provider),
            objects,
            Arc::new(state.clone()),
            queue.clone(),
        )
        .with_health(Arc::clone(&health))
        .with_chunk_size(config.hydration_chunk_size);

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&projection),
            Arc::clone(&provider),
            state.clone(),
            queue.clone(),
        ));

        Ok(Self {
            config,
            state,
            sparse,
            projection,
            provider,
            queue,
            dispatcher: Arc::new(dispatcher),
            reconciler,
            health,
            shutdown: Mutex::new(CancellationToken::new()),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Parse the index, reconcile, register with the OS and start the queue
    /// worker. A corrupt index leaves the engine degraded and unstarted.
    pub async fn try_start(&self) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyRunning);
        }
        let started = self.start_inner().await;
        if started.is_err() {
            self.running.store(false, Ordering::Release);
        }
        started
    }

    async fn start_inner(&self) -> Result<(), EngineError> {
        let trie = match self.projection.reparse() {
            Ok(trie) => trie,
            Err(err) => {
                if !err.is_recoverable() {
                    self.health.degrade(err.clone());
                }
                return Err(err.into());
            }
        };
        let stats = trie.stats();
        tracing::info!(
            enlistment = %self.config.name,
            entries = stats.entries,
            version = stats.version,
            "index loaded"
        );

        self.reconciler.reconcile_if_changed().await?;

        // Tokens from a previous run are already cancelled.
        let shutdown = CancellationToken::new();
        self.dispatcher.rearm(shutdown.child_token());
        if let Ok(mut current) = self.shutdown.lock() {
            *current = shutdown.clone();
        }

        let callbacks: Arc<dyn VirtualizationCallbacks> = self.dispatcher.clone();
        match self.provider.start_virtualizing(callbacks).await {
            ProviderResult::Success => {}
            other => return Err(EngineError::ProviderStart(other)),
        }

        let applier = TaskApplier::new(
            self.projection.clone(),
            Arc::new(self.state.clone()),
            Arc::new(self.state.clone()),
            Arc::clone(&self.sparse),
            self.reconciler.clone(),
        );
        let handle = self.queue.spawn_worker(
            Arc::new(applier),
            Arc::clone(&self.health),
            shutdown.child_token(),
        );
        if let Ok(mut worker) = self.worker.lock() {
            *worker = Some(handle);
        }
        tracing::info!(enlistment = %self.config.name, "virtualization started");
        Ok(())
    }

    /// Cancel in-flight commands, unregister from the OS, and stop the
    /// worker after its current task.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.dispatcher.shutdown();
        if let Ok(shutdown) = self.shutdown.lock() {
            shutdown.cancel();
        }
        self.provider.stop_virtualizing().await;
        let handle = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "task worker ended abnormally");
        }
        tracing::info!(enlistment = %self.config.name, "virtualization stopped");
    }

    /// The next projection read reparses the index.
    pub fn invalidate_projection(&self) {
        self.projection.invalidate();
    }

    pub fn is_projection_parse_complete(&self) -> bool {
        self.projection.is_parse_complete()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_degraded(&self) -> bool {
        self.health.is_degraded()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &SqliteState {
        &self.state
    }

    pub fn sparse(&self) -> &Arc<SparseFolders> {
        &self.sparse
    }

    pub fn projection(&self) -> &Arc<GitIndexProjection> {
        &self.projection
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn health(&self) -> &Arc<EngineHealth> {
        &self.health
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.config.name)
            .field("root", &self.config.enlistment_root)
            .field("running", &self.is_running())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}
