//! Test doubles for gitproj.
//!
//! - [`IndexBuilder`]: writes real Git index bytes (v2, v3, v4)
//! - [`TestEnlistment`]: a temporary working directory with `.git/index`
//! - [`RecordingProvider`]: a fake OS virtualization provider
//! - [`MemoryGitObjects`]: an in-memory Git object store
//! - [`StaticProjection`]: a projection over a hand-written tree
//! - [`RecordingTaskSink`]: collects enqueued tasks

pub mod index;
pub mod objects;
pub mod projection;
pub mod provider;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use gitproj_kernel::queue::TaskSink;
use gitproj_types::{FileSystemTask, ProjectionError};

pub use index::IndexBuilder;
pub use objects::MemoryGitObjects;
pub use projection::StaticProjection;
pub use provider::{ProviderCall, RecordingProvider};

/// A [`TaskSink`] that keeps tasks in memory.
#[derive(Default)]
pub struct RecordingTaskSink {
    tasks: Mutex<Vec<FileSystemTask>>,
    failing: AtomicBool,
}

impl RecordingTaskSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every enqueue fail as if the durable write did.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn tasks(&self) -> Vec<FileSystemTask> {
        self.tasks
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }
}

impl TaskSink for RecordingTaskSink {
    fn enqueue(&self, task: FileSystemTask) -> Result<(), ProjectionError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProjectionError::Store("queue unavailable".into()));
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
        Ok(())
    }
}

/// A temporary enlistment: `<tmp>/.git/index` written from a builder.
pub struct TestEnlistment {
    dir: tempfile::TempDir,
}

impl TestEnlistment {
    pub fn new(index: &IndexBuilder) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join(".git"))?;
        let enlistment = Self { dir };
        enlistment.write_index(index)?;
        Ok(enlistment)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.path().join(".git").join("index")
    }

    /// Replace the index, as `git` would after a checkout.
    pub fn write_index(&self, index: &IndexBuilder) -> std::io::Result<()> {
        self.write_index_bytes(&index.build())
    }

    pub fn write_index_bytes(&self, bytes: &[u8]) -> std::io::Result<()> {
        let tmp = self.dir.path().join(".git").join("index.lock");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, self.index_path())
    }

    /// Where a persistent state database for this enlistment can live.
    pub fn state_db_path(&self) -> PathBuf {
        self.dir.path().join(".gitproj").join("state.db")
    }
}
