//! Engine configuration.
//!
//! Every field has a default, so a config file only names what it changes:
//!
//! ```toml
//! projection = "full"
//! hydration_chunk_size = 131072
//!
//! [queue]
//! max_backoff_ms = 10000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pool::PoolConfig;
use crate::state::paths;

/// Default size of one `write_file_contents` call during hydration.
pub const DEFAULT_HYDRATION_CHUNK_SIZE: usize = 64 * 1024;

/// How much of the index a parse builds up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMode {
    /// Build the whole trie at parse time.
    Full,
    /// Build the root only; each folder is decoded on first access.
    #[default]
    Lazy,
}

/// Background queue retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 50,
            max_backoff_ms: 5_000,
        }
    }
}

impl QueueConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for one mounted enlistment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enlistment name, used for the state database file name.
    pub name: String,
    /// Root of the virtualized working directory (contains `.git`).
    pub enlistment_root: PathBuf,
    /// Explicit state database path. Defaults to the XDG data dir.
    pub state_db: Option<PathBuf>,
    /// Keep state in SQLite on disk. In-memory when false.
    pub persist: bool,
    pub projection: ProjectionMode,
    pub hydration_chunk_size: usize,
    pub pool: PoolConfig,
    pub queue: QueueConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            enlistment_root: PathBuf::from("."),
            state_db: None,
            persist: true,
            projection: ProjectionMode::default(),
            hydration_chunk_size: DEFAULT_HYDRATION_CHUNK_SIZE,
            pool: PoolConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Config that keeps all state in memory.
    pub fn transient(root: impl Into<PathBuf>) -> Self {
        Self {
            name: "transient".to_string(),
            enlistment_root: root.into(),
            persist: false,
            ..Default::default()
        }
    }

    /// Config persisting state under the enlistment's directory name.
    pub fn persistent(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string());
        Self {
            name,
            enlistment_root: root,
            persist: true,
            ..Default::default()
        }
    }

    /// Read a TOML config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok(config)
    }

    /// Load the default config file if there is one.
    pub fn load_default() -> Result<Option<Self>> {
        let path = paths::config_file();
        if !path.exists() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }

    pub fn git_dir(&self) -> PathBuf {
        self.enlistment_root.join(".git")
    }

    pub fn index_path(&self) -> PathBuf {
        self.git_dir().join("index")
    }

    /// Where the state database lives when `persist` is set.
    pub fn state_db_path(&self) -> PathBuf {
        self.state_db
            .clone()
            .unwrap_or_else(|| paths::enlistment_db(&self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            name = "os"
            projection = "full"

            [queue]
            max_backoff_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "os");
        assert_eq!(config.projection, ProjectionMode::Full);
        assert_eq!(config.queue.max_backoff_ms, 100);
        assert_eq!(config.queue.initial_backoff_ms, 50);
        assert_eq!(config.hydration_chunk_size, DEFAULT_HYDRATION_CHUNK_SIZE);
        assert_eq!(config.pool, PoolConfig::default());
        assert!(config.persist);
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "projection = \"sideways\"").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let queue = QueueConfig {
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
        };
        assert_eq!(queue.backoff(1), Duration::from_millis(10));
        assert_eq!(queue.backoff(2), Duration::from_millis(20));
        assert_eq!(queue.backoff(4), Duration::from_millis(80));
        assert_eq!(queue.backoff(5), Duration::from_millis(100));
        assert_eq!(queue.backoff(60), Duration::from_millis(100));
    }

    #[test]
    fn test_persistent_names_after_root() {
        let config = EngineConfig::persistent("/src/os");
        assert_eq!(config.name, "os");
        assert_eq!(config.index_path(), PathBuf::from("/src/os/.git/index"));
        assert!(config.state_db_path().ends_with("enlistments/os.db"));
    }

    #[test]
    fn test_transient_is_in_memory() {
        let config = EngineConfig::transient("/tmp/x");
        assert!(!config.persist);
        assert_eq!(config.projection, ProjectionMode::Lazy);
    }
}
