//! Enlistment state persistence.
//!
//! Everything the engine must remember across a restart lives in one SQLite
//! database per enlistment:
//! - Placeholders (what the OS has materialized)
//! - Sparse folder markers
//! - Modified paths (what the working directory now owns)
//! - The durable task queue
//!
//! State is stored at `$XDG_DATA_HOME/gitproj/enlistments/{name}.db`.
//!
//! The engine talks to the stores through the traits below, so tests can
//! swap in anything that keeps the same contracts. [`SqliteState`]
//! implements all of them over one shared connection.

pub mod paths;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use gitproj_types::{ObjectId, PlaceholderEntry, PlaceholderKind, ProjectionError, SparseMarker};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

/// Schema SQL embedded from schema/state.sql.
const SCHEMA_SQL: &str = include_str!("../../../../schema/state.sql");

/// Placeholder bookkeeping. A path has at most one entry; every add
/// replaces whatever was there.
pub trait PlaceholderStore: Send + Sync {
    fn add_file(&self, path: &str, content_id: ObjectId) -> Result<(), ProjectionError>;
    fn add_partial_folder(&self, path: &str) -> Result<(), ProjectionError>;
    fn add_expanded_folder(&self, path: &str) -> Result<(), ProjectionError>;
    fn add_possible_tombstone_folder(&self, path: &str) -> Result<(), ProjectionError>;
    /// No-op if absent.
    fn remove(&self, path: &str) -> Result<(), ProjectionError>;
    /// Remove `path` and everything below it.
    fn remove_all_entries_for_folder(&self, path: &str) -> Result<(), ProjectionError>;
    fn get(&self, path: &str) -> Result<Option<PlaceholderEntry>, ProjectionError>;
    fn get_all_file_paths(&self) -> Result<Vec<String>, ProjectionError>;
    fn get_all_entries(&self) -> Result<Vec<PlaceholderEntry>, ProjectionError>;
    fn get_count(&self) -> Result<u64, ProjectionError>;
}

pub trait SparseStore: Send + Sync {
    fn set_marker(&self, path: &str, marker: SparseMarker) -> Result<(), ProjectionError>;
    fn remove_marker(&self, path: &str) -> Result<(), ProjectionError>;
    fn get_all_markers(&self) -> Result<Vec<(String, SparseMarker)>, ProjectionError>;
}

/// Folder paths are recorded with a trailing `/`.
pub trait ModifiedPathsStore: Send + Sync {
    /// Returns whether the path was newly added.
    fn add_modified(&self, path: &str) -> Result<bool, ProjectionError>;
    fn is_modified(&self, path: &str) -> Result<bool, ProjectionError>;
    fn get_all_modified(&self) -> Result<Vec<String>, ProjectionError>;
}

/// One persisted, not yet acknowledged queue row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRow {
    pub id: i64,
    pub payload: String,
}

/// Durable FIFO storage for the background queue.
pub trait TaskStore: Send + Sync {
    /// Persist a payload. Durable once this returns.
    fn append_task(&self, payload: &str) -> Result<i64, ProjectionError>;
    fn oldest_task(&self) -> Result<Option<QueuedRow>, ProjectionError>;
    fn delete_task(&self, id: i64) -> Result<(), ProjectionError>;
    fn pending_tasks(&self) -> Result<Vec<QueuedRow>, ProjectionError>;
    fn task_count(&self) -> Result<u64, ProjectionError>;
}

fn store_error(err: anyhow::Error) -> ProjectionError {
    ProjectionError::Store(format!("{err:#}"))
}

/// SQLite-backed implementation of every store.
///
/// Cheap to clone; clones share the connection. The lock is held for one
/// statement at a time.
#[derive(Clone)]
pub struct SqliteState {
    /// Wrapped in Mutex because rusqlite Connection is not Sync.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteState {
    /// Open or create a state database at the given path.
    ///
    /// Creates parent directories and initializes schema if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory: {}", parent.display()))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening state database: {}", path.display()))?;
        conn.pragma_update(None, "synchronous", "FULL")
            .context("setting synchronous mode")?;

        Self::with_connection(conn)
    }

    /// Create an in-memory state store (for testing or transient engines).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("creating in-memory state database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("initializing state schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("failed to lock state store: {}", e))
    }

    // ================================================================
    // Meta
    // ================================================================

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .with_context(|| format!("loading meta: {}", key))
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .with_context(|| format!("saving meta: {}", key))?;
        Ok(())
    }

    // ================================================================
    // Placeholders
    // ================================================================

    fn put_placeholder(&self, path: &str, kind: PlaceholderKind, content_id: Option<ObjectId>) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO placeholders (path, kind, content_id) VALUES (?1, ?2, ?3)",
                params![path, kind.as_i64(), content_id.map(|id| id.to_hex())],
            )
            .with_context(|| format!("saving placeholder: {}", path))?;
        Ok(())
    }

    fn delete_placeholder(&self, path: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM placeholders WHERE path = ?1", params![path])
            .with_context(|| format!("deleting placeholder: {}", path))?;
        Ok(())
    }

    fn delete_placeholder_tree(&self, path: &str) -> Result<()> {
        let conn = self.conn()?;
        if path.is_empty() {
            conn.execute("DELETE FROM placeholders", [])
                .context("deleting all placeholders")?;
            return Ok(());
        }
        conn.execute(
            "DELETE FROM placeholders WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'",
            params![path, format!("{}/%", escape_like(path))],
        )
        .with_context(|| format!("deleting placeholders under: {}", path))?;
        Ok(())
    }

    fn load_placeholder(&self, path: &str) -> Result<Option<PlaceholderEntry>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT path, kind, content_id FROM placeholders WHERE path = ?1",
                params![path],
                placeholder_row,
            )
            .optional()
            .with_context(|| format!("loading placeholder: {}", path))?;
        row.map(decode_placeholder).transpose()
    }

    fn load_placeholders(&self, files_only: bool) -> Result<Vec<PlaceholderEntry>> {
        let conn = self.conn()?;
        let sql = if files_only {
            "SELECT path, kind, content_id FROM placeholders WHERE kind = 0 ORDER BY path"
        } else {
            "SELECT path, kind, content_id FROM placeholders ORDER BY path"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], placeholder_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("loading placeholders")?;
        rows.into_iter().map(decode_placeholder).collect()
    }

    fn count_placeholders(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM placeholders", [], |row| row.get(0))
            .context("counting placeholders")?;
        Ok(count as u64)
    }

    // ================================================================
    // Sparse folders
    // ================================================================

    fn put_marker(&self, path: &str, marker: SparseMarker) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO sparse_folders (path, marker) VALUES (?1, ?2)",
                params![path, marker.as_i64()],
            )
            .with_context(|| format!("saving sparse marker: {}", path))?;
        Ok(())
    }

    fn delete_marker(&self, path: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM sparse_folders WHERE path = ?1", params![path])
            .with_context(|| format!("deleting sparse marker: {}", path))?;
        Ok(())
    }

    fn load_markers(&self) -> Result<Vec<(String, SparseMarker)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT path, marker FROM sparse_folders ORDER BY path")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("loading sparse markers")?;
        rows.into_iter()
            .map(|(path, raw)| {
                let marker = SparseMarker::from_i64(raw)
                    .with_context(|| format!("unknown sparse marker {} for {}", raw, path))?;
                Ok((path, marker))
            })
            .collect()
    }

    // ================================================================
    // Modified paths
    // ================================================================

    fn insert_modified(&self, path: &str) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO modified_paths (path) VALUES (?1)",
                params![path],
            )
            .with_context(|| format!("saving modified path: {}", path))?;
        Ok(changed > 0)
    }

    fn contains_modified(&self, path: &str) -> Result<bool> {
        let found = self
            .conn()?
            .query_row(
                "SELECT 1 FROM modified_paths WHERE path = ?1",
                params![path],
                |_| Ok(()),
            )
            .optional()
            .with_context(|| format!("loading modified path: {}", path))?;
        Ok(found.is_some())
    }

    fn load_modified(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT path FROM modified_paths ORDER BY path")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()
            .context("loading modified paths")?;
        Ok(paths)
    }

    // ================================================================
    // Task queue
    // ================================================================

    fn insert_task(&self, payload: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO task_queue (payload) VALUES (?1)", params![payload])
            .context("appending queued task")?;
        Ok(conn.last_insert_rowid())
    }

    fn first_task(&self) -> Result<Option<QueuedRow>> {
        self.conn()?
            .query_row(
                "SELECT id, payload FROM task_queue ORDER BY id LIMIT 1",
                [],
                |row| {
                    Ok(QueuedRow {
                        id: row.get(0)?,
                        payload: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("loading oldest queued task")
    }

    fn remove_task(&self, id: i64) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM task_queue WHERE id = ?1", params![id])
            .with_context(|| format!("acknowledging queued task {}", id))?;
        Ok(())
    }

    fn load_tasks(&self) -> Result<Vec<QueuedRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, payload FROM task_queue ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(QueuedRow {
                    id: row.get(0)?,
                    payload: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("loading queued tasks")?;
        Ok(rows)
    }

    fn count_tasks(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM task_queue", [], |row| row.get(0))
            .context("counting queued tasks")?;
        Ok(count as u64)
    }
}

type PlaceholderRow = (String, i64, Option<String>);

fn placeholder_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlaceholderRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode_placeholder((path, kind, content_id): PlaceholderRow) -> Result<PlaceholderEntry> {
    let kind = PlaceholderKind::from_i64(kind)
        .with_context(|| format!("unknown placeholder kind {} for {}", kind, path))?;
    let content_id = content_id
        .map(|hex| ObjectId::from_hex(&hex))
        .transpose()
        .with_context(|| format!("bad content id for {}", path))?;
    Ok(PlaceholderEntry {
        path,
        kind,
        content_id,
    })
}

fn escape_like(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl PlaceholderStore for SqliteState {
    fn add_file(&self, path: &str, content_id: ObjectId) -> Result<(), ProjectionError> {
        self.put_placeholder(path, PlaceholderKind::File, Some(content_id))
            .map_err(store_error)
    }

    fn add_partial_folder(&self, path: &str) -> Result<(), ProjectionError> {
        self.put_placeholder(path, PlaceholderKind::PartialFolder, None)
            .map_err(store_error)
    }

    fn add_expanded_folder(&self, path: &str) -> Result<(), ProjectionError> {
        self.put_placeholder(path, PlaceholderKind::ExpandedFolder, None)
            .map_err(store_error)
    }

    fn add_possible_tombstone_folder(&self, path: &str) -> Result<(), ProjectionError> {
        self.put_placeholder(path, PlaceholderKind::PossibleTombstone, None)
            .map_err(store_error)
    }

    fn remove(&self, path: &str) -> Result<(), ProjectionError> {
        self.delete_placeholder(path).map_err(store_error)
    }

    fn remove_all_entries_for_folder(&self, path: &str) -> Result<(), ProjectionError> {
        self.delete_placeholder_tree(path).map_err(store_error)
    }

    fn get(&self, path: &str) -> Result<Option<PlaceholderEntry>, ProjectionError> {
        self.load_placeholder(path).map_err(store_error)
    }

    fn get_all_file_paths(&self) -> Result<Vec<String>, ProjectionError> {
        self.load_placeholders(true)
            .map(|entries| entries.into_iter().map(|e| e.path).collect())
            .map_err(store_error)
    }

    fn get_all_entries(&self) -> Result<Vec<PlaceholderEntry>, ProjectionError> {
        self.load_placeholders(false).map_err(store_error)
    }

    fn get_count(&self) -> Result<u64, ProjectionError> {
        self.count_placeholders().map_err(store_error)
    }
}

impl SparseStore for SqliteState {
    fn set_marker(&self, path: &str, marker: SparseMarker) -> Result<(), ProjectionError> {
        self.put_marker(path, marker).map_err(store_error)
    }

    fn remove_marker(&self, path: &str) -> Result<(), ProjectionError> {
        self.delete_marker(path).map_err(store_error)
    }

    fn get_all_markers(&self) -> Result<Vec<(String, SparseMarker)>, ProjectionError> {
        self.load_markers().map_err(store_error)
    }
}

impl ModifiedPathsStore for SqliteState {
    fn add_modified(&self, path: &str) -> Result<bool, ProjectionError> {
        self.insert_modified(path).map_err(store_error)
    }

    fn is_modified(&self, path: &str) -> Result<bool, ProjectionError> {
        self.contains_modified(path).map_err(store_error)
    }

    fn get_all_modified(&self) -> Result<Vec<String>, ProjectionError> {
        self.load_modified().map_err(store_error)
    }
}

impl TaskStore for SqliteState {
    fn append_task(&self, payload: &str) -> Result<i64, ProjectionError> {
        self.insert_task(payload).map_err(store_error)
    }

    fn oldest_task(&self) -> Result<Option<QueuedRow>, ProjectionError> {
        self.first_task().map_err(store_error)
    }

    fn delete_task(&self, id: i64) -> Result<(), ProjectionError> {
        self.remove_task(id).map_err(store_error)
    }

    fn pending_tasks(&self) -> Result<Vec<QueuedRow>, ProjectionError> {
        self.load_tasks().map_err(store_error)
    }

    fn task_count(&self) -> Result<u64, ProjectionError> {
        self.count_tasks().map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(byte: u8) -> ObjectId {
        ObjectId::new([byte; 20])
    }

    #[test]
    fn test_one_entry_per_path() {
        let store = SqliteState::in_memory().unwrap();
        store.add_partial_folder("src").unwrap();
        store.add_expanded_folder("SRC").unwrap();
        assert_eq!(store.get_count().unwrap(), 1);
        let entry = store.get("src").unwrap().unwrap();
        assert_eq!(entry.kind, PlaceholderKind::ExpandedFolder);
    }

    #[test]
    fn test_file_placeholder_keeps_content_id() {
        let store = SqliteState::in_memory().unwrap();
        store.add_file("a.txt", oid(7)).unwrap();
        let entry = store.get("A.TXT").unwrap().unwrap();
        assert_eq!(entry.content_id, Some(oid(7)));
        assert_eq!(store.get_all_file_paths().unwrap(), ["a.txt"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = SqliteState::in_memory().unwrap();
        store.add_file("a", oid(1)).unwrap();
        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.get_count().unwrap(), 0);
    }

    #[test]
    fn test_remove_folder_tree_spares_siblings() {
        let store = SqliteState::in_memory().unwrap();
        store.add_expanded_folder("dir").unwrap();
        store.add_file("dir/a", oid(1)).unwrap();
        store.add_file("Dir/sub/b", oid(2)).unwrap();
        store.add_file("dir2/c", oid(3)).unwrap();
        store.add_file("dir_x", oid(4)).unwrap();

        store.remove_all_entries_for_folder("dir").unwrap();
        let left: Vec<_> = store
            .get_all_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(left, ["dir2/c", "dir_x"]);
    }

    #[test]
    fn test_sparse_markers_round_trip() {
        let store = SqliteState::in_memory().unwrap();
        store.set_marker("docs", SparseMarker::Excluded).unwrap();
        store.set_marker("docs/api", SparseMarker::Included).unwrap();
        store.remove_marker("nothing").unwrap();
        assert_eq!(
            store.get_all_markers().unwrap(),
            [
                ("docs".to_string(), SparseMarker::Excluded),
                ("docs/api".to_string(), SparseMarker::Included),
            ]
        );
    }

    #[test]
    fn test_modified_paths_add_once() {
        let store = SqliteState::in_memory().unwrap();
        assert!(store.add_modified("a.txt").unwrap());
        assert!(!store.add_modified("A.TXT").unwrap());
        assert!(store.is_modified("a.txt").unwrap());
        assert_eq!(store.get_all_modified().unwrap(), ["a.txt"]);
    }

    #[test]
    fn test_task_queue_is_fifo_and_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let store = SqliteState::open(&path).unwrap();
            let first = store.append_task("one").unwrap();
            store.append_task("two").unwrap();
            assert_eq!(store.oldest_task().unwrap().unwrap().id, first);
            store.delete_task(first).unwrap();
        }
        let store = SqliteState::open(&path).unwrap();
        let pending = store.pending_tasks().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload, "two");
        assert_eq!(store.task_count().unwrap(), 1);
    }

    #[test]
    fn test_meta() {
        let store = SqliteState::in_memory().unwrap();
        assert_eq!(store.get_meta("schema_version").unwrap().as_deref(), Some("1"));
        store.set_meta("index_checksum", "abc").unwrap();
        assert_eq!(store.get_meta("index_checksum").unwrap().as_deref(), Some("abc"));
    }
}
