//! Subcommands. Each one opens just what it needs: the projection for
//! `ls`/`stat`/`check`, the state database for `queue`/`placeholders`.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gitproj_kernel::index::ParseStats;
use gitproj_kernel::projection::{
    FileNode, GitIndexProjection, PathKind, ProjectedItem, Projection, SparseFolders, normalize_path,
};
use gitproj_kernel::state::{ModifiedPathsStore, PlaceholderStore};
use gitproj_kernel::{EngineConfig, ProjectionMode, SqliteState, TaskQueue};
use gitproj_types::{FileSystemTask, PlaceholderEntry, PlaceholderKind};

#[derive(Debug, Parser)]
#[command(name = "gitproj", version, about = "Inspect a gitproj enlistment")]
pub struct Cli {
    /// Enlistment root (the directory containing .git).
    #[arg(short = 'C', long, global = true)]
    pub root: Option<PathBuf>,

    /// Config file. Defaults to $XDG_CONFIG_HOME/gitproj/config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// State database, overriding the config.
    #[arg(long, global = true)]
    pub state_db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the projected children of a folder.
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Show how one path is projected and what the state store knows of it.
    Stat { path: String },
    /// Parse the whole index and report what it contains.
    Check,
    /// Show tasks waiting in the durable queue.
    Queue {
        #[arg(long)]
        json: bool,
    },
    /// Show recorded placeholders.
    Placeholders {
        #[arg(long)]
        json: bool,
    },
}

pub fn run(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    tracing::debug!(root = %config.enlistment_root.display(), name = %config.name, "enlistment");
    let out = match &cli.command {
        Command::Ls { path } => ls(&config, path)?,
        Command::Stat { path } => stat(&config, path)?,
        Command::Check => check(&config)?,
        Command::Queue { json } => queue(&config, *json)?,
        Command::Placeholders { json } => placeholders(&config, *json)?,
    };
    print!("{out}");
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => match EngineConfig::load_default()? {
            Some(config) => config,
            None => {
                let root = cli.root.clone().unwrap_or_else(|| PathBuf::from("."));
                let root = std::fs::canonicalize(&root)
                    .with_context(|| format!("resolving enlistment root: {}", root.display()))?;
                EngineConfig::persistent(root)
            }
        },
    };
    if let Some(root) = &cli.root {
        config.enlistment_root = root.clone();
    }
    if let Some(db) = &cli.state_db {
        config.state_db = Some(db.clone());
    }
    Ok(config)
}

/// The state database if it exists; an empty in-memory one otherwise.
fn open_state(config: &EngineConfig, must_exist: bool) -> Result<SqliteState> {
    let path = config.state_db_path();
    if path.exists() {
        return SqliteState::open(&path);
    }
    if must_exist {
        bail!("no state database at {}", path.display());
    }
    SqliteState::in_memory()
}

fn open_projection(config: &EngineConfig, mode: ProjectionMode) -> Result<(SqliteState, GitIndexProjection)> {
    let state = open_state(config, false)?;
    let sparse = Arc::new(SparseFolders::load(Arc::new(state.clone()))?);
    let projection = GitIndexProjection::new(config.index_path(), mode, config.pool, sparse);
    Ok((state, projection))
}

fn ls(config: &EngineConfig, path: &str) -> Result<String> {
    let (_state, projection) = open_projection(config, config.projection)?;
    let path = normalize_path(path)?;
    let items = projection
        .get_projected_items(&path)
        .with_context(|| format!("listing {path:?}"))?;
    Ok(render_listing(&items))
}

fn stat(config: &EngineConfig, path: &str) -> Result<String> {
    let (state, projection) = open_projection(config, config.projection)?;
    let path = normalize_path(path)?;
    let kind = projection.is_path_projected(&path)?;
    let file = match kind {
        PathKind::File => Some(projection.get_file_info(&path)?),
        _ => None,
    };
    let sparse = kind.is_folder().then(|| projection.get_folder_sparse_state(&path));
    let placeholder = state.get(&path)?;
    let modified = state.is_modified(&path)?;

    let mut out = String::new();
    let _ = writeln!(out, "path:        {path}");
    let _ = writeln!(out, "projected:   {kind:?}");
    if let Some(file) = &file {
        render_file(&mut out, file);
    }
    if let Some(sparse) = sparse {
        let _ = writeln!(out, "sparse:      {sparse:?}");
    }
    match placeholder {
        Some(entry) => {
            let _ = writeln!(out, "placeholder: {:?}", entry.kind);
        }
        None => {
            let _ = writeln!(out, "placeholder: none");
        }
    }
    let _ = writeln!(out, "modified:    {modified}");
    Ok(out)
}

fn check(config: &EngineConfig) -> Result<String> {
    let (_state, projection) = open_projection(config, ProjectionMode::Full)?;
    let trie = projection
        .trie()
        .with_context(|| format!("parsing {}", config.index_path().display()))?;
    Ok(render_stats(trie.stats()))
}

fn queue(config: &EngineConfig, json: bool) -> Result<String> {
    let state = open_state(config, true)?;
    let queue = TaskQueue::new(Arc::new(state), config.queue);
    let pending = queue.pending()?;
    if json {
        let mut out = String::new();
        for (_, task) in &pending {
            out.push_str(&serde_json::to_string(task)?);
            out.push('\n');
        }
        return Ok(out);
    }
    Ok(render_tasks(&pending))
}

fn placeholders(config: &EngineConfig, json: bool) -> Result<String> {
    let state = open_state(config, true)?;
    let entries = state.get_all_entries()?;
    if json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&entries)?));
    }
    Ok(render_placeholders(&entries))
}

fn render_file(out: &mut String, file: &FileNode) {
    let _ = writeln!(out, "kind:        {:?}", file.kind());
    let _ = writeln!(out, "mode:        {}", file.mode);
    let _ = writeln!(out, "size:        {}", file.size);
    let _ = writeln!(out, "blob:        {}", file.id);
}

/// One line per child, folders marked with a trailing `/`.
pub fn render_listing(items: &[ProjectedItem]) -> String {
    let mut out = String::new();
    for item in items {
        let _ = match item {
            ProjectedItem::Folder { name } => writeln!(out, "{:<6} {:>10}  {name}/", "tree", "-"),
            ProjectedItem::File(file) => writeln!(out, "{} {:>10}  {}", file.mode, file.size, file.name),
        };
    }
    out
}

pub fn render_stats(stats: &ParseStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "version:        {}", stats.version);
    let _ = writeln!(out, "entries:        {}", stats.entries);
    let _ = writeln!(out, "files:          {}", stats.files);
    let _ = writeln!(out, "folders:        {}", stats.folders);
    let _ = writeln!(out, "skip-worktree:  {}", stats.skip_worktree);
    let _ = writeln!(out, "conflict extra: {}", stats.skipped_stages);
    let _ = writeln!(out, "case collisions:{:>2}", stats.collisions);
    out
}

pub fn render_tasks(tasks: &[(i64, FileSystemTask)]) -> String {
    if tasks.is_empty() {
        return "queue empty\n".to_string();
    }
    let mut out = String::new();
    for (id, task) in tasks {
        let _ = match task.old_path() {
            Some(old) => writeln!(out, "{id:>6}  {:<32} {old} -> {}", task.operation(), task.path()),
            None => writeln!(out, "{id:>6}  {:<32} {}", task.operation(), task.path()),
        };
    }
    out
}

pub fn render_placeholders(entries: &[PlaceholderEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let kind = match entry.kind {
            PlaceholderKind::File => "file",
            PlaceholderKind::PartialFolder => "partial",
            PlaceholderKind::ExpandedFolder => "expanded",
            PlaceholderKind::PossibleTombstone => "tombstone",
        };
        let _ = match &entry.content_id {
            Some(id) => writeln!(out, "{kind:<9}  {}  {}", entry.path, id),
            None => writeln!(out, "{kind:<9}  {}", entry.path),
        };
    }
    out
}
