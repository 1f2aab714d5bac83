//! Index → trie.
//!
//! Both modes decode every entry once, so any corruption fails the parse
//! before a single recorded offset is trusted:
//!
//! - **Full**: entries land in pooled records and pooled pending folders,
//!   which are then frozen into an eagerly expanded trie.
//! - **Lazy**: only the root is created, holding a cursor at the first
//!   entry. Each folder decodes its immediate children from its own ranges
//!   the first time it is read (see [`read_folder`]), creating child folders
//!   with cursors but without expanding them.
//!
//! Conflict stages after the first entry of a path are skipped. Gitlinks
//! become empty folders. A name that collides case-insensitively with an
//! earlier sibling is dropped, except that colliding folders merge.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Instant;

use gitproj_types::ProjectionError;

use super::entry::{EntryKind, IndexEntry};
use super::reader::{self, IndexCursor};
use super::IndexSnapshot;
use crate::config::ProjectionMode;
use crate::pool::{ObjectPool, PoolConfig, PoolSlot};
use crate::projection::names::fold_into;
use crate::projection::trie::{
    FileNode, FolderContents, FolderNode, FolderRange, ProjectedItem, ProjectionTrie,
};

/// What a parse saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub mode: ProjectionMode,
    pub version: u32,
    pub entries: u32,
    /// Files and folders built. Only counts the root in lazy mode.
    pub files: usize,
    pub folders: usize,
    pub skipped_stages: usize,
    pub collisions: usize,
    pub skip_worktree: usize,
}

#[derive(Debug, Clone, Copy)]
enum PendingChild {
    File(PoolSlot),
    Folder(PoolSlot),
}

#[derive(Debug, Default)]
struct PendingFolder {
    name: String,
    path: String,
    /// Folded name → child.
    children: HashMap<String, PendingChild>,
    gitlink: bool,
}

impl PendingFolder {
    fn reset(&mut self) {
        self.name.clear();
        self.path.clear();
        self.children.clear();
        self.gitlink = false;
    }
}

/// Builds tries from index snapshots. Owns the pools; one parse at a time.
pub struct IndexParser {
    pool_config: PoolConfig,
    entries: Option<ObjectPool<IndexEntry>>,
    folders: Option<ObjectPool<PendingFolder>>,
    scratch: IndexEntry,
    last_path: String,
    key: String,
    parses: u64,
}

impl IndexParser {
    pub fn new(pool_config: PoolConfig) -> Self {
        Self {
            pool_config,
            entries: None,
            folders: None,
            scratch: IndexEntry::default(),
            last_path: String::new(),
            key: String::new(),
            parses: 0,
        }
    }

    /// Completed parses so far.
    pub fn parses(&self) -> u64 {
        self.parses
    }

    /// Current backing sizes of the entry and folder pools.
    pub fn pool_sizes(&self) -> (usize, usize) {
        (
            self.entries.as_ref().map_or(0, ObjectPool::size),
            self.folders.as_ref().map_or(0, ObjectPool::size),
        )
    }

    pub fn parse(
        &mut self,
        snapshot: Arc<IndexSnapshot>,
        mode: ProjectionMode,
    ) -> Result<ProjectionTrie, ProjectionError> {
        let started = Instant::now();
        let header = snapshot.header();
        tracing::debug!(version = header.version, entries = header.entry_count, ?mode, "parsing git index");

        let result = match mode {
            ProjectionMode::Full => self.parse_full(&snapshot),
            ProjectionMode::Lazy => self.parse_lazy(&snapshot),
        };
        let (root, stats) = match result {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::error!(error = %err, "git index is corrupt");
                return Err(err);
            }
        };

        self.parses += 1;
        tracing::info!(
            version = stats.version,
            entries = stats.entries,
            files = stats.files,
            folders = stats.folders,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ?mode,
            "parsed git index"
        );
        Ok(ProjectionTrie::new(root, snapshot, stats))
    }

    fn parse_lazy(
        &mut self,
        snapshot: &IndexSnapshot,
    ) -> Result<(Arc<FolderNode>, ParseStats), ProjectionError> {
        let mut stats = ParseStats {
            mode: ProjectionMode::Lazy,
            version: snapshot.header().version,
            ..Default::default()
        };
        let mut decoder = snapshot.decoder();
        self.last_path.clear();
        while decoder.read_into(&mut self.scratch)? {
            stats.entries += 1;
            if self.scratch.skip_worktree {
                stats.skip_worktree += 1;
            }
            if self.scratch.path == self.last_path {
                stats.skipped_stages += 1;
            }
            self.last_path.clone_from(&self.scratch.path);
        }
        finish(snapshot, decoder.position())?;

        stats.folders = 1;
        let root = FolderNode::lazy(
            String::new(),
            String::new(),
            vec![FolderRange {
                cursor: IndexCursor::start(),
                prefix: String::new(),
            }],
        );
        Ok((Arc::new(root), stats))
    }

    fn parse_full(
        &mut self,
        snapshot: &IndexSnapshot,
    ) -> Result<(Arc<FolderNode>, ParseStats), ProjectionError> {
        let header = snapshot.header();
        let mut stats = ParseStats {
            mode: ProjectionMode::Full,
            version: header.version,
            ..Default::default()
        };

        let config = self.pool_config;
        let entries = self
            .entries
            .get_or_insert_with(|| ObjectPool::with_config(header.entry_count as usize, config));
        let folders = self
            .folders
            .get_or_insert_with(|| ObjectPool::with_config(config.min_size, config));
        entries.free_all();
        folders.free_all();

        let root = folders.get_new();
        folders[root].reset();

        let mut decoder = snapshot.decoder();
        let mut current_dir = String::new();
        let mut current: Option<PoolSlot> = Some(root);
        self.last_path.clear();

        while decoder.read_into(&mut self.scratch)? {
            stats.entries += 1;
            let entry = &self.scratch;
            if entry.skip_worktree {
                stats.skip_worktree += 1;
            }
            if entry.path == self.last_path {
                stats.skipped_stages += 1;
                continue;
            }
            self.last_path.clone_from(&entry.path);

            let parent = entry.parent();
            if parent != current_dir {
                current = descend(folders, &mut self.key, root, parent);
                current_dir.clear();
                current_dir.push_str(parent);
            }
            let Some(folder) = current else {
                stats.collisions += 1;
                tracing::warn!(path = %entry.path, "dropping entry under a name that collides with a file");
                continue;
            };

            fold_into(entry.name(), &mut self.key);
            if folders[folder].children.contains_key(self.key.as_str()) {
                stats.collisions += 1;
                tracing::warn!(path = %entry.path, "dropping entry whose name collides case-insensitively");
                continue;
            }

            let child = if entry.kind() == EntryKind::GitLink {
                let slot = new_folder(folders, folder, entry.name());
                folders[slot].gitlink = true;
                PendingChild::Folder(slot)
            } else {
                let slot = entries.get_new();
                entries[slot].assign(entry);
                PendingChild::File(slot)
            };
            folders[folder].children.insert(self.key.clone(), child);
        }
        finish(snapshot, decoder.position())?;

        let root = freeze(folders, entries, root, &mut stats);
        entries.shrink();
        folders.shrink();
        Ok((root, stats))
    }
}

/// Extensions and trailer checks shared by both modes.
fn finish(snapshot: &IndexSnapshot, entries_end: usize) -> Result<(), ProjectionError> {
    reader::skip_extensions(snapshot.bytes(), entries_end)?;
    reader::verify_checksum(snapshot.bytes())?;
    Ok(())
}

/// Walk (creating as needed) the pending folder for `path` below `root`.
/// `None` if some component is already taken by a file or a gitlink.
fn descend(
    folders: &mut ObjectPool<PendingFolder>,
    key: &mut String,
    root: PoolSlot,
    path: &str,
) -> Option<PoolSlot> {
    let mut slot = root;
    if path.is_empty() {
        return Some(slot);
    }
    for component in path.split('/') {
        fold_into(component, key);
        slot = match folders[slot].children.get(key.as_str()).copied() {
            Some(PendingChild::Folder(child)) if !folders[child].gitlink => child,
            Some(_) => return None,
            None => {
                let child = new_folder(folders, slot, component);
                folders[slot]
                    .children
                    .insert(key.clone(), PendingChild::Folder(child));
                child
            }
        };
    }
    Some(slot)
}

fn new_folder(folders: &mut ObjectPool<PendingFolder>, parent: PoolSlot, name: &str) -> PoolSlot {
    let parent_path = std::mem::take(&mut folders[parent].path);
    let child = folders.get_new();
    let node = &mut folders[child];
    node.reset();
    node.name.push_str(name);
    if !parent_path.is_empty() {
        node.path.push_str(&parent_path);
        node.path.push('/');
    }
    node.path.push_str(name);
    folders[parent].path = parent_path;
    child
}

fn freeze(
    folders: &ObjectPool<PendingFolder>,
    entries: &ObjectPool<IndexEntry>,
    slot: PoolSlot,
    stats: &mut ParseStats,
) -> Arc<FolderNode> {
    let pending = &folders[slot];
    stats.folders += 1;
    let mut items = Vec::with_capacity(pending.children.len());
    let mut nodes = Vec::new();
    for child in pending.children.values() {
        match *child {
            PendingChild::File(file) => {
                stats.files += 1;
                items.push(ProjectedItem::File(FileNode::from_entry(&entries[file])));
            }
            PendingChild::Folder(sub) => {
                let node = freeze(folders, entries, sub, stats);
                items.push(ProjectedItem::Folder {
                    name: node.name().to_string(),
                });
                nodes.push(node);
            }
        }
    }
    Arc::new(FolderNode::expanded(
        pending.name.clone(),
        pending.path.clone(),
        FolderContents::new(items, nodes),
    ))
}

struct LazyChild {
    name: String,
    ranges: Vec<FolderRange>,
    gitlink: bool,
}

/// Decode the immediate children of one folder from its index ranges.
pub(crate) fn read_folder(
    snapshot: &IndexSnapshot,
    folder_path: &str,
    ranges: &[FolderRange],
) -> Result<FolderContents, ProjectionError> {
    let version = snapshot.header().version;
    let mut items = Vec::new();
    let mut subfolders: Vec<LazyChild> = Vec::new();
    // Folded name → Ok(subfolder index) or Err(()) for a file.
    let mut seen: HashMap<String, Result<usize, ()>> = HashMap::new();
    let mut entry = IndexEntry::default();
    let mut key = String::new();

    for range in ranges {
        let mut decoder = snapshot.decoder_at(&range.cursor);
        let mut last_path = range.cursor.prior_path.clone();
        // Spelling of the subfolder whose entries are being skipped over.
        let mut inside: Option<String> = None;

        loop {
            let offset = decoder.position();
            let entry_number = decoder.entry_number();
            if !decoder.read_into(&mut entry)? || !entry.path.starts_with(&range.prefix) {
                break;
            }
            if entry.path == last_path {
                continue;
            }
            let rest = &entry.path[range.prefix.len()..];

            if let Some(slash) = rest.find('/') {
                let name = &rest[..slash];
                if inside.as_deref() != Some(name) {
                    inside = Some(name.to_string());
                    fold_into(name, &mut key);
                    let folder_range = FolderRange {
                        cursor: IndexCursor {
                            offset,
                            entry_number,
                            prior_path: if version == 4 { last_path.clone() } else { String::new() },
                        },
                        prefix: format!("{}{}/", range.prefix, name),
                    };
                    match seen.entry(key.clone()) {
                        Entry::Occupied(existing) => match existing.get() {
                            Ok(i) if !subfolders[*i].gitlink => subfolders[*i].ranges.push(folder_range),
                            _ => tracing::warn!(path = %entry.path, "dropping folder that collides with a file"),
                        },
                        Entry::Vacant(slot) => {
                            slot.insert(Ok(subfolders.len()));
                            subfolders.push(LazyChild {
                                name: name.to_string(),
                                ranges: vec![folder_range],
                                gitlink: false,
                            });
                        }
                    }
                }
            } else {
                inside = None;
                fold_into(rest, &mut key);
                match seen.entry(key.clone()) {
                    Entry::Occupied(_) => {
                        tracing::warn!(path = %entry.path, "dropping entry whose name collides case-insensitively");
                    }
                    Entry::Vacant(slot) if entry.kind() == EntryKind::GitLink => {
                        slot.insert(Ok(subfolders.len()));
                        subfolders.push(LazyChild {
                            name: rest.to_string(),
                            ranges: Vec::new(),
                            gitlink: true,
                        });
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(Err(()));
                        items.push(ProjectedItem::File(FileNode::from_entry(&entry)));
                    }
                }
            }
            last_path.clone_from(&entry.path);
        }
    }

    let mut nodes = Vec::with_capacity(subfolders.len());
    for child in subfolders {
        let path = if folder_path.is_empty() {
            child.name.clone()
        } else {
            format!("{folder_path}/{}", child.name)
        };
        items.push(ProjectedItem::Folder {
            name: child.name.clone(),
        });
        let node = if child.gitlink {
            FolderNode::expanded(child.name, path, FolderContents::default())
        } else {
            FolderNode::lazy(child.name, path, child.ranges)
        };
        nodes.push(Arc::new(node));
    }
    Ok(FolderContents::new(items, nodes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitproj_testutil::IndexBuilder;

    fn snapshot(builder: IndexBuilder) -> Arc<IndexSnapshot> {
        Arc::new(IndexSnapshot::from_bytes(builder.build()).unwrap())
    }

    fn names(contents: &FolderContents) -> Vec<&str> {
        contents.items().iter().map(ProjectedItem::name).collect()
    }

    fn sample() -> IndexBuilder {
        IndexBuilder::new()
            .file("A/a.txt", b"a")
            .file("A/B/b.txt", b"bb")
            .file("C.txt", b"ccc")
    }

    #[test]
    fn test_full_parse_builds_everything() {
        let mut parser = IndexParser::new(PoolConfig::default());
        let trie = parser.parse(snapshot(sample()), ProjectionMode::Full).unwrap();

        let root = trie.root();
        assert!(root.is_fully_enumerated());
        let a = trie.find_folder("A").unwrap().unwrap();
        assert!(a.is_fully_enumerated());
        let b = trie.find_folder("A/B").unwrap().unwrap();
        assert_eq!(names(&trie.contents(&b).unwrap()), ["b.txt"]);
        assert_eq!(trie.stats().files, 3);
        assert_eq!(trie.stats().folders, 3);
    }

    #[test]
    fn test_lazy_parse_expands_one_level_at_a_time() {
        let mut parser = IndexParser::new(PoolConfig::default());
        let trie = parser.parse(snapshot(sample()), ProjectionMode::Lazy).unwrap();
        assert!(!trie.root().is_fully_enumerated());

        let root = trie.contents(trie.root()).unwrap();
        assert_eq!(names(&root), ["A", "C.txt"]);

        let a = root.folder("A").unwrap();
        assert!(!a.is_fully_enumerated());
        let a_contents = trie.contents(a).unwrap();
        assert_eq!(names(&a_contents), ["a.txt", "B"]);

        let b = a_contents.folder("b").unwrap();
        assert!(!b.is_fully_enumerated());
        assert_eq!(names(&trie.contents(b).unwrap()), ["b.txt"]);
        assert!(b.is_fully_enumerated());
    }

    #[test]
    fn test_lazy_matches_full_on_v4() {
        let builder = || {
            IndexBuilder::new()
                .version(4)
                .file("src/index/mod.rs", b"1")
                .file("src/index/reader.rs", b"2")
                .file("src/lib.rs", b"3")
                .file("src/projection/trie.rs", b"4")
                .file("tests/it.rs", b"5")
        };
        let mut parser = IndexParser::new(PoolConfig::default());
        let full = parser.parse(snapshot(builder()), ProjectionMode::Full).unwrap();
        let lazy = parser.parse(snapshot(builder()), ProjectionMode::Lazy).unwrap();

        let mut full_files = Vec::new();
        full.for_each_file(|path, file| full_files.push((path.to_string(), file.id)))
            .unwrap();
        let mut lazy_files = Vec::new();
        lazy.for_each_file(|path, file| lazy_files.push((path.to_string(), file.id)))
            .unwrap();
        assert_eq!(full_files, lazy_files);
        assert_eq!(full_files.len(), 5);
    }

    #[test]
    fn test_conflict_stages_project_first_entry() {
        let builder = IndexBuilder::new()
            .conflict("merge.txt", 1, b"base")
            .conflict("merge.txt", 2, b"ours")
            .file("other", b"x");
        let mut parser = IndexParser::new(PoolConfig::default());
        for mode in [ProjectionMode::Full, ProjectionMode::Lazy] {
            let trie = parser.parse(snapshot(builder.clone()), mode).unwrap();
            let root = trie.contents(trie.root()).unwrap();
            assert_eq!(names(&root), ["merge.txt", "other"]);
            assert_eq!(trie.stats().skipped_stages, 1);
            let merge = root.find("merge.txt").unwrap().as_file().unwrap();
            assert_eq!(merge.id, IndexBuilder::blob_id(b"base"));
        }
    }

    #[test]
    fn test_gitlink_is_empty_folder() {
        let builder = IndexBuilder::new().file("a", b"a").gitlink("vendor/lib");
        let mut parser = IndexParser::new(PoolConfig::default());
        for mode in [ProjectionMode::Full, ProjectionMode::Lazy] {
            let trie = parser.parse(snapshot(builder.clone()), mode).unwrap();
            let lib = trie.find_folder("vendor/lib").unwrap().unwrap();
            assert!(trie.contents(&lib).unwrap().is_empty());
        }
    }

    #[test]
    fn test_case_collisions_merge_folders_and_drop_files() {
        let builder = IndexBuilder::new()
            .file("Docs/a.md", b"1")
            .file("README", b"2")
            .file("Readme", b"3")
            .file("docs/b.md", b"4");
        let mut parser = IndexParser::new(PoolConfig::default());
        for mode in [ProjectionMode::Full, ProjectionMode::Lazy] {
            let trie = parser.parse(snapshot(builder.clone()), mode).unwrap();
            let root = trie.contents(trie.root()).unwrap();
            assert_eq!(names(&root), ["Docs", "README"]);
            let docs = trie.find_folder("DOCS").unwrap().unwrap();
            assert_eq!(names(&trie.contents(&docs).unwrap()), ["a.md", "b.md"]);
        }
    }

    #[test]
    fn test_corrupt_index_fails_both_modes() {
        let mut parser = IndexParser::new(PoolConfig::default());
        for mode in [ProjectionMode::Full, ProjectionMode::Lazy] {
            let mut bytes = sample().build();
            let last = bytes.len() - 1;
            bytes[last] ^= 0x01;
            let snapshot = Arc::new(IndexSnapshot::from_bytes(bytes).unwrap());
            let err = parser.parse(snapshot, mode).unwrap_err();
            assert!(matches!(err, ProjectionError::CorruptIndex { .. }));
        }
    }

    #[test]
    fn test_reparse_reuses_pools() {
        let builder = || {
            (0..500).fold(IndexBuilder::new(), |b, i| {
                b.file(&format!("dir{}/file{i:04}", i % 7), b"x")
            })
        };
        let mut parser = IndexParser::new(PoolConfig::default());
        parser.parse(snapshot(builder()), ProjectionMode::Full).unwrap();
        let sizes = parser.pool_sizes();
        parser.parse(snapshot(builder()), ProjectionMode::Full).unwrap();
        assert_eq!(parser.pool_sizes(), sizes);
        assert_eq!(parser.parses(), 2);
    }
}
