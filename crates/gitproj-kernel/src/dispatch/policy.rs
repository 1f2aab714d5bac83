//! Which paths under `.git` the OS may touch.
//!
//! Pure functions of the path: safe to call on a callback thread.

use crate::projection::names::names_equal;

/// Where a path sits relative to the Git metadata directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    /// Part of the projected working tree.
    WorkingTree,
    /// `.git` itself.
    GitDir,
    /// `.git/index`.
    GitIndex,
    /// Other Git metadata.
    GitMetadata,
}

impl PathClass {
    pub fn is_git(self) -> bool {
        self != Self::WorkingTree
    }
}

/// Classify a normalized path.
pub fn classify(path: &str) -> PathClass {
    let mut parts = path.splitn(2, '/');
    let first = parts.next().unwrap_or_default();
    if !names_equal(first, ".git") {
        return PathClass::WorkingTree;
    }
    match parts.next() {
        None | Some("") => PathClass::GitDir,
        Some(rest) if names_equal(rest, "index") => PathClass::GitIndex,
        Some(_) => PathClass::GitMetadata,
    }
}

/// Whether deleting `path` may proceed. Everything outside `.git` may be
/// deleted; inside it only transient files may.
pub fn is_delete_allowed(path: &str) -> bool {
    match classify(path) {
        PathClass::WorkingTree => true,
        PathClass::GitDir | PathClass::GitIndex => false,
        PathClass::GitMetadata => is_transient_git_file(&path[5..]),
    }
}

/// Lock files, pack temporaries and the like under `.git/`.
fn is_transient_git_file(rest: &str) -> bool {
    let lower = rest.to_ascii_lowercase();
    let name = lower.rsplit('/').next().unwrap_or_default();

    if name.ends_with(".lock") {
        return true;
    }
    if let Some(pack_file) = lower.strip_prefix("objects/pack/") {
        if pack_file.starts_with("tmp_") || pack_file.ends_with(".temp") {
            return true;
        }
        return !(pack_file.ends_with(".pack")
            || pack_file.ends_with(".idx")
            || pack_file.ends_with(".rev")
            || pack_file.ends_with(".keep"));
    }
    if lower.starts_with("objects/incoming-") || lower.starts_with("objects/tmp_") {
        return true;
    }
    !matches!(
        lower.as_str(),
        "head" | "config" | "packed-refs" | "objects" | "objects/pack" | "refs" | "info" | "hooks"
    )
}
