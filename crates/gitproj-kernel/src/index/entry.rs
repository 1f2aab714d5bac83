//! Index entries and mode bits.

use gitproj_types::ObjectId;

/// What an index entry's mode says it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Regular,
    SymLink,
    /// A submodule commit.
    GitLink,
    Invalid,
}

/// Raw POSIX-style mode bits from the index.
///
/// The high nibble (`mode >> 12`) selects the type, the low 9 bits are the
/// permission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileMode(u32);

impl FileMode {
    pub const REGULAR: FileMode = FileMode(0o100644);
    pub const EXECUTABLE: FileMode = FileMode(0o100755);
    pub const SYMLINK: FileMode = FileMode(0o120000);
    pub const GITLINK: FileMode = FileMode(0o160000);

    const TYPE_REGULAR: u32 = 0b1000;
    const TYPE_SYMLINK: u32 = 0b1010;
    const TYPE_GITLINK: u32 = 0b1110;

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn kind(self) -> EntryKind {
        match (self.0 >> 12) & 0xf {
            Self::TYPE_REGULAR => EntryKind::Regular,
            Self::TYPE_SYMLINK => EntryKind::SymLink,
            Self::TYPE_GITLINK => EntryKind::GitLink,
            _ => EntryKind::Invalid,
        }
    }

    /// Low 9 permission bits.
    pub fn permissions(self) -> u32 {
        self.0 & 0o777
    }

    pub fn is_executable(self) -> bool {
        self.kind() == EntryKind::Regular && self.0 & 0o111 != 0
    }
}

impl std::fmt::Display for FileMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06o}", self.0)
    }
}

/// One decoded index entry.
///
/// Pooled by the parser: the `path` buffer keeps its capacity across reuse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub id: ObjectId,
    pub mode: FileMode,
    pub size: u64,
    /// Merge stage (0 for normal entries).
    pub stage: u8,
    pub skip_worktree: bool,
    pub intent_to_add: bool,
    /// Byte offset of this entry in the index file.
    pub offset: usize,
}

impl IndexEntry {
    pub fn kind(&self) -> EntryKind {
        self.mode.kind()
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        match self.path.rfind('/') {
            Some(i) => &self.path[i + 1..],
            None => &self.path,
        }
    }

    /// Everything before the final component (empty for top-level entries).
    pub fn parent(&self) -> &str {
        match self.path.rfind('/') {
            Some(i) => &self.path[..i],
            None => "",
        }
    }

    /// Copy another entry into this one, reusing the path allocation.
    pub fn assign(&mut self, other: &IndexEntry) {
        self.path.clear();
        self.path.push_str(&other.path);
        self.id = other.id;
        self.mode = other.mode;
        self.size = other.size;
        self.stage = other.stage;
        self.skip_worktree = other.skip_worktree;
        self.intent_to_add = other.intent_to_add;
        self.offset = other.offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0o100644, EntryKind::Regular, 0o644, false)]
    #[case(0o100755, EntryKind::Regular, 0o755, true)]
    #[case(0o120000, EntryKind::SymLink, 0, false)]
    #[case(0o160000, EntryKind::GitLink, 0, false)]
    #[case(0o040000, EntryKind::Invalid, 0, false)]
    #[case(0, EntryKind::Invalid, 0, false)]
    fn test_mode_decode(
        #[case] bits: u32,
        #[case] kind: EntryKind,
        #[case] perms: u32,
        #[case] exec: bool,
    ) {
        let mode = FileMode::new(bits);
        assert_eq!(mode.kind(), kind);
        assert_eq!(mode.permissions(), perms);
        assert_eq!(mode.is_executable(), exec);
    }

    #[test]
    fn test_name_and_parent() {
        let entry = IndexEntry {
            path: "src/lib/mod.rs".into(),
            ..Default::default()
        };
        assert_eq!(entry.name(), "mod.rs");
        assert_eq!(entry.parent(), "src/lib");

        let top = IndexEntry {
            path: "README".into(),
            ..Default::default()
        };
        assert_eq!(top.name(), "README");
        assert_eq!(top.parent(), "");
    }

    #[test]
    fn test_display_is_octal() {
        assert_eq!(FileMode::EXECUTABLE.to_string(), "100755");
    }
}
