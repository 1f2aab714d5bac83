//! Writes Git index files for tests.
//!
//! Produces the on-disk format git itself writes: header, entries (padded
//! for v2/v3, prefix-compressed for v4), optional extensions, and a SHA-1
//! trailer. Entries are sorted by path and stage unless told otherwise, so
//! tests can also produce deliberately broken files.

use gitproj_types::ObjectId;
use sha1::{Digest, Sha1};

const MODE_REGULAR: u32 = 0o100644;
const MODE_EXECUTABLE: u32 = 0o100755;
const MODE_SYMLINK: u32 = 0o120000;
const MODE_GITLINK: u32 = 0o160000;

const FLAG_EXTENDED: u16 = 0x4000;
const EXT_SKIP_WORKTREE: u16 = 0x4000;
const NAME_MASK: usize = 0x0FFF;

#[derive(Debug, Clone)]
struct Entry {
    path: String,
    mode: u32,
    id: ObjectId,
    size: u32,
    stage: u16,
    skip_worktree: bool,
}

/// Builder for index file bytes.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    version: u32,
    entries: Vec<Entry>,
    extensions: Vec<([u8; 4], Vec<u8>)>,
    sorted: bool,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexBuilder {
    /// A version 2 index with no entries.
    pub fn new() -> Self {
        Self {
            version: 2,
            entries: Vec::new(),
            extensions: Vec::new(),
            sorted: true,
        }
    }

    /// Git's blob id for `content`.
    pub fn blob_id(content: &[u8]) -> ObjectId {
        let mut hasher = Sha1::new();
        hasher.update(format!("blob {}\0", content.len()).as_bytes());
        hasher.update(content);
        let digest: [u8; 20] = hasher.finalize().into();
        ObjectId::new(digest)
    }

    /// Header version. Anything outside 2..=4 is written as-is (and entries
    /// encoded as v2), for testing rejection.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn file(self, path: &str, content: &[u8]) -> Self {
        self.entry(path, MODE_REGULAR, content, 0, false)
    }

    pub fn executable(self, path: &str, content: &[u8]) -> Self {
        self.entry(path, MODE_EXECUTABLE, content, 0, false)
    }

    pub fn symlink(self, path: &str, target: &str) -> Self {
        self.entry(path, MODE_SYMLINK, target.as_bytes(), 0, false)
    }

    /// A submodule commit at `path`.
    pub fn gitlink(mut self, path: &str) -> Self {
        let id = Self::blob_id(path.as_bytes());
        self.entries.push(Entry {
            path: path.to_string(),
            mode: MODE_GITLINK,
            id,
            size: 0,
            stage: 0,
            skip_worktree: false,
        });
        self
    }

    /// A regular file with the skip-worktree bit. Needs version 3 or later.
    pub fn skip_worktree(self, path: &str, content: &[u8]) -> Self {
        self.entry(path, MODE_REGULAR, content, 0, true)
    }

    /// One stage (1..=3) of a conflicted path.
    pub fn conflict(self, path: &str, stage: u16, content: &[u8]) -> Self {
        self.entry(path, MODE_REGULAR, content, stage, false)
    }

    /// An entry with arbitrary mode bits and empty content.
    pub fn raw_mode(self, path: &str, mode: u32) -> Self {
        self.entry(path, mode, b"", 0, false)
    }

    pub fn extension(mut self, signature: [u8; 4], data: Vec<u8>) -> Self {
        self.extensions.push((signature, data));
        self
    }

    /// Keep entries in insertion order.
    pub fn unsorted(mut self) -> Self {
        self.sorted = false;
        self
    }

    fn entry(mut self, path: &str, mode: u32, content: &[u8], stage: u16, skip_worktree: bool) -> Self {
        self.entries.push(Entry {
            path: path.to_string(),
            mode,
            id: Self::blob_id(content),
            size: content.len() as u32,
            stage,
            skip_worktree,
        });
        self
    }

    /// Paths in the order they will be written.
    pub fn paths(&self) -> Vec<String> {
        self.ordered().into_iter().map(|e| e.path.clone()).collect()
    }

    fn ordered(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.entries.iter().collect();
        if self.sorted {
            entries.sort_by(|a, b| a.path.as_bytes().cmp(b.path.as_bytes()).then(a.stage.cmp(&b.stage)));
        }
        entries
    }

    pub fn build(&self) -> Vec<u8> {
        let entries = self.ordered();
        let mut out = Vec::new();
        out.extend_from_slice(b"DIRC");
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&(entries.len() as u32).to_be_bytes());

        let mut prior: &[u8] = b"";
        for entry in entries {
            let start = out.len();
            out.extend_from_slice(&[0u8; 24]);
            out.extend_from_slice(&entry.mode.to_be_bytes());
            out.extend_from_slice(&[0u8; 8]);
            out.extend_from_slice(&entry.size.to_be_bytes());
            out.extend_from_slice(entry.id.as_bytes());

            let path = entry.path.as_bytes();
            let mut flags = (entry.stage << 12) | path.len().min(NAME_MASK) as u16;
            if entry.skip_worktree {
                flags |= FLAG_EXTENDED;
            }
            out.extend_from_slice(&flags.to_be_bytes());
            if entry.skip_worktree {
                out.extend_from_slice(&EXT_SKIP_WORKTREE.to_be_bytes());
            }

            if self.version == 4 {
                let common = prior.iter().zip(path).take_while(|(a, b)| a == b).count();
                out.extend_from_slice(&encode_varint((prior.len() - common) as u64));
                out.extend_from_slice(&path[common..]);
                out.push(0);
            } else {
                out.extend_from_slice(path);
                let header = out.len() - start - path.len();
                let padded = (header + path.len() + 8) & !7;
                out.resize(start + padded, 0);
            }
            prior = path;
        }

        for (signature, data) in &self.extensions {
            out.extend_from_slice(signature);
            out.extend_from_slice(&(data.len() as u32).to_be_bytes());
            out.extend_from_slice(data);
        }

        let trailer: [u8; 20] = Sha1::digest(&out).into();
        out.extend_from_slice(&trailer);
        out
    }
}

/// Git's offset varint: big-endian groups of 7 bits, each continuation
/// group biased by one.
fn encode_varint(mut value: u64) -> Vec<u8> {
    let mut buf = [0u8; 16];
    let mut pos = buf.len() - 1;
    buf[pos] = (value & 0x7f) as u8;
    loop {
        value >>= 7;
        if value == 0 {
            break;
        }
        value -= 1;
        pos -= 1;
        buf[pos] = 0x80 | (value & 0x7f) as u8;
    }
    buf[pos..].to_vec()
}
