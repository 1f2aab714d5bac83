//! Decoder for the Git index file (`.git/index`), versions 2 through 4.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//!   header     "DIRC" | version u32 | entry count u32
//!   entries    ctime mtime dev ino mode uid gid size (10 x u32)
//!              object id (20) | flags u16 | [extended flags u16]
//!              path (v2/v3: NUL padded to 8 bytes,
//!                    v4: varint strip count + NUL-terminated suffix)
//!   extensions signature [4] | length u32 | payload
//!   trailer    SHA-1 of everything above
//! ```
//!
//! [`EntryDecoder`] walks entries one at a time into a caller-owned
//! [`IndexEntry`], so a full scan allocates only when a path outgrows the
//! buffer it is decoded into.

use std::cmp::Ordering;

use digest::Digest;
use gitproj_types::ObjectId;
use sha1::Sha1;

use super::IndexError;
use super::entry::{EntryKind, FileMode, IndexEntry};

pub const SIGNATURE: &[u8; 4] = b"DIRC";
pub const HEADER_LEN: usize = 12;
pub const CHECKSUM_LEN: usize = 20;

const ENTRY_FIXED_LEN: usize = 62;
const MODE_AT: usize = 24;
const SIZE_AT: usize = 36;
const OID_AT: usize = 40;
const FLAGS_AT: usize = 60;

const FLAG_EXTENDED: u16 = 0x4000;
const FLAG_STAGE_MASK: u16 = 0x3000;
const FLAG_NAME_MASK: u16 = 0x0fff;
const EXT_SKIP_WORKTREE: u16 = 0x4000;
const EXT_INTENT_TO_ADD: u16 = 0x2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub version: u32,
    pub entry_count: u32,
}

/// Validate the fixed header.
pub fn read_header(data: &[u8]) -> Result<IndexHeader, IndexError> {
    if data.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(IndexError::TooShort(data.len()));
    }
    if &data[..4] != SIGNATURE {
        return Err(IndexError::BadSignature);
    }
    let version = be32(&data[4..8]);
    if !(2..=4).contains(&version) {
        return Err(IndexError::UnsupportedVersion(version));
    }
    Ok(IndexHeader {
        version,
        entry_count: be32(&data[8..12]),
    })
}

/// Check the SHA-1 trailer. An all-zero trailer means the writer skipped
/// hashing (`index.skipHash`) and is accepted.
pub fn verify_checksum(data: &[u8]) -> Result<[u8; CHECKSUM_LEN], IndexError> {
    let split = data
        .len()
        .checked_sub(CHECKSUM_LEN)
        .ok_or(IndexError::TooShort(data.len()))?;
    let (body, trailer) = data.split_at(split);
    let mut expected = [0u8; CHECKSUM_LEN];
    expected.copy_from_slice(trailer);
    if expected == [0u8; CHECKSUM_LEN] {
        return Ok(expected);
    }
    let actual = Sha1::digest(body);
    if actual.as_slice() != expected {
        return Err(IndexError::ChecksumMismatch);
    }
    Ok(expected)
}

/// Walk the extension blocks between the last entry and the trailer.
///
/// Returns the signatures seen, in order.
pub fn skip_extensions(data: &[u8], mut pos: usize) -> Result<Vec<[u8; 4]>, IndexError> {
    let limit = data.len().saturating_sub(CHECKSUM_LEN);
    let mut seen = Vec::new();
    while pos < limit {
        if limit - pos < 8 {
            return Err(IndexError::BadExtension(pos as u64));
        }
        let mut signature = [0u8; 4];
        signature.copy_from_slice(&data[pos..pos + 4]);
        let len = be32(&data[pos + 4..pos + 8]) as usize;
        let end = (pos + 8)
            .checked_add(len)
            .filter(|end| *end <= limit)
            .ok_or(IndexError::BadExtension(pos as u64))?;
        seen.push(signature);
        pos = end;
    }
    Ok(seen)
}

/// Where to resume decoding.
///
/// For v4 indexes `prior_path` must be the path of the entry just before
/// `offset`, since each path is stored relative to its predecessor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexCursor {
    pub offset: usize,
    pub entry_number: u32,
    pub prior_path: String,
}

impl IndexCursor {
    /// Cursor at the first entry.
    pub fn start() -> Self {
        Self {
            offset: HEADER_LEN,
            entry_number: 0,
            prior_path: String::new(),
        }
    }
}

/// Sequential entry decoder over an in-memory index.
pub struct EntryDecoder<'a> {
    data: &'a [u8],
    version: u32,
    entry_count: u32,
    limit: usize,
    pos: usize,
    next_entry: u32,
    prior_path: Vec<u8>,
    prior_stage: u8,
    has_prior: bool,
    scratch: Vec<u8>,
}

impl<'a> EntryDecoder<'a> {
    pub fn new(data: &'a [u8], header: IndexHeader) -> Self {
        Self::resume(data, header, &IndexCursor::start())
    }

    pub fn resume(data: &'a [u8], header: IndexHeader, cursor: &IndexCursor) -> Self {
        Self {
            data,
            version: header.version,
            entry_count: header.entry_count,
            limit: data.len().saturating_sub(CHECKSUM_LEN),
            pos: cursor.offset,
            next_entry: cursor.entry_number,
            prior_path: cursor.prior_path.as_bytes().to_vec(),
            prior_stage: 0,
            has_prior: !cursor.prior_path.is_empty(),
            scratch: Vec::new(),
        }
    }

    /// Byte offset of the next entry (or of the extensions once exhausted).
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Ordinal of the next entry.
    pub fn entry_number(&self) -> u32 {
        self.next_entry
    }

    pub fn entries_left(&self) -> u32 {
        self.entry_count.saturating_sub(self.next_entry)
    }

    /// Cursor that resumes at the next entry.
    pub fn cursor(&self) -> IndexCursor {
        let prior_path = if self.version == 4 {
            String::from_utf8_lossy(&self.prior_path).into_owned()
        } else {
            String::new()
        };
        IndexCursor {
            offset: self.pos,
            entry_number: self.next_entry,
            prior_path,
        }
    }

    /// Decode the next entry into `out`. `Ok(false)` once every entry has
    /// been read.
    pub fn read_into(&mut self, out: &mut IndexEntry) -> Result<bool, IndexError> {
        if self.next_entry >= self.entry_count {
            return Ok(false);
        }

        let start = self.pos;
        let offset = start as u64;
        let fixed = self.slice(start, ENTRY_FIXED_LEN)?;
        let mode = FileMode::new(be32(&fixed[MODE_AT..MODE_AT + 4]));
        let size = u64::from(be32(&fixed[SIZE_AT..SIZE_AT + 4]));
        let id = ObjectId::from_slice(&fixed[OID_AT..OID_AT + ObjectId::LEN])
            .ok_or(IndexError::Truncated(offset))?;
        let flags = be16(&fixed[FLAGS_AT..FLAGS_AT + 2]);

        let mut cursor = start + ENTRY_FIXED_LEN;
        let (skip_worktree, intent_to_add) = if flags & FLAG_EXTENDED != 0 {
            if self.version < 3 {
                return Err(IndexError::UnexpectedExtendedFlags(offset));
            }
            let extended = be16(self.slice(cursor, 2)?);
            cursor += 2;
            (
                extended & EXT_SKIP_WORKTREE != 0,
                extended & EXT_INTENT_TO_ADD != 0,
            )
        } else {
            (false, false)
        };
        let stage = ((flags & FLAG_STAGE_MASK) >> 12) as u8;
        let name_len = (flags & FLAG_NAME_MASK) as usize;

        self.scratch.clear();
        if self.version == 4 {
            let (strip, used) =
                read_varint(&self.data[cursor.min(self.limit)..self.limit])
                    .ok_or(IndexError::Truncated(offset))?;
            cursor += used;
            if strip > self.prior_path.len() {
                return Err(IndexError::BadPrefix(offset));
            }
            let nul = self.find_nul(cursor, offset)?;
            let keep = self.prior_path.len() - strip;
            self.scratch.extend_from_slice(&self.prior_path[..keep]);
            self.scratch.extend_from_slice(&self.data[cursor..nul]);
            cursor = nul + 1;
        } else {
            let nul = self.find_nul(cursor, offset)?;
            self.scratch.extend_from_slice(&self.data[cursor..nul]);
            // The entry, NUL included, is padded to a multiple of 8 bytes.
            let entry_len = ((cursor - start) + (nul - cursor) + 8) & !7;
            cursor = start + entry_len;
            if cursor > self.limit {
                return Err(IndexError::Truncated(offset));
            }
        }

        if name_len != FLAG_NAME_MASK as usize && name_len != self.scratch.len() {
            return Err(IndexError::NameLength(offset));
        }

        let path =
            std::str::from_utf8(&self.scratch).map_err(|_| IndexError::InvalidPath {
                offset,
                reason: "not UTF-8",
            })?;
        validate_path(path).map_err(|reason| IndexError::InvalidPath { offset, reason })?;

        if self.has_prior {
            let order = self
                .prior_path
                .as_slice()
                .cmp(self.scratch.as_slice())
                .then(self.prior_stage.cmp(&stage));
            if order != Ordering::Less {
                return Err(IndexError::OutOfOrder {
                    offset,
                    path: path.to_string(),
                });
            }
        }

        if mode.kind() == EntryKind::Invalid {
            return Err(IndexError::InvalidMode {
                offset,
                mode: mode.bits(),
            });
        }

        out.path.clear();
        out.path.push_str(path);
        out.id = id;
        out.mode = mode;
        out.size = size;
        out.stage = stage;
        out.skip_worktree = skip_worktree;
        out.intent_to_add = intent_to_add;
        out.offset = start;

        std::mem::swap(&mut self.prior_path, &mut self.scratch);
        self.prior_stage = stage;
        self.has_prior = true;
        self.pos = cursor;
        self.next_entry += 1;
        Ok(true)
    }

    fn slice(&self, at: usize, len: usize) -> Result<&'a [u8], IndexError> {
        at.checked_add(len)
            .filter(|end| *end <= self.limit)
            .map(|end| &self.data[at..end])
            .ok_or(IndexError::Truncated(at as u64))
    }

    fn find_nul(&self, from: usize, offset: u64) -> Result<usize, IndexError> {
        if from >= self.limit {
            return Err(IndexError::Truncated(offset));
        }
        self.data[from..self.limit]
            .iter()
            .position(|b| *b == 0)
            .map(|i| from + i)
            .ok_or(IndexError::Truncated(offset))
    }
}

/// Reject paths Git itself would never write into an index.
fn validate_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("empty path");
    }
    for component in path.split('/') {
        match component {
            "" => return Err("empty path component"),
            "." | ".." => return Err("relative path component"),
            c if c.eq_ignore_ascii_case(".git") => return Err("contains .git component"),
            _ => {}
        }
    }
    Ok(())
}

/// Git's offset varint: big-endian 7-bit groups, each continuation adds one.
fn read_varint(buf: &[u8]) -> Option<(usize, usize)> {
    let mut bytes = buf.iter();
    let mut byte = *bytes.next()?;
    let mut value = usize::from(byte & 0x7f);
    let mut used = 1;
    while byte & 0x80 != 0 {
        byte = *bytes.next()?;
        used += 1;
        value = value
            .checked_add(1)?
            .checked_mul(128)?
            .checked_add(usize::from(byte & 0x7f))?;
    }
    Some((value, used))
}

fn be32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}

fn be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}
