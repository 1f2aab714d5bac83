//! Git index decoding.
//!
//! - [`reader`]: the on-disk format, one entry at a time
//! - [`entry`]: decoded entries and mode bits
//! - [`parser`]: turns an [`IndexSnapshot`] into a projection trie, either
//!   all at once or one folder at a time

pub mod entry;
pub mod parser;
pub mod reader;

use std::path::Path;
use std::time::SystemTime;

use gitproj_types::ProjectionError;
use thiserror::Error;

pub use entry::{EntryKind, FileMode, IndexEntry};
pub use parser::{IndexParser, ParseStats};
pub use reader::{EntryDecoder, IndexCursor, IndexHeader};

/// Why an index failed to decode. Every variant is fatal to the parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("index is too short ({0} bytes)")]
    TooShort(usize),

    #[error("bad index signature")]
    BadSignature,

    #[error("unsupported index version {0}")]
    UnsupportedVersion(u32),

    #[error("truncated entry")]
    Truncated(u64),

    #[error("extended flags in a version 2 index")]
    UnexpectedExtendedFlags(u64),

    #[error("prefix strip longer than previous path")]
    BadPrefix(u64),

    #[error("path length does not match entry flags")]
    NameLength(u64),

    #[error("invalid path: {reason}")]
    InvalidPath { offset: u64, reason: &'static str },

    #[error("entry out of order: {path}")]
    OutOfOrder { offset: u64, path: String },

    #[error("invalid mode {mode:o}")]
    InvalidMode { offset: u64, mode: u32 },

    #[error("truncated extension")]
    BadExtension(u64),

    #[error("index checksum mismatch")]
    ChecksumMismatch,
}

impl IndexError {
    /// Byte offset the problem was found at.
    pub fn offset(&self) -> u64 {
        match self {
            Self::TooShort(_) | Self::BadSignature | Self::UnsupportedVersion(_) => 0,
            Self::Truncated(offset)
            | Self::UnexpectedExtendedFlags(offset)
            | Self::BadPrefix(offset)
            | Self::NameLength(offset)
            | Self::BadExtension(offset)
            | Self::InvalidPath { offset, .. }
            | Self::OutOfOrder { offset, .. }
            | Self::InvalidMode { offset, .. } => *offset,
            Self::ChecksumMismatch => 0,
        }
    }
}

impl From<IndexError> for ProjectionError {
    fn from(err: IndexError) -> Self {
        ProjectionError::corrupt(err.offset(), err.to_string())
    }
}

/// Identity of an index file: enough to tell that it changed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFingerprint {
    pub len: u64,
    pub modified: Option<SystemTime>,
    pub checksum: [u8; reader::CHECKSUM_LEN],
}

impl IndexFingerprint {
    /// Cheap on-disk check: length and mtime only.
    pub fn matches_file(&self, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(meta) => meta.len() == self.len && meta.modified().ok() == self.modified,
            Err(_) => false,
        }
    }
}

/// The bytes of one index file, kept alive for as long as any trie built
/// from them. Recorded lazy-parse offsets are only meaningful against the
/// snapshot that produced them.
#[derive(Debug)]
pub struct IndexSnapshot {
    bytes: Vec<u8>,
    header: IndexHeader,
    fingerprint: IndexFingerprint,
}

impl IndexSnapshot {
    /// Read an index file from disk.
    pub fn read(path: &Path) -> Result<Self, ProjectionError> {
        let meta = std::fs::metadata(path)?;
        let bytes = std::fs::read(path)?;
        let mut snapshot = Self::from_bytes(bytes)?;
        snapshot.fingerprint.modified = meta.modified().ok();
        Ok(snapshot)
    }

    /// Wrap bytes already in memory. Only the header is checked here; the
    /// parser validates the rest.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ProjectionError> {
        let header = reader::read_header(&bytes)?;
        let mut checksum = [0u8; reader::CHECKSUM_LEN];
        checksum.copy_from_slice(&bytes[bytes.len() - reader::CHECKSUM_LEN..]);
        Ok(Self {
            fingerprint: IndexFingerprint {
                len: bytes.len() as u64,
                modified: None,
                checksum,
            },
            bytes,
            header,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn header(&self) -> IndexHeader {
        self.header
    }

    pub fn fingerprint(&self) -> IndexFingerprint {
        self.fingerprint
    }

    pub fn decoder(&self) -> EntryDecoder<'_> {
        EntryDecoder::new(&self.bytes, self.header)
    }

    pub fn decoder_at(&self, cursor: &IndexCursor) -> EntryDecoder<'_> {
        EntryDecoder::resume(&self.bytes, self.header, cursor)
    }
}
