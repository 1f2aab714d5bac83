//! In-memory Git object store.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use gitproj_kernel::git::{BlobSink, GitObjectProvider, copy_in_chunks};
use gitproj_types::{ObjectId, ProjectionError};
use tokio_util::sync::CancellationToken;

use crate::IndexBuilder;

/// Blobs keyed by their Git id, streamed in fixed-size chunks.
pub struct MemoryGitObjects {
    blobs: Mutex<HashMap<ObjectId, Vec<u8>>>,
    broken: Mutex<HashSet<ObjectId>>,
    chunk_size: usize,
}

impl Default for MemoryGitObjects {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGitObjects {
    pub fn new() -> Self {
        Self::with_chunk_size(4096)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            broken: Mutex::new(HashSet::new()),
            chunk_size,
        }
    }

    /// Store `content` and return its blob id.
    pub fn insert(&self, content: &[u8]) -> ObjectId {
        let id = IndexBuilder::blob_id(content);
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(id, content.to_vec());
        }
        id
    }

    /// Reads of `id` fail with an I/O error.
    pub fn break_object(&self, id: ObjectId) {
        if let Ok(mut broken) = self.broken.lock() {
            broken.insert(id);
        }
    }

    fn load(&self, id: &ObjectId) -> Result<Vec<u8>, ProjectionError> {
        if self.broken.lock().map(|b| b.contains(id)).unwrap_or(false) {
            return Err(ProjectionError::Io(format!("object {id} unreadable")));
        }
        self.blobs
            .lock()
            .ok()
            .and_then(|blobs| blobs.get(id).cloned())
            .ok_or_else(|| ProjectionError::PathNotFound(format!("object {id}")))
    }
}

#[async_trait]
impl GitObjectProvider for MemoryGitObjects {
    async fn try_copy_blob_content_stream(
        &self,
        id: &ObjectId,
        cancel: &CancellationToken,
        sink: &mut dyn BlobSink,
    ) -> Result<u64, ProjectionError> {
        let content = self.load(id)?;
        copy_in_chunks(&content, self.chunk_size, cancel, sink).await
    }

    async fn object_exists(&self, id: &ObjectId) -> bool {
        self.blobs.lock().map(|b| b.contains_key(id)).unwrap_or(false)
    }
}
