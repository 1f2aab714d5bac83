//! The Git object database boundary.
//!
//! Hydration asks a [`GitObjectProvider`] for a blob's bytes and receives
//! them through a [`BlobSink`]. Fetching missing objects from a remote is
//! the provider's business, not the engine's.

use async_trait::async_trait;
use gitproj_types::{ObjectId, ProjectionError};
use tokio_util::sync::CancellationToken;

/// Receives blob content in order.
#[async_trait]
pub trait BlobSink: Send {
    /// Accept `bytes` starting at `offset` into the blob.
    async fn write_chunk(&mut self, offset: u64, bytes: &[u8]) -> Result<(), ProjectionError>;
}

/// Read access to Git objects.
#[async_trait]
pub trait GitObjectProvider: Send + Sync {
    /// Stream the content of blob `id` into `sink`, returning the number of
    /// bytes written.
    ///
    /// A missing object is `PathNotFound`. Implementations check `cancel`
    /// between chunks and return `Cancelled` without writing further.
    async fn try_copy_blob_content_stream(
        &self,
        id: &ObjectId,
        cancel: &CancellationToken,
        sink: &mut dyn BlobSink,
    ) -> Result<u64, ProjectionError>;

    async fn object_exists(&self, id: &ObjectId) -> bool;
}

/// Feed an in-memory blob to a sink in `chunk_size` pieces.
pub async fn copy_in_chunks(
    content: &[u8],
    chunk_size: usize,
    cancel: &CancellationToken,
    sink: &mut dyn BlobSink,
) -> Result<u64, ProjectionError> {
    let mut offset = 0u64;
    for chunk in content.chunks(chunk_size.max(1)) {
        if cancel.is_cancelled() {
            return Err(ProjectionError::Cancelled);
        }
        sink.write_chunk(offset, chunk).await?;
        offset += chunk.len() as u64;
    }
    Ok(offset)
}

#[cfg(feature = "native")]
pub use native::Git2ObjectStore;

#[cfg(feature = "native")]
mod native {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use gitproj_types::{ObjectId, ProjectionError};
    use tokio_util::sync::CancellationToken;

    use super::{BlobSink, GitObjectProvider, copy_in_chunks};
    use crate::config::DEFAULT_HYDRATION_CHUNK_SIZE;

    /// Object provider over a local repository via libgit2.
    ///
    /// libgit2 reads block, so every lookup runs on the blocking pool.
    pub struct Git2ObjectStore {
        /// `Repository` is not `Sync`.
        repo: Arc<Mutex<git2::Repository>>,
    }

    impl Git2ObjectStore {
        /// Open the repository containing `path` (a work tree or `.git` dir).
        pub fn open(path: &Path) -> Result<Self, ProjectionError> {
            let repo = git2::Repository::open(path)
                .map_err(|e| ProjectionError::Io(format!("opening repository {}: {}", path.display(), e)))?;
            Ok(Self {
                repo: Arc::new(Mutex::new(repo)),
            })
        }

        /// Run `f` against the repository on the blocking pool.
        async fn with_repo<T, F>(&self, f: F) -> Result<T, ProjectionError>
        where
            T: Send + 'static,
            F: FnOnce(&git2::Repository) -> Result<T, ProjectionError> + Send + 'static,
        {
            let repo = Arc::clone(&self.repo);
            tokio::task::spawn_blocking(move || {
                let repo = repo
                    .lock()
                    .map_err(|_| ProjectionError::Io("repository lock poisoned".into()))?;
                f(&repo)
            })
            .await
            .map_err(|e| ProjectionError::Io(format!("object read task failed: {e}")))?
        }

        async fn read_blob(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, ProjectionError> {
            let oid = oid(id)?;
            let id = *id;
            self.with_repo(move |repo| match repo.find_blob(oid) {
                Ok(blob) => Ok(Some(blob.content().to_vec())),
                Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
                Err(e) => Err(ProjectionError::Io(format!("reading blob {id}: {e}"))),
            })
            .await
        }
    }

    fn oid(id: &ObjectId) -> Result<git2::Oid, ProjectionError> {
        git2::Oid::from_bytes(id.as_bytes()).map_err(|e| ProjectionError::Io(e.to_string()))
    }

    #[async_trait]
    impl GitObjectProvider for Git2ObjectStore {
        async fn try_copy_blob_content_stream(
            &self,
            id: &ObjectId,
            cancel: &CancellationToken,
            sink: &mut dyn BlobSink,
        ) -> Result<u64, ProjectionError> {
            if cancel.is_cancelled() {
                return Err(ProjectionError::Cancelled);
            }
            let content = self
                .read_blob(id)
                .await?
                .ok_or_else(|| ProjectionError::PathNotFound(format!("object {id}")))?;
            copy_in_chunks(&content, DEFAULT_HYDRATION_CHUNK_SIZE, cancel, sink).await
        }

        /// Header lookup only; the blob is not inflated.
        async fn object_exists(&self, id: &ObjectId) -> bool {
            let Ok(oid) = oid(id) else {
                return false;
            };
            let found = self
                .with_repo(move |repo| {
                    let odb = repo.odb().map_err(|e| ProjectionError::Io(e.to_string()))?;
                    Ok(matches!(odb.read_header(oid), Ok((_, git2::ObjectType::Blob))))
                })
                .await;
            matches!(found, Ok(true))
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    pub(crate) struct CollectSink {
        pub bytes: Vec<u8>,
        pub chunks: usize,
    }

    #[async_trait]
    impl BlobSink for CollectSink {
        async fn write_chunk(&mut self, offset: u64, bytes: &[u8]) -> Result<(), ProjectionError> {
            assert_eq!(offset, self.bytes.len() as u64);
            self.bytes.extend_from_slice(bytes);
            self.chunks += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_copy_in_chunks() {
        let mut sink = CollectSink::default();
        let n = copy_in_chunks(b"abcdefgh", 3, &CancellationToken::new(), &mut sink)
            .await
            .unwrap();
        assert_eq!(n, 8);
        assert_eq!(sink.chunks, 3);
        assert_eq!(sink.bytes, b"abcdefgh");
    }

    #[tokio::test]
    async fn test_copy_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sink = CollectSink::default();
        let err = copy_in_chunks(b"abc", 1, &cancel, &mut sink).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(sink.chunks, 0);
    }
}
