//! Blob bytes to OS write buffers.

use std::sync::Arc;

use async_trait::async_trait;
use gitproj_types::{ProjectionError, ProviderResult};
use tokio_util::sync::CancellationToken;

use super::provider::VirtualizationInstance;
use crate::git::BlobSink;

/// A [`BlobSink`] that rechunks whatever the object provider produces into
/// writes of at most `chunk_size` bytes against one OS path.
///
/// Once the command's token is cancelled nothing more reaches the OS.
pub struct OsWriteSink {
    provider: Arc<dyn VirtualizationInstance>,
    path: String,
    chunk_size: usize,
    cancel: CancellationToken,
    pending: Vec<u8>,
    /// Offset of the first byte in `pending`.
    flushed: u64,
}

impl OsWriteSink {
    pub fn new(
        provider: Arc<dyn VirtualizationInstance>,
        path: impl Into<String>,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            provider,
            path: path.into(),
            chunk_size,
            cancel,
            pending: Vec::with_capacity(chunk_size),
            flushed: 0,
        }
    }

    /// Bytes handed to the OS so far.
    pub fn written(&self) -> u64 {
        self.flushed
    }

    /// Write out whatever is still buffered.
    pub async fn finish(&mut self) -> Result<u64, ProjectionError> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.emit(&tail).await?;
        }
        Ok(self.flushed)
    }

    async fn emit(&mut self, bytes: &[u8]) -> Result<(), ProjectionError> {
        if self.cancel.is_cancelled() {
            return Err(ProjectionError::Cancelled);
        }
        match self.provider.write_file_contents(&self.path, self.flushed, bytes).await {
            ProviderResult::Success => {
                self.flushed += bytes.len() as u64;
                Ok(())
            }
            other => Err(provider_error(other, &self.path)),
        }
    }
}

#[async_trait]
impl BlobSink for OsWriteSink {
    async fn write_chunk(&mut self, offset: u64, bytes: &[u8]) -> Result<(), ProjectionError> {
        let expected = self.flushed + self.pending.len() as u64;
        if offset != expected {
            return Err(ProjectionError::Io(format!(
                "out-of-order blob chunk for {}: offset {offset}, expected {expected}",
                self.path
            )));
        }

        let mut rest = bytes;
        while !rest.is_empty() {
            let room = self.chunk_size - self.pending.len();
            let (head, tail) = rest.split_at(room.min(rest.len()));
            self.pending.extend_from_slice(head);
            rest = tail;
            if self.pending.len() == self.chunk_size {
                let full = std::mem::take(&mut self.pending);
                self.emit(&full).await?;
                self.pending = full;
                self.pending.clear();
            }
        }
        Ok(())
    }
}

/// Map a failed provider write into the error taxonomy.
pub(crate) fn provider_error(result: ProviderResult, path: &str) -> ProjectionError {
    match result {
        ProviderResult::PathNotFound => ProjectionError::PathNotFound(path.to_string()),
        ProviderResult::AccessDenied => ProjectionError::AccessDenied(path.to_string()),
        ProviderResult::InvalidArgs => ProjectionError::InvalidPath(path.to_string()),
        ProviderResult::Unsupported => ProjectionError::Unsupported("provider operation"),
        ProviderResult::Pending => ProjectionError::Cancelled,
        ProviderResult::Success | ProviderResult::IoError => {
            ProjectionError::Io(format!("provider write failed for {path}"))
        }
    }
}
