//! # Chunked Uploads
//!
//! Splits large payloads into fixed-size parts and drives the store's
//! multipart protocol. Payloads below the chunk size go up as a single
//! `PUT`.
//!
//! ## Failure Handling
//!
//! When any part or the completion call fails, the session is aborted so
//! the store does not accumulate orphaned part data, and the original
//! failure is reported as [`StoreError::UploadAborted`].

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;

use crate::error::StoreError;
use crate::object_store::{CompletedPart, ObjectStore, UploadId};

/// What an upload left in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Final object key.
    pub key: String,
    /// Uploaded size in bytes.
    pub size: u64,
    /// Number of parts sent. `1` for single-shot uploads.
    pub parts: u32,
}

/// Uploads files and buffers, switching to multipart at the chunk size.
#[derive(Clone)]
pub struct ChunkedUploader {
    store: Arc<dyn ObjectStore>,
    chunk_bytes: usize,
}

impl ChunkedUploader {
    /// A chunk size below one byte cannot make progress.
    pub fn new(store: Arc<dyn ObjectStore>, chunk_bytes: usize) -> Self {
        Self { store, chunk_bytes: chunk_bytes.max(1) }
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Uploads the file at `path` to `bucket`/`key`.
    pub async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<UploadReport, StoreError> {
        let size = tokio::fs::metadata(path).await?.len();
        if (size as usize) < self.chunk_bytes {
            let data = tokio::fs::read(path).await?;
            self.store.put_object(bucket, key, Bytes::from(data)).await?;
            return Ok(UploadReport { key: key.to_string(), size, parts: 1 });
        }

        let upload = self.store.create_multipart(bucket, key).await?;
        let mut file = tokio::fs::File::open(path).await?;
        let mut completed = Vec::new();
        let mut part_number = 1u32;
        loop {
            let chunk = match read_chunk(&mut file, self.chunk_bytes).await {
                Ok(chunk) => chunk,
                Err(err) => return Err(self.abort(bucket, key, &upload, err.into()).await),
            };
            if chunk.is_empty() {
                break;
            }
            let short_read = chunk.len() < self.chunk_bytes;
            match self
                .store
                .upload_part(bucket, key, &upload, part_number, chunk)
                .await
            {
                Ok(part) => completed.push(part),
                Err(err) => return Err(self.abort(bucket, key, &upload, err).await),
            }
            if short_read {
                break;
            }
            part_number += 1;
        }

        self.finish(bucket, key, upload, completed, size).await
    }

    /// Uploads an in-memory buffer to `bucket`/`key`.
    pub async fn upload_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<UploadReport, StoreError> {
        let size = data.len() as u64;
        if data.len() < self.chunk_bytes {
            self.store.put_object(bucket, key, data).await?;
            return Ok(UploadReport { key: key.to_string(), size, parts: 1 });
        }

        let upload = self.store.create_multipart(bucket, key).await?;
        let mut completed = Vec::new();
        let mut offset = 0usize;
        let mut part_number = 1u32;
        while offset < data.len() {
            let end = (offset + self.chunk_bytes).min(data.len());
            match self
                .store
                .upload_part(bucket, key, &upload, part_number, data.slice(offset..end))
                .await
            {
                Ok(part) => completed.push(part),
                Err(err) => return Err(self.abort(bucket, key, &upload, err).await),
            }
            offset = end;
            part_number += 1;
        }

        self.finish(bucket, key, upload, completed, size).await
    }

    async fn finish(
        &self,
        bucket: &str,
        key: &str,
        upload: UploadId,
        parts: Vec<CompletedPart>,
        size: u64,
    ) -> Result<UploadReport, StoreError> {
        let part_count = parts.len() as u32;
        if let Err(err) = self
            .store
            .complete_multipart(bucket, key, &upload, parts)
            .await
        {
            return Err(self.abort(bucket, key, &upload, err).await);
        }
        Ok(UploadReport { key: key.to_string(), size, parts: part_count })
    }

    /// Aborts the session and wraps `cause`. Abort failures are logged,
    /// not surfaced; the original failure is what the caller acts on.
    async fn abort(
        &self,
        bucket: &str,
        key: &str,
        upload: &UploadId,
        cause: StoreError,
    ) -> StoreError {
        if let Err(abort_err) = self.store.abort_multipart(bucket, key, upload).await {
            tracing::warn!(
                bucket,
                key,
                error = %abort_err,
                "failed to abort multipart upload"
            );
        }
        StoreError::UploadAborted { key: key.to_string(), cause: Box::new(cause) }
    }
}

impl std::fmt::Debug for ChunkedUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedUploader")
            .field("chunk_bytes", &self.chunk_bytes)
            .finish()
    }
}

/// Reads up to `limit` bytes, returning short only at end of file.
async fn read_chunk(
    file: &mut tokio::fs::File,
    limit: usize,
) -> std::io::Result<Bytes> {
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}
