//! # Object Store Contract
//!
//! The [`ObjectStore`] trait is the seam between the artifact layer and
//! whatever S3-compatible service backs it. Everything above it — the
//! chunked uploader, access control, retention, archival — is written
//! against this trait; two implementations ship with the workspace:
//!
//! - [`HttpObjectStore`](crate::http_store::HttpObjectStore) for real
//!   deployments, speaking path-style HTTP with bearer auth;
//! - [`MemoryObjectStore`](crate::memory::MemoryObjectStore) for tests
//!   and local runs.
//!
//! ## Contract notes
//!
//! - `create_bucket` is idempotent; creating an existing bucket succeeds.
//! - `remove_object` is idempotent; removing an absent key succeeds.
//! - Mutating operations on a missing bucket fail with `NotFound`
//!   (empty key names the bucket itself); callers create buckets first.
//! - `stat_object` answers the existence question without an error path
//!   for absence — `Ok(None)` means "not there", errors mean the store
//!   could not be asked.
//! - Multipart part numbers start at 1, and `complete_multipart` expects
//!   the parts in ascending part-number order.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Identifier of an in-flight multipart upload session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    /// Wrap a store-issued session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier, for request parameters.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Listing entry for one stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Full object key within its bucket.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// When the object was last written.
    pub last_modified: DateTime<Utc>,
}

/// One completed part of a multipart upload, echoed back on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: u32,
    /// Entity tag the store issued for the part.
    pub etag: String,
}

/// Async interface to an S3-compatible object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether the bucket exists.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Create the bucket; succeeds if it already exists.
    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Write a whole object in one request.
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StoreError>;

    /// Read a whole object. `NotFound` when absent.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;

    /// Metadata for an object, or `None` when absent.
    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMeta>, StoreError>;

    /// Recursive listing of every object whose key starts with `prefix`.
    /// An empty prefix lists the whole bucket.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectMeta>, StoreError>;

    /// Delete an object; succeeds if the key is already absent.
    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Open a multipart upload session for `key`.
    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<UploadId, StoreError>;

    /// Upload one part. Part numbers start at 1.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        data: Bytes,
    ) -> Result<CompletedPart, StoreError>;

    /// Finish a session, assembling `parts` (ascending part-number order)
    /// into the final object.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError>;

    /// Discard a session and any parts uploaded so far. Aborting an
    /// already-gone session succeeds.
    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
    ) -> Result<(), StoreError>;
}
