//! # In-Memory Object Store
//!
//! A [`MemoryObjectStore`] backs tests and single-process local runs.
//! It honors the same contract as the HTTP implementation — idempotent
//! bucket creation and deletes, `NotFound` for missing buckets, 1-based
//! multipart parts with etag verification on completion — so code under
//! test cannot tell the difference.
//!
//! Timestamps default to the wall clock; [`set_last_modified`] lets
//! retention tests stage objects with controlled recency.
//!
//! [`set_last_modified`]: MemoryObjectStore::set_last_modified

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::object_store::{CompletedPart, ObjectMeta, ObjectStore, UploadId};

/// In-memory store state. Cheap to clone; clones share the same buckets.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    buckets: DashMap<String, Arc<BucketState>>,
    upload_seq: AtomicU64,
}

#[derive(Default)]
struct BucketState {
    objects: DashMap<String, StoredObject>,
    uploads: DashMap<String, UploadState>,
}

struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

struct UploadState {
    key: String,
    parts: DashMap<u32, PartData>,
}

struct PartData {
    data: Bytes,
    etag: String,
}

/// Content-derived etag: leading 16 hex chars of the SHA-256.
fn etag_of(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, name: &str) -> Result<Arc<BucketState>, StoreError> {
        self.inner
            .buckets
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::not_found(name, ""))
    }

    /// Override an object's timestamp. Test support for retention
    /// scenarios; returns `false` when the object does not exist.
    pub fn set_last_modified(&self, bucket: &str, key: &str, at: DateTime<Utc>) -> bool {
        let Ok(state) = self.bucket(bucket) else {
            return false;
        };
        let updated = match state.objects.get_mut(key) {
            Some(mut obj) => {
                obj.last_modified = at;
                true
            }
            None => false,
        };
        updated
    }

    /// Number of multipart sessions currently open in a bucket.
    pub fn open_uploads(&self, bucket: &str) -> usize {
        self.bucket(bucket).map(|s| s.uploads.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.inner.buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.inner
            .buckets
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StoreError> {
        let state = self.bucket(bucket)?;
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let state = self.bucket(bucket)?;
        state
            .objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::not_found(bucket, key))
    }

    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMeta>, StoreError> {
        let Ok(state) = self.bucket(bucket) else {
            return Ok(None);
        };
        Ok(state.objects.get(key).map(|o| ObjectMeta {
            key: key.to_string(),
            size: o.data.len() as u64,
            last_modified: o.last_modified,
        }))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectMeta>, StoreError> {
        let state = self.bucket(bucket)?;
        let mut out: Vec<ObjectMeta> = state
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| ObjectMeta {
                key: e.key().clone(),
                size: e.value().data.len() as u64,
                last_modified: e.value().last_modified,
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let state = self.bucket(bucket)?;
        state.objects.remove(key);
        Ok(())
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<UploadId, StoreError> {
        let state = self.bucket(bucket)?;
        let id = format!(
            "upload-{}",
            self.inner.upload_seq.fetch_add(1, Ordering::Relaxed) + 1
        );
        state.uploads.insert(
            id.clone(),
            UploadState {
                key: key.to_string(),
                parts: DashMap::new(),
            },
        );
        Ok(UploadId::new(id))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        data: Bytes,
    ) -> Result<CompletedPart, StoreError> {
        let state = self.bucket(bucket)?;
        let session = state.uploads.get(upload_id.as_str()).ok_or_else(|| {
            StoreError::UnexpectedStatus {
                status: 404,
                context: format!("upload session `{upload_id}` for {bucket}/{key} not found"),
            }
        })?;
        if part_number == 0 {
            return Err(StoreError::UnexpectedStatus {
                status: 400,
                context: "part numbers start at 1".into(),
            });
        }
        let etag = etag_of(&data);
        session.parts.insert(part_number, PartData {
            data,
            etag: etag.clone(),
        });
        Ok(CompletedPart { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError> {
        let state = self.bucket(bucket)?;
        let bad_request = |context: String| StoreError::UnexpectedStatus {
            status: 400,
            context,
        };

        let (_, session) = state.uploads.remove(upload_id.as_str()).ok_or_else(|| {
            StoreError::UnexpectedStatus {
                status: 404,
                context: format!("upload session `{upload_id}` for {bucket}/{key} not found"),
            }
        })?;
        if session.key != key {
            return Err(bad_request(format!(
                "session `{upload_id}` belongs to key `{}`, not `{key}`",
                session.key
            )));
        }
        if parts.is_empty() {
            return Err(bad_request("completion with no parts".into()));
        }
        if !parts
            .windows(2)
            .all(|w| w[0].part_number < w[1].part_number)
        {
            return Err(bad_request("parts not in ascending order".into()));
        }

        let mut assembled = Vec::new();
        for part in &parts {
            let stored = session.parts.get(&part.part_number).ok_or_else(|| {
                bad_request(format!("part {} was never uploaded", part.part_number))
            })?;
            if stored.etag != part.etag {
                return Err(bad_request(format!(
                    "etag mismatch on part {}",
                    part.part_number
                )));
            }
            assembled.extend_from_slice(&stored.data);
        }

        state.objects.insert(
            key.to_string(),
            StoredObject {
                data: Bytes::from(assembled),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        _key: &str,
        upload_id: &UploadId,
    ) -> Result<(), StoreError> {
        let state = self.bucket(bucket)?;
        state.uploads.remove(upload_id.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_bucket_is_idempotent() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        store.create_bucket("b").await.unwrap();
        assert!(store.bucket_exists("b").await.unwrap());
        assert!(!store.bucket_exists("other").await.unwrap());
    }

    #[tokio::test]
    async fn put_into_missing_bucket_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store
            .put_object("nope", "k", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn get_roundtrip_and_missing_key() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        store
            .put_object("b", "k", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        let data = store.get_object("b", "k").await.unwrap();
        assert_eq!(&data[..], b"payload");

        let err = store.get_object("b", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn stat_reports_size_and_absence() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        store
            .put_object("b", "k", Bytes::from_static(b"12345"))
            .await
            .unwrap();
        let meta = store.stat_object("b", "k").await.unwrap().unwrap();
        assert_eq!(meta.size, 5);
        assert!(store.stat_object("b", "other").await.unwrap().is_none());
        // Missing bucket answers the existence question, not an error.
        assert!(store.stat_object("nope", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_sorts() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        for key in ["iris/b.csv", "iris/a.csv", "wine/data.csv"] {
            store
                .put_object("b", key, Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        let listed = store.list_objects("b", "iris/").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["iris/a.csv", "iris/b.csv"]);

        let all = store.list_objects("b", "").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        store
            .put_object("b", "k", Bytes::from_static(b"x"))
            .await
            .unwrap();
        store.remove_object("b", "k").await.unwrap();
        store.remove_object("b", "k").await.unwrap();
        assert!(store.stat_object("b", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn multipart_assembles_in_part_order() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        let id = store.create_multipart("b", "big").await.unwrap();
        let p1 = store
            .upload_part("b", "big", &id, 1, Bytes::from_static(b"aaa"))
            .await
            .unwrap();
        let p2 = store
            .upload_part("b", "big", &id, 2, Bytes::from_static(b"bb"))
            .await
            .unwrap();
        store
            .complete_multipart("b", "big", &id, vec![p1, p2])
            .await
            .unwrap();

        let data = store.get_object("b", "big").await.unwrap();
        assert_eq!(&data[..], b"aaabb");
        assert_eq!(store.open_uploads("b"), 0);
    }

    #[tokio::test]
    async fn complete_rejects_out_of_order_parts() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        let id = store.create_multipart("b", "big").await.unwrap();
        let p1 = store
            .upload_part("b", "big", &id, 1, Bytes::from_static(b"a"))
            .await
            .unwrap();
        let p2 = store
            .upload_part("b", "big", &id, 2, Bytes::from_static(b"b"))
            .await
            .unwrap();
        let err = store
            .complete_multipart("b", "big", &id, vec![p2, p1])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnexpectedStatus { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn complete_rejects_etag_mismatch() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        let id = store.create_multipart("b", "big").await.unwrap();
        let mut p1 = store
            .upload_part("b", "big", &id, 1, Bytes::from_static(b"a"))
            .await
            .unwrap();
        p1.etag = "forged".into();
        let err = store
            .complete_multipart("b", "big", &id, vec![p1])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnexpectedStatus { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn abort_discards_session() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        let id = store.create_multipart("b", "big").await.unwrap();
        store
            .upload_part("b", "big", &id, 1, Bytes::from_static(b"a"))
            .await
            .unwrap();
        store.abort_multipart("b", "big", &id).await.unwrap();
        assert_eq!(store.open_uploads("b"), 0);
        // Aborting again is fine.
        store.abort_multipart("b", "big", &id).await.unwrap();
        // The object never materialized.
        assert!(store.stat_object("b", "big").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn part_zero_rejected() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        let id = store.create_multipart("b", "big").await.unwrap();
        let err = store
            .upload_part("b", "big", &id, 0, Bytes::from_static(b"a"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnexpectedStatus { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn etag_is_content_derived() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        let id = store.create_multipart("b", "k").await.unwrap();
        let a = store
            .upload_part("b", "k", &id, 1, Bytes::from_static(b"same"))
            .await
            .unwrap();
        let b = store
            .upload_part("b", "k", &id, 2, Bytes::from_static(b"same"))
            .await
            .unwrap();
        assert_eq!(a.etag, b.etag);

        let c = store
            .upload_part("b", "k", &id, 3, Bytes::from_static(b"different"))
            .await
            .unwrap();
        assert_ne!(a.etag, c.etag);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        let clone = store.clone();
        clone
            .put_object("b", "k", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(store.stat_object("b", "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn set_last_modified_overrides_timestamp() {
        let store = MemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        store
            .put_object("b", "k", Bytes::from_static(b"x"))
            .await
            .unwrap();
        let at: DateTime<Utc> = "2020-01-01T00:00:00Z".parse().unwrap();
        assert!(store.set_last_modified("b", "k", at));
        let meta = store.stat_object("b", "k").await.unwrap().unwrap();
        assert_eq!(meta.last_modified, at);
        assert!(!store.set_last_modified("b", "absent", at));
    }
}
