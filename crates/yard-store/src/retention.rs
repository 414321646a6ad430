//! # Scratch Retention
//!
//! Keeps the scratch bucket bounded: datasets land under a per-run prefix,
//! and after every store the oldest prefixes beyond the keep limit are
//! evicted. Recency is the newest object inside a prefix, so a dataset
//! that keeps receiving files stays fresh as a whole.
//!
//! ## Concurrency
//!
//! Enforcement runs under an advisory lock. A pass that cannot take the
//! lock skips silently; the bucket is swept again on the next store.
//! Individual delete failures are logged and skipped so one stuck object
//! cannot hold the whole sweep hostage.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::lock::LockManager;
use crate::object_store::{ObjectMeta, ObjectStore};
use crate::upload::ChunkedUploader;

const LOCK_TTL: Duration = Duration::from_secs(60);

/// Bounded retention over one scratch bucket.
pub struct RetentionManager {
    store: Arc<dyn ObjectStore>,
    locks: Arc<dyn LockManager>,
    bucket: String,
    keep: usize,
}

impl RetentionManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        locks: Arc<dyn LockManager>,
        bucket: impl Into<String>,
        keep: usize,
    ) -> Self {
        Self { store, locks, bucket: bucket.into(), keep }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Uploads `files` under `{prefix}/{basename}` and then enforces the
    /// keep limit. Returns the stored keys in input order.
    pub async fn store_with_retention(
        &self,
        prefix: &str,
        files: &[PathBuf],
        uploader: &ChunkedUploader,
    ) -> Result<Vec<String>, StoreError> {
        self.store.create_bucket(&self.bucket).await?;
        let mut keys = Vec::with_capacity(files.len());
        for file in files {
            let basename = file
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("path has no usable file name: {}", file.display()),
                    )
                })?;
            let key = format!("{prefix}/{basename}");
            uploader.upload_file(&self.bucket, &key, file).await?;
            keys.push(key);
        }
        self.enforce().await?;
        Ok(keys)
    }

    /// Evicts the oldest prefixes beyond the keep limit.
    ///
    /// Skips the sweep when the retention lock is held elsewhere; the
    /// caller's store still succeeded, so this returns Ok.
    pub async fn enforce(&self) -> Result<(), StoreError> {
        let scope = format!("retention:{}", self.bucket);
        let Some(_guard) = self.locks.try_acquire(&scope, LOCK_TTL) else {
            tracing::warn!(bucket = %self.bucket, "retention lock held, skipping sweep");
            return Ok(());
        };

        let objects = self.store.list_objects(&self.bucket, "").await?;
        let groups = group_by_prefix(&objects);
        if groups.len() <= self.keep {
            return Ok(());
        }

        for group in &groups[self.keep..] {
            let mut removed = 0usize;
            for key in &group.keys {
                match self.store.remove_object(&self.bucket, key).await {
                    Ok(()) => removed += 1,
                    Err(err) => {
                        tracing::warn!(
                            bucket = %self.bucket,
                            key = %key,
                            error = %err,
                            "failed to delete object during eviction"
                        );
                    }
                }
            }
            tracing::info!(
                bucket = %self.bucket,
                prefix = %group.prefix,
                removed,
                total = group.keys.len(),
                "evicted scratch prefix"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for RetentionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionManager")
            .field("bucket", &self.bucket)
            .field("keep", &self.keep)
            .finish()
    }
}

struct PrefixGroup {
    prefix: String,
    newest: DateTime<Utc>,
    keys: Vec<String>,
}

/// Groups objects by top-level prefix, newest group first.
///
/// Keys whose first segment is dot-prefixed are infrastructure
/// (`.bucket_meta`, root sidecars) and are never grouped or evicted.
/// Sidecars inside a prefix belong to that prefix and leave with it.
/// Ties in recency order alphabetically.
fn group_by_prefix(objects: &[ObjectMeta]) -> Vec<PrefixGroup> {
    let mut by_prefix: BTreeMap<&str, PrefixGroup> = BTreeMap::new();
    for object in objects {
        let prefix = match object.key.split_once('/') {
            Some((head, _)) => head,
            None => object.key.as_str(),
        };
        if prefix.starts_with('.') {
            continue;
        }
        let group = by_prefix.entry(prefix).or_insert_with(|| PrefixGroup {
            prefix: prefix.to_string(),
            newest: object.last_modified,
            keys: Vec::new(),
        });
        group.newest = group.newest.max(object.last_modified);
        group.keys.push(object.key.clone());
    }
    let mut groups: Vec<PrefixGroup> = by_prefix.into_values().collect();
    groups.sort_by(|a, b| b.newest.cmp(&a.newest));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LeaseLocks;
    use crate::memory::MemoryObjectStore;
    use crate::object_store::{CompletedPart, UploadId};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeDelta;
    use proptest::prelude::*;
    use std::io::Write;

    const BUCKET: &str = "scratch-datasets";

    fn manager(store: MemoryObjectStore, keep: usize) -> RetentionManager {
        RetentionManager::new(Arc::new(store), Arc::new(LeaseLocks::new()), BUCKET, keep)
    }

    fn stamp(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    /// Seeds `prefix/data.bin` and pins its mtime to `secs`.
    async fn seed(store: &MemoryObjectStore, prefix: &str, secs: i64) {
        let key = format!("{prefix}/data.bin");
        store.put_object(BUCKET, &key, Bytes::from_static(b"x")).await.unwrap();
        assert!(store.set_last_modified(BUCKET, &key, stamp(secs)));
    }

    async fn surviving_prefixes(store: &MemoryObjectStore) -> Vec<String> {
        let mut prefixes: Vec<String> = store
            .list_objects(BUCKET, "")
            .await
            .unwrap()
            .into_iter()
            .filter_map(|m| m.key.split_once('/').map(|(head, _)| head.to_string()))
            .filter(|p| !p.starts_with('.'))
            .collect();
        prefixes.sort();
        prefixes.dedup();
        prefixes
    }

    #[tokio::test]
    async fn under_the_limit_nothing_is_evicted() {
        let store = MemoryObjectStore::new();
        store.create_bucket(BUCKET).await.unwrap();
        for (i, prefix) in ["a", "b", "c"].iter().enumerate() {
            seed(&store, prefix, i as i64).await;
        }

        manager(store.clone(), 7).enforce().await.unwrap();

        assert_eq!(surviving_prefixes(&store).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn exactly_at_the_limit_nothing_is_evicted() {
        let store = MemoryObjectStore::new();
        store.create_bucket(BUCKET).await.unwrap();
        for i in 0..7 {
            seed(&store, &format!("run{i}"), i).await;
        }

        manager(store.clone(), 7).enforce().await.unwrap();

        assert_eq!(surviving_prefixes(&store).await.len(), 7);
    }

    #[tokio::test]
    async fn oldest_prefixes_beyond_the_limit_are_evicted() {
        let store = MemoryObjectStore::new();
        store.create_bucket(BUCKET).await.unwrap();
        // run0 and run1 are the oldest.
        for i in 0..9 {
            seed(&store, &format!("run{i}"), i).await;
        }

        manager(store.clone(), 7).enforce().await.unwrap();

        let left = surviving_prefixes(&store).await;
        assert_eq!(left.len(), 7);
        assert!(!left.contains(&"run0".to_string()));
        assert!(!left.contains(&"run1".to_string()));
        assert!(left.contains(&"run8".to_string()));
    }

    #[tokio::test]
    async fn recency_is_the_newest_object_in_the_group() {
        let store = MemoryObjectStore::new();
        store.create_bucket(BUCKET).await.unwrap();
        // "mixed" holds an ancient file and a brand-new one; its newest
        // object must carry the whole group.
        seed(&store, "mixed", 0).await;
        store
            .put_object(BUCKET, "mixed/fresh.bin", Bytes::from_static(b"y"))
            .await
            .unwrap();
        assert!(store.set_last_modified(BUCKET, "mixed/fresh.bin", stamp(100)));
        seed(&store, "middle", 50).await;

        manager(store.clone(), 1).enforce().await.unwrap();

        assert_eq!(surviving_prefixes(&store).await, vec!["mixed"]);
    }

    #[tokio::test]
    async fn dot_prefixed_root_keys_are_never_evicted() {
        let store = MemoryObjectStore::new();
        store.create_bucket(BUCKET).await.unwrap();
        store
            .put_object(BUCKET, ".bucket_meta", Bytes::from_static(b"password=open\n"))
            .await
            .unwrap();
        for i in 0..5 {
            seed(&store, &format!("run{i}"), i).await;
        }

        manager(store.clone(), 2).enforce().await.unwrap();

        assert!(store.stat_object(BUCKET, ".bucket_meta").await.unwrap().is_some());
        assert_eq!(surviving_prefixes(&store).await.len(), 2);
    }

    #[tokio::test]
    async fn sidecar_inside_a_prefix_leaves_with_its_prefix() {
        let store = MemoryObjectStore::new();
        store.create_bucket(BUCKET).await.unwrap();
        seed(&store, "old", 0).await;
        store
            .put_object(BUCKET, "old/.dataset_meta", Bytes::from_static(b"m"))
            .await
            .unwrap();
        assert!(store.set_last_modified(BUCKET, "old/.dataset_meta", stamp(0)));
        seed(&store, "new", 10).await;

        manager(store.clone(), 1).enforce().await.unwrap();

        assert!(store.stat_object(BUCKET, "old/.dataset_meta").await.unwrap().is_none());
        assert_eq!(surviving_prefixes(&store).await, vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn held_lock_skips_the_sweep() {
        let store = MemoryObjectStore::new();
        store.create_bucket(BUCKET).await.unwrap();
        for i in 0..5 {
            seed(&store, &format!("run{i}"), i).await;
        }
        let locks = Arc::new(LeaseLocks::new());
        let _held = locks
            .try_acquire(&format!("retention:{BUCKET}"), Duration::from_secs(60))
            .unwrap();
        let manager =
            RetentionManager::new(Arc::new(store.clone()), locks.clone(), BUCKET, 1);

        manager.enforce().await.unwrap();

        // Nothing was deleted while the lock was held elsewhere.
        assert_eq!(surviving_prefixes(&store).await.len(), 5);
    }

    /// Delegates to memory storage but refuses to delete one key.
    struct StuckObject {
        inner: MemoryObjectStore,
        stuck_key: String,
    }

    #[async_trait]
    impl ObjectStore for StuckObject {
        async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
            self.inner.bucket_exists(bucket).await
        }
        async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
            self.inner.create_bucket(bucket).await
        }
        async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StoreError> {
            self.inner.put_object(bucket, key, data).await
        }
        async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
            self.inner.get_object(bucket, key).await
        }
        async fn stat_object(
            &self,
            bucket: &str,
            key: &str,
        ) -> Result<Option<ObjectMeta>, StoreError> {
            self.inner.stat_object(bucket, key).await
        }
        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
        ) -> Result<Vec<ObjectMeta>, StoreError> {
            self.inner.list_objects(bucket, prefix).await
        }
        async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
            if key == self.stuck_key {
                return Err(StoreError::UnexpectedStatus {
                    status: 500,
                    context: "injected delete failure".into(),
                });
            }
            self.inner.remove_object(bucket, key).await
        }
        async fn create_multipart(&self, bucket: &str, key: &str) -> Result<UploadId, StoreError> {
            self.inner.create_multipart(bucket, key).await
        }
        async fn upload_part(
            &self,
            bucket: &str,
            key: &str,
            upload: &UploadId,
            part_number: u32,
            data: Bytes,
        ) -> Result<CompletedPart, StoreError> {
            self.inner.upload_part(bucket, key, upload, part_number, data).await
        }
        async fn complete_multipart(
            &self,
            bucket: &str,
            key: &str,
            upload: &UploadId,
            parts: Vec<CompletedPart>,
        ) -> Result<(), StoreError> {
            self.inner.complete_multipart(bucket, key, upload, parts).await
        }
        async fn abort_multipart(
            &self,
            bucket: &str,
            key: &str,
            upload: &UploadId,
        ) -> Result<(), StoreError> {
            self.inner.abort_multipart(bucket, key, upload).await
        }
    }

    #[tokio::test]
    async fn a_failed_delete_does_not_stop_the_sweep() {
        let memory = MemoryObjectStore::new();
        memory.create_bucket(BUCKET).await.unwrap();
        seed(&memory, "old1", 0).await;
        seed(&memory, "old2", 1).await;
        seed(&memory, "new", 10).await;
        let stuck = StuckObject { inner: memory.clone(), stuck_key: "old1/data.bin".into() };
        let manager = RetentionManager::new(
            Arc::new(stuck),
            Arc::new(LeaseLocks::new()),
            BUCKET,
            1,
        );

        manager.enforce().await.unwrap();

        // The stuck object survives; everything else old is gone.
        assert!(memory.stat_object(BUCKET, "old1/data.bin").await.unwrap().is_some());
        assert!(memory.stat_object(BUCKET, "old2/data.bin").await.unwrap().is_none());
        assert!(memory.stat_object(BUCKET, "new/data.bin").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn store_with_retention_uploads_then_enforces() {
        let store = MemoryObjectStore::new();
        store.create_bucket(BUCKET).await.unwrap();
        // Pre-existing prefixes, all older than the incoming one.
        for i in 0..3 {
            seed(&store, &format!("run{i}"), i).await;
        }
        let uploader = ChunkedUploader::new(Arc::new(store.clone()), 1024);
        let manager = manager(store.clone(), 2);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"fresh data").unwrap();
        file.flush().unwrap();
        let name = file.path().file_name().unwrap().to_str().unwrap().to_string();

        let keys = manager
            .store_with_retention("incoming", &[file.path().to_path_buf()], &uploader)
            .await
            .unwrap();

        assert_eq!(keys, vec![format!("incoming/{name}")]);
        let left = surviving_prefixes(&store).await;
        assert_eq!(left.len(), 2);
        assert!(left.contains(&"incoming".to_string()), "fresh upload must survive");
    }

    proptest! {
        #[test]
        fn grouping_invariants(
            entries in proptest::collection::vec(
                ("[a-c]", "[a-z]{1,4}", 0i64..1000), 0..40
            ),
            dots in proptest::collection::vec(("[a-z]{1,4}", 0i64..1000), 0..5)
        ) {
            // A listing never repeats a key.
            let mut objects: Vec<ObjectMeta> = Vec::new();
            for (prefix, file, secs) in &entries {
                let key = format!("{prefix}/{file}");
                if objects.iter().all(|o| o.key != key) {
                    objects.push(ObjectMeta { key, size: 1, last_modified: stamp(*secs) });
                }
            }
            let plain = objects.len();
            for (name, secs) in &dots {
                let key = format!(".{name}");
                if objects.iter().all(|o| o.key != key) {
                    objects.push(ObjectMeta { key, size: 1, last_modified: stamp(*secs) });
                }
            }

            let groups = group_by_prefix(&objects);

            let grouped: usize = groups.iter().map(|g| g.keys.len()).sum();
            prop_assert_eq!(grouped, plain, "dot keys never join a group");

            for group in &groups {
                let newest = group
                    .keys
                    .iter()
                    .map(|k| objects.iter().find(|o| &o.key == k).unwrap().last_modified)
                    .max()
                    .unwrap();
                prop_assert_eq!(group.newest, newest);
            }

            for pair in groups.windows(2) {
                prop_assert!(pair[0].newest >= pair[1].newest, "sorted newest first");
            }
        }
    }
}
