//! # Bucket Access Control
//!
//! Gatekeeper for named buckets. Opening a bucket either creates it
//! (recording the offered password's digest in `.bucket_meta`) or checks
//! the offered password against the recorded digest. All dataset writes
//! go through the [`BucketHandle`] the open returns, so nothing touches a
//! protected bucket without having passed the check.
//!
//! ## Rules
//!
//! - A missing meta object on an existing bucket means the bucket
//!   pre-dates meta tracking; it is healed as unprotected.
//! - A protected bucket rejects wrong and absent passwords alike.
//! - An unprotected bucket ignores offered passwords; protecting an
//!   existing bucket is not supported.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::StoreError;
use crate::object_store::ObjectStore;
use crate::passwd::{BucketMeta, DatasetMeta, BUCKET_META_KEY};

/// Opens named buckets, enforcing their password policy.
#[derive(Clone)]
pub struct AccessController {
    store: Arc<dyn ObjectStore>,
}

impl AccessController {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Opens `bucket`, creating it on first use.
    ///
    /// A new bucket is stamped with the digest of `password` (the open
    /// sentinel when none). An existing protected bucket returns
    /// [`StoreError::PermissionDenied`] unless `password` matches.
    pub async fn open_bucket(
        &self,
        bucket: &str,
        password: Option<&str>,
    ) -> Result<BucketHandle, StoreError> {
        if !self.store.bucket_exists(bucket).await? {
            let meta = BucketMeta::with_password(password);
            self.store.create_bucket(bucket).await?;
            self.store
                .put_object(bucket, BUCKET_META_KEY, Bytes::from(meta.render()))
                .await?;
            tracing::info!(bucket, protected = meta.is_protected(), "created bucket");
            return Ok(self.handle(bucket, meta.is_protected()));
        }

        let meta = match self.store.get_object(bucket, BUCKET_META_KEY).await {
            Ok(raw) => {
                let text = std::str::from_utf8(&raw).map_err(|_| {
                    StoreError::InvalidMeta("bucket meta is not valid utf-8".into())
                })?;
                BucketMeta::parse(text)?
            }
            Err(err) if err.is_not_found() => {
                // Bucket pre-dates meta tracking; heal it as unprotected.
                let meta = BucketMeta::open();
                self.store
                    .put_object(bucket, BUCKET_META_KEY, Bytes::from(meta.render()))
                    .await?;
                tracing::info!(bucket, "wrote missing bucket meta");
                meta
            }
            Err(err) => return Err(err),
        };

        if meta.is_protected() && !meta.verify(password) {
            tracing::warn!(bucket, "rejected access to protected bucket");
            return Err(StoreError::PermissionDenied { bucket: bucket.to_string() });
        }

        Ok(self.handle(bucket, meta.is_protected()))
    }

    fn handle(&self, bucket: &str, protected: bool) -> BucketHandle {
        BucketHandle {
            store: Arc::clone(&self.store),
            bucket: bucket.to_string(),
            protected,
        }
    }
}

impl std::fmt::Debug for AccessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessController").finish_non_exhaustive()
    }
}

/// Proof of a passed access check on one bucket.
pub struct BucketHandle {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    protected: bool,
}

impl BucketHandle {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    /// Writes both dataset sidecars: `{name}/.dataset_meta` next to the
    /// dataset's objects and `.{name}.dataset_meta` at the bucket root
    /// (the root copy lets browsers describe datasets without listing
    /// into every prefix).
    pub async fn put_dataset_meta(
        &self,
        name: &str,
        description: &str,
    ) -> Result<(), StoreError> {
        let meta = DatasetMeta::new(description, self.bucket.clone(), self.protected);
        let rendered = Bytes::from(meta.render());
        self.store
            .put_object(&self.bucket, &format!("{name}/.dataset_meta"), rendered.clone())
            .await?;
        self.store
            .put_object(&self.bucket, &format!(".{name}.dataset_meta"), rendered)
            .await
    }
}

impl std::fmt::Debug for BucketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketHandle")
            .field("bucket", &self.bucket)
            .field("protected", &self.protected)
            .finish()
    }
}
