//! # Dataset Fetch
//!
//! Materializes a stored dataset into a run's working directory. A
//! dataset is everything under its name's prefix, minus sidecar meta
//! objects. Single-file datasets come down as one file, multi-file
//! datasets as a directory tree mirroring their keys.

use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::object_store::ObjectStore;

/// Downloads dataset `name` from `bucket` into `dest_dir`.
///
/// Returns the path training should read: the file itself for a
/// single-object dataset, the dataset directory otherwise. Fails with
/// [`StoreError::NotFound`] when the name matches nothing.
pub async fn fetch_dataset(
    store: &dyn ObjectStore,
    bucket: &str,
    name: &str,
    dest_dir: &Path,
) -> Result<PathBuf, StoreError> {
    let prefix = format!("{name}/");
    let mut objects = store.list_objects(bucket, &prefix).await?;
    objects.retain(|meta| !is_sidecar(&meta.key));

    if objects.is_empty() {
        return fetch_flat_object(store, bucket, name, dest_dir).await;
    }

    tokio::fs::create_dir_all(dest_dir).await?;

    if let [only] = objects.as_slice() {
        let target = dest_dir.join(last_segment(&only.key));
        let data = store.get_object(bucket, &only.key).await?;
        tokio::fs::write(&target, &data).await?;
        tracing::debug!(bucket, key = %only.key, "fetched single-file dataset");
        return Ok(target);
    }

    let root = dest_dir.join(name);
    for meta in &objects {
        let Some(relative) = meta.key.strip_prefix(&prefix) else {
            continue;
        };
        if relative.is_empty() || relative.split('/').any(|seg| seg == "..") {
            tracing::warn!(bucket, key = %meta.key, "skipping unsafe dataset key");
            continue;
        }
        let target = root.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = store.get_object(bucket, &meta.key).await?;
        tokio::fs::write(&target, &data).await?;
    }
    tracing::debug!(bucket, name, files = objects.len(), "fetched dataset directory");
    Ok(root)
}

/// Datasets stored before prefix layout live at their bare name.
async fn fetch_flat_object(
    store: &dyn ObjectStore,
    bucket: &str,
    name: &str,
    dest_dir: &Path,
) -> Result<PathBuf, StoreError> {
    if store.stat_object(bucket, name).await?.is_none() {
        return Err(StoreError::not_found(bucket, format!("{name}/")));
    }
    tokio::fs::create_dir_all(dest_dir).await?;
    let target = dest_dir.join(last_segment(name));
    let data = store.get_object(bucket, name).await?;
    tokio::fs::write(&target, &data).await?;
    Ok(target)
}

fn is_sidecar(key: &str) -> bool {
    last_segment(key).starts_with('.')
}

fn last_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
