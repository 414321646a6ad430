//! # Artifact Archival
//!
//! Routes a run's artifacts to the right home once training inputs are
//! staged. Where things land depends on the submission:
//!
//! | `use_local_dataset` | `store_artifacts` | dataset | script |
//! |---|---|---|---|
//! | `false` | any | not archived | not archived |
//! | `true` | `false` | scratch bucket, retention-bounded | not persisted |
//! | `true` | `true` | named dataset bucket | named script bucket |
//!
//! Named datasets keep their requested name unless it is taken, in which
//! case a numeric suffix is probed (`data.csv`, `data_1.csv`, …) and the
//! rename is announced on the progress board.

use std::path::Path;
use std::sync::Arc;

use yard_core::progress::checkpoint;
use yard_core::{ProgressBoard, ProgressUpdate, RunId, RunStatus, TrainingSpec};

use crate::access::{AccessController, BucketHandle};
use crate::error::StoreError;
use crate::object_store::ObjectStore;
use crate::retention::RetentionManager;
use crate::upload::ChunkedUploader;

/// Probe ceiling for collision renames. A bucket with a thousand
/// same-named datasets is misconfigured, not busy.
const MAX_NAME_PROBES: u32 = 1000;

/// Where one artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub bucket: String,
    pub key: String,
}

/// Everything a run's archival step persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub dataset: Option<StoredArtifact>,
    pub script: Option<StoredArtifact>,
}

/// Per-run artifact router.
pub struct ArchiveCoordinator {
    store: Arc<dyn ObjectStore>,
    access: AccessController,
    retention: Arc<RetentionManager>,
    uploader: ChunkedUploader,
    dataset_bucket: String,
    script_bucket: String,
    board: ProgressBoard,
}

impl ArchiveCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        access: AccessController,
        retention: Arc<RetentionManager>,
        uploader: ChunkedUploader,
        dataset_bucket: impl Into<String>,
        script_bucket: impl Into<String>,
        board: ProgressBoard,
    ) -> Self {
        Self {
            store,
            access,
            retention,
            uploader,
            dataset_bucket: dataset_bucket.into(),
            script_bucket: script_bucket.into(),
            board,
        }
    }

    /// Archives the run's staged artifacts per the routing table.
    ///
    /// Publishes the archival checkpoints around the work; any failure is
    /// published as a terminal failure update before it propagates, so
    /// watchers see why the run died even if the caller's handling is
    /// delayed.
    pub async fn archive_run(
        &self,
        run_id: &RunId,
        spec: &TrainingSpec,
        dataset: Option<&Path>,
        script: Option<&Path>,
    ) -> Result<ArchiveOutcome, StoreError> {
        if !spec.use_local_dataset {
            return Ok(ArchiveOutcome::default());
        }

        self.board.publish(ProgressUpdate::new(
            run_id.clone(),
            checkpoint::ARCHIVE_STARTED,
            "archiving artifacts",
        ));

        let result = if spec.store_artifacts {
            self.archive_to_named_buckets(run_id, spec, dataset, script).await
        } else {
            self.archive_to_scratch(spec, dataset).await
        };

        match result {
            Ok(outcome) => {
                self.board.publish(ProgressUpdate::new(
                    run_id.clone(),
                    checkpoint::ARCHIVE_DONE,
                    "artifacts archived",
                ));
                Ok(outcome)
            }
            Err(err) => {
                tracing::error!(run_id = %run_id, error = %err, "artifact archival failed");
                self.board.publish(
                    ProgressUpdate::new(
                        run_id.clone(),
                        0,
                        format!("artifact archival failed: {err}"),
                    )
                    .with_status(RunStatus::Failed),
                );
                Err(err)
            }
        }
    }

    /// Scratch path: the dataset lands under the run's name and old
    /// prefixes get swept. The script is not persisted.
    async fn archive_to_scratch(
        &self,
        spec: &TrainingSpec,
        dataset: Option<&Path>,
    ) -> Result<ArchiveOutcome, StoreError> {
        let dataset = require_dataset(dataset)?;
        let stored = self
            .retention
            .store_with_retention(
                &spec.run_name,
                &[dataset.to_path_buf()],
                &self.uploader,
            )
            .await?
            .into_iter()
            .next()
            .map(|key| StoredArtifact {
                bucket: self.retention.bucket().to_string(),
                key,
            });
        Ok(ArchiveOutcome { dataset: stored, script: None })
    }

    /// Named-bucket path: password check, collision-resolved dataset
    /// name, sidecar metadata, and the script filed under the run id.
    async fn archive_to_named_buckets(
        &self,
        run_id: &RunId,
        spec: &TrainingSpec,
        dataset: Option<&Path>,
        script: Option<&Path>,
    ) -> Result<ArchiveOutcome, StoreError> {
        let dataset = require_dataset(dataset)?;
        let basename = basename_of(dataset)?;

        let handle = self
            .access
            .open_bucket(&self.dataset_bucket, spec.bucket_password.as_deref())
            .await?;

        let requested = spec.dataset_name.as_deref().unwrap_or(basename);
        let final_name = self.resolve_free_name(handle.bucket(), requested).await?;
        if final_name != requested {
            tracing::info!(
                run_id = %run_id,
                requested,
                stored_as = %final_name,
                "dataset name taken, renamed"
            );
            self.board.publish(ProgressUpdate::new(
                run_id.clone(),
                checkpoint::ARCHIVE_RENAMED,
                format!("stored as {final_name}"),
            ));
        }

        let dataset_key = format!("{final_name}/{basename}");
        self.uploader
            .upload_file(handle.bucket(), &dataset_key, dataset)
            .await?;
        handle
            .put_dataset_meta(
                &final_name,
                spec.dataset_description.as_deref().unwrap_or(""),
            )
            .await?;

        let script_artifact = match script {
            Some(script_path) => {
                Some(self.archive_script(run_id, script_path).await?)
            }
            None => None,
        };

        Ok(ArchiveOutcome {
            dataset: Some(StoredArtifact {
                bucket: handle.bucket().to_string(),
                key: dataset_key,
            }),
            script: script_artifact,
        })
    }

    /// Scripts are keyed by run id, which is unique, so no probing.
    async fn archive_script(
        &self,
        run_id: &RunId,
        script: &Path,
    ) -> Result<StoredArtifact, StoreError> {
        let handle = self.access.open_bucket(&self.script_bucket, None).await?;
        let key = format!("{run_id}/{}", basename_of(script)?);
        self.uploader.upload_file(handle.bucket(), &key, script).await?;
        Ok(StoredArtifact { bucket: handle.bucket().to_string(), key })
    }

    /// Finds the first free dataset name, starting from `requested` and
    /// probing numeric suffixes. A name is taken when the exact key
    /// exists or anything lives under its prefix.
    async fn resolve_free_name(
        &self,
        bucket: &str,
        requested: &str,
    ) -> Result<String, StoreError> {
        if !self.name_taken(bucket, requested).await? {
            return Ok(requested.to_string());
        }
        for n in 1..=MAX_NAME_PROBES {
            let candidate = numbered_name(requested, n);
            if !self.name_taken(bucket, &candidate).await? {
                return Ok(candidate);
            }
        }
        Err(StoreError::UnexpectedStatus {
            status: 409,
            context: format!(
                "no free name for dataset {requested:?} after {MAX_NAME_PROBES} probes"
            ),
        })
    }

    async fn name_taken(&self, bucket: &str, name: &str) -> Result<bool, StoreError> {
        if self.store.stat_object(bucket, name).await?.is_some() {
            return Ok(true);
        }
        let under_prefix = self
            .store
            .list_objects(bucket, &format!("{name}/"))
            .await?;
        Ok(!under_prefix.is_empty())
    }
}

impl std::fmt::Debug for ArchiveCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveCoordinator")
            .field("dataset_bucket", &self.dataset_bucket)
            .field("script_bucket", &self.script_bucket)
            .finish()
    }
}

fn require_dataset(dataset: Option<&Path>) -> Result<&Path, StoreError> {
    dataset.ok_or_else(|| {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "local dataset requested but no dataset file was staged",
        ))
    })
}

fn basename_of(path: &Path) -> Result<&str, StoreError> {
    path.file_name().and_then(|name| name.to_str()).ok_or_else(|| {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path has no usable file name: {}", path.display()),
        ))
    })
}

/// Applies a numeric suffix before the extension: `data.csv` becomes
/// `data_1.csv`, `iris` becomes `iris_1`.
fn numbered_name(name: &str, n: u32) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{name}_{n}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LeaseLocks;
    use crate::memory::MemoryObjectStore;
    use bytes::Bytes;
    use std::io::Write;
    use tokio::sync::broadcast::error::TryRecvError;

    const SCRATCH: &str = "scratch-datasets";
    const DATASETS: &str = "open-datasets";
    const SCRIPTS: &str = "training-scripts";

    struct Fixture {
        store: MemoryObjectStore,
        board: ProgressBoard,
        coordinator: ArchiveCoordinator,
    }

    fn fixture() -> Fixture {
        let store = MemoryObjectStore::new();
        let shared: Arc<dyn ObjectStore> = Arc::new(store.clone());
        let board = ProgressBoard::default();
        let retention = Arc::new(RetentionManager::new(
            Arc::clone(&shared),
            Arc::new(LeaseLocks::new()),
            SCRATCH,
            7,
        ));
        let coordinator = ArchiveCoordinator::new(
            Arc::clone(&shared),
            AccessController::new(Arc::clone(&shared)),
            retention,
            ChunkedUploader::new(Arc::clone(&shared), 1024),
            DATASETS,
            SCRIPTS,
            board.clone(),
        );
        Fixture { store, board, coordinator }
    }

    fn spec(use_local: bool, store_artifacts: bool) -> TrainingSpec {
        TrainingSpec {
            run_name: "exp-1".into(),
            routine: "subprocess".into(),
            use_local_dataset: use_local,
            store_artifacts,
            dataset_name: None,
            dataset_description: Some("test data".into()),
            bucket_password: None,
            hyperparams: Default::default(),
        }
    }

    fn temp_named(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    fn drain_progress(
        rx: &mut tokio::sync::broadcast::Receiver<ProgressUpdate>,
    ) -> Vec<ProgressUpdate> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(update) => events.push(update),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
        events
    }

    #[tokio::test]
    async fn remote_dataset_archives_nothing() {
        let fx = fixture();
        let mut rx = fx.board.subscribe();
        let run_id = RunId::new();

        let outcome = fx
            .coordinator
            .archive_run(&run_id, &spec(false, true), None, None)
            .await
            .unwrap();

        assert_eq!(outcome, ArchiveOutcome::default());
        assert!(drain_progress(&mut rx).is_empty(), "no checkpoints for the no-op row");
        assert!(!fx.store.bucket_exists(SCRATCH).await.unwrap());
    }

    #[tokio::test]
    async fn local_untracked_dataset_goes_to_scratch() {
        let fx = fixture();
        let mut rx = fx.board.subscribe();
        let run_id = RunId::new();
        let dir = tempfile::tempdir().unwrap();
        let dataset = temp_named(&dir, "data.csv", b"a,b\n");
        let script = temp_named(&dir, "train.py", b"print('hi')\n");

        let outcome = fx
            .coordinator
            .archive_run(&run_id, &spec(true, false), Some(&dataset), Some(&script))
            .await
            .unwrap();

        let stored = outcome.dataset.unwrap();
        assert_eq!(stored.bucket, SCRATCH);
        assert_eq!(stored.key, "exp-1/data.csv");
        assert!(outcome.script.is_none(), "scratch runs do not persist the script");
        assert!(!fx.store.bucket_exists(SCRIPTS).await.unwrap());

        let checkpoints: Vec<u8> = drain_progress(&mut rx).iter().map(|u| u.progress).collect();
        assert_eq!(checkpoints, vec![checkpoint::ARCHIVE_STARTED, checkpoint::ARCHIVE_DONE]);
    }

    #[tokio::test]
    async fn stored_dataset_goes_to_named_buckets_with_sidecars() {
        let fx = fixture();
        let run_id = RunId::new();
        let dir = tempfile::tempdir().unwrap();
        let dataset = temp_named(&dir, "data.csv", b"a,b\n1,2\n");
        let script = temp_named(&dir, "train.py", b"print('hi')\n");

        let outcome = fx
            .coordinator
            .archive_run(&run_id, &spec(true, true), Some(&dataset), Some(&script))
            .await
            .unwrap();

        let stored = outcome.dataset.unwrap();
        assert_eq!(stored.bucket, DATASETS);
        assert_eq!(stored.key, "data.csv/data.csv");
        let script_artifact = outcome.script.unwrap();
        assert_eq!(script_artifact.bucket, SCRIPTS);
        assert_eq!(script_artifact.key, format!("{run_id}/train.py"));

        let raw = fx
            .store
            .get_object(DATASETS, "data.csv/.dataset_meta")
            .await
            .unwrap();
        let text = std::str::from_utf8(&raw).unwrap();
        assert!(text.contains("description=test data"));
        assert!(fx
            .store
            .stat_object(DATASETS, ".data.csv.dataset_meta")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn explicit_dataset_name_wins_over_the_file_name() {
        let fx = fixture();
        let run_id = RunId::new();
        let dir = tempfile::tempdir().unwrap();
        let dataset = temp_named(&dir, "data.csv", b"a,b\n");
        let mut spec = spec(true, true);
        spec.dataset_name = Some("iris".into());

        let outcome = fx
            .coordinator
            .archive_run(&run_id, &spec, Some(&dataset), None)
            .await
            .unwrap();

        assert_eq!(outcome.dataset.unwrap().key, "iris/data.csv");
    }

    #[tokio::test]
    async fn taken_name_is_renamed_and_announced() {
        let fx = fixture();
        let mut rx = fx.board.subscribe();
        let run_id = RunId::new();
        let dir = tempfile::tempdir().unwrap();
        let dataset = temp_named(&dir, "data.csv", b"a,b\n");
        let mut spec = spec(true, true);
        spec.dataset_name = Some("iris".into());
        // "iris" and "iris_1" are already occupied.
        fx.store.create_bucket(DATASETS).await.unwrap();
        fx.store
            .put_object(DATASETS, "iris/old.csv", Bytes::from_static(b"x"))
            .await
            .unwrap();
        fx.store
            .put_object(DATASETS, "iris_1/old.csv", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let outcome = fx
            .coordinator
            .archive_run(&run_id, &spec, Some(&dataset), None)
            .await
            .unwrap();

        assert_eq!(outcome.dataset.unwrap().key, "iris_2/data.csv");
        let events = drain_progress(&mut rx);
        let renamed = events
            .iter()
            .find(|u| u.progress == checkpoint::ARCHIVE_RENAMED)
            .expect("rename checkpoint");
        assert_eq!(renamed.message, "stored as iris_2");
    }

    #[tokio::test]
    async fn rename_suffix_goes_before_the_extension() {
        let fx = fixture();
        let run_id = RunId::new();
        let dir = tempfile::tempdir().unwrap();
        let dataset = temp_named(&dir, "data.csv", b"a,b\n");
        fx.store.create_bucket(DATASETS).await.unwrap();
        // The file-derived name "data.csv" is taken as an exact key.
        fx.store
            .put_object(DATASETS, "data.csv", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let outcome = fx
            .coordinator
            .archive_run(&run_id, &spec(true, true), Some(&dataset), None)
            .await
            .unwrap();

        assert_eq!(outcome.dataset.unwrap().key, "data_1.csv/data.csv");
    }

    #[tokio::test]
    async fn wrong_password_fails_closed_and_publishes_failure() {
        let fx = fixture();
        let run_id = RunId::new();
        let dir = tempfile::tempdir().unwrap();
        let dataset = temp_named(&dir, "data.csv", b"a,b\n");
        // Someone else owns the dataset bucket with a password.
        AccessController::new(Arc::new(fx.store.clone()))
            .open_bucket(DATASETS, Some("owner-secret"))
            .await
            .unwrap();
        let mut spec = spec(true, true);
        spec.bucket_password = Some("wrong".into());

        let err = fx
            .coordinator
            .archive_run(&run_id, &spec, Some(&dataset), None)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::PermissionDenied { .. }));
        let snapshot = fx.board.snapshot(&run_id).expect("failure published");
        assert_eq!(snapshot.progress, 0);
        assert_eq!(snapshot.status, Some(RunStatus::Failed));
        assert!(snapshot.message.contains("archival failed"));
    }

    #[tokio::test]
    async fn missing_staged_dataset_is_reported() {
        let fx = fixture();
        let run_id = RunId::new();

        let err = fx
            .coordinator
            .archive_run(&run_id, &spec(true, false), None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(fx.board.snapshot(&run_id).unwrap().status, Some(RunStatus::Failed));
    }

    #[test]
    fn numbered_name_handles_extensions() {
        assert_eq!(numbered_name("data.csv", 1), "data_1.csv");
        assert_eq!(numbered_name("iris", 2), "iris_2");
        assert_eq!(numbered_name("archive.tar.gz", 3), "archive.tar_3.gz");
        assert_eq!(numbered_name(".hidden", 1), ".hidden_1");
    }
}
