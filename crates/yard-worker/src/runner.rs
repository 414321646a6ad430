//! # Job Body
//!
//! One training attempt from staged inputs to terminal outcome:
//!
//! 1. create the run's working directory
//! 2. materialize the dataset (staged upload or store fetch)
//! 3. archive artifacts
//! 4. resolve and run the routine
//! 5. record to tracking (best-effort) and publish completion
//!
//! Failures publish a terminal update and propagate to the queue, which
//! owns the retry decision. The working directory is kept across a
//! first-attempt failure because the retry reuses the staged inputs
//! inside it; it is removed on success and after the final attempt.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use yard_core::progress::checkpoint;
use yard_core::{ProgressBoard, ProgressUpdate, RunOutcome, RunStatus};
use yard_store::{fetch_dataset, ArchiveCoordinator, ObjectStore};

use crate::error::WorkerError;
use crate::queue::{Job, JobHandler};
use crate::routine::{
    ProgressSink, RoutineContext, RoutineRegistry, SubprocessRoutine, TrainingRoutine,
    DEFAULT_INTERPRETER,
};
use crate::tracking::TrackingClient;

/// Executes training jobs end to end.
pub struct Trainer {
    store: Arc<dyn ObjectStore>,
    archive: ArchiveCoordinator,
    board: ProgressBoard,
    registry: RoutineRegistry,
    tracking: Option<TrackingClient>,
    dataset_bucket: String,
    work_dir: PathBuf,
    interpreter: String,
}

impl Trainer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        archive: ArchiveCoordinator,
        board: ProgressBoard,
        registry: RoutineRegistry,
        tracking: Option<TrackingClient>,
        dataset_bucket: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            archive,
            board,
            registry,
            tracking,
            dataset_bucket: dataset_bucket.into(),
            work_dir: work_dir.into(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
        }
    }

    /// Interpreter for submitted scripts.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    async fn run_attempt(&self, job: &Job, workdir: &Path) -> Result<RunOutcome, WorkerError> {
        tokio::fs::create_dir_all(workdir).await?;

        let dataset_path = self.materialize_dataset(job, workdir).await?;
        self.publish(job, checkpoint::SCRIPT_READY, "preparing training script");

        self.archive
            .archive_run(
                &job.run_id,
                &job.spec,
                job.dataset_path.as_deref(),
                job.script_path.as_deref(),
            )
            .await?;

        let routine = self.resolve_routine(job)?;
        self.publish(job, checkpoint::ROUTINE_LOADED, "loading training routine");
        self.publish(job, checkpoint::TRAINING_STARTED, "training started");

        let outcome = routine
            .run(RoutineContext {
                run_id: job.run_id.clone(),
                dataset_path,
                hyperparams: job.spec.hyperparams.clone(),
                progress: ProgressSink::new(self.board.clone(), job.run_id.clone()),
            })
            .await?;

        if let Some(tracking) = &self.tracking {
            if let Err(err) = tracking
                .record_run(
                    &job.run_id,
                    &job.spec.run_name,
                    &job.spec.hyperparams,
                    outcome.accuracy,
                )
                .await
            {
                tracing::warn!(
                    run_id = %job.run_id,
                    error = %err,
                    "failed to record run to tracking server"
                );
            }
        }

        self.publish(job, checkpoint::SAVING_MODEL, "saving model");
        let mut done = ProgressUpdate::new(
            job.run_id.clone(),
            checkpoint::DONE,
            "training complete",
        )
        .with_status(RunStatus::Succeeded);
        if let Some(accuracy) = outcome.accuracy {
            done = done.with_accuracy(accuracy);
        }
        self.board.publish(done);

        Ok(RunOutcome {
            run_id: job.run_id.clone(),
            status: RunStatus::Succeeded,
            accuracy: outcome.accuracy,
        })
    }

    /// Hands back the path training reads its data from.
    async fn materialize_dataset(
        &self,
        job: &Job,
        workdir: &Path,
    ) -> Result<PathBuf, WorkerError> {
        if job.spec.use_local_dataset {
            let staged = job.dataset_path.as_deref().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "local dataset requested but no dataset file was staged",
                )
            })?;
            return Ok(staged.to_path_buf());
        }

        let name = job
            .spec
            .dataset_name
            .as_deref()
            .ok_or(yard_core::ConfigError::MissingDatasetName)?;
        let path = fetch_dataset(self.store.as_ref(), &self.dataset_bucket, name, workdir).await?;
        tracing::info!(
            run_id = %job.run_id,
            dataset = name,
            path = %path.display(),
            "fetched dataset"
        );
        Ok(path)
    }

    fn resolve_routine(&self, job: &Job) -> Result<Arc<dyn TrainingRoutine>, WorkerError> {
        match &job.script_path {
            Some(script) => Ok(Arc::new(
                SubprocessRoutine::new(script).with_interpreter(&self.interpreter),
            )),
            None => Ok(self.registry.resolve(&job.spec.routine)?),
        }
    }

    fn publish(&self, job: &Job, progress: u8, message: &str) {
        self.board
            .publish(ProgressUpdate::new(job.run_id.clone(), progress, message));
    }
}

#[async_trait]
impl JobHandler for Trainer {
    async fn handle(&self, job: &Job) -> Result<RunOutcome, WorkerError> {
        let workdir = self.work_dir.join(job.run_id.to_string());
        let result = self.run_attempt(job, &workdir).await;

        // First-attempt failures keep the staged inputs for the retry.
        if result.is_ok() || job.attempt > 0 {
            if let Err(err) = tokio::fs::remove_dir_all(&workdir).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        run_id = %job.run_id,
                        error = %err,
                        "failed to remove working directory"
                    );
                }
            }
        }

        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.board.publish(
                    ProgressUpdate::new(
                        job.run_id.clone(),
                        0,
                        format!("training failed: {err}"),
                    )
                    .with_status(RunStatus::Failed),
                );
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Trainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("dataset_bucket", &self.dataset_bucket)
            .field("work_dir", &self.work_dir)
            .finish()
    }
}
