//! # Job Queue
//!
//! Accepts training submissions and feeds them to a bounded pool of
//! workers over an mpsc channel. The queue knows nothing about training
//! itself; the job body arrives as a [`JobHandler`].
//!
//! ## Retry Policy
//!
//! A job failing its first attempt is scheduled exactly once more after a
//! fixed delay. The second failure is terminal and records the failed
//! outcome. Watchers see `Retrying` between the attempts.
//!
//! ## Shutdown
//!
//! Workers keep only weak senders, so dropping the last [`JobQueue`]
//! handle closes the channel; workers drain whatever was already queued
//! and exit. Retries scheduled across a shutdown are dropped with a
//! warning.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use yard_core::progress::checkpoint;
use yard_core::{ProgressBoard, ProgressUpdate, RunId, RunOutcome, RunStatus, TrainingSpec};

use crate::error::WorkerError;

/// Submissions waiting behind a full pool before `submit` backpressures.
const QUEUE_DEPTH: usize = 64;

/// One training attempt's worth of inputs.
#[derive(Debug, Clone)]
pub struct Job {
    pub run_id: RunId,
    pub spec: TrainingSpec,
    /// Staged upload for `use_local_dataset` runs.
    pub dataset_path: Option<PathBuf>,
    /// Staged training script, when one was submitted.
    pub script_path: Option<PathBuf>,
    /// 0 on first execution, 1 on the retry.
    pub attempt: u8,
}

/// The job body the pool executes.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> Result<RunOutcome, WorkerError>;
}

/// Cloneable handle for submitting jobs.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
    board: ProgressBoard,
}

impl JobQueue {
    /// Spawns `workers` workers draining a shared channel.
    pub fn start(
        handler: Arc<dyn JobHandler>,
        board: ProgressBoard,
        workers: usize,
        retry_delay: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let receiver = Arc::new(Mutex::new(receiver));
        for worker in 0..workers.max(1) {
            tokio::spawn(worker_loop(
                worker,
                Arc::clone(&receiver),
                Arc::clone(&handler),
                board.clone(),
                sender.downgrade(),
                retry_delay,
            ));
        }
        Self { sender, board }
    }

    /// Enqueues a run under a fresh id and publishes its `queued`
    /// checkpoint.
    pub async fn submit(
        &self,
        spec: TrainingSpec,
        dataset_path: Option<PathBuf>,
        script_path: Option<PathBuf>,
    ) -> Result<RunId, WorkerError> {
        self.submit_job(RunId::new(), spec, dataset_path, script_path)
            .await
    }

    /// Enqueues a run under a caller-chosen id. Callers that stage
    /// uploads into a per-run directory allocate the id first, write the
    /// files, then submit.
    pub async fn submit_job(
        &self,
        run_id: RunId,
        spec: TrainingSpec,
        dataset_path: Option<PathBuf>,
        script_path: Option<PathBuf>,
    ) -> Result<RunId, WorkerError> {
        self.board.publish(
            ProgressUpdate::new(run_id.clone(), checkpoint::QUEUED, "queued")
                .with_status(RunStatus::Queued),
        );
        let job = Job {
            run_id: run_id.clone(),
            spec,
            dataset_path,
            script_path,
            attempt: 0,
        };
        if self.sender.send(job).await.is_err() {
            self.board.publish(
                ProgressUpdate::new(run_id, 0, "job queue is closed")
                    .with_status(RunStatus::Failed),
            );
            return Err(WorkerError::QueueClosed);
        }
        Ok(run_id)
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("capacity", &QUEUE_DEPTH)
            .finish()
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    handler: Arc<dyn JobHandler>,
    board: ProgressBoard,
    retry_sender: mpsc::WeakSender<Job>,
    retry_delay: Duration,
) {
    loop {
        // Hold the receiver lock only for the recv itself so siblings
        // can pick up work while this job runs.
        let job = { receiver.lock().await.recv().await };
        let Some(job) = job else { break };

        let run_id = job.run_id.clone();
        tracing::info!(worker, run_id = %run_id, attempt = job.attempt, "job started");
        match handler.handle(&job).await {
            Ok(outcome) => {
                tracing::info!(worker, run_id = %run_id, status = ?outcome.status, "job finished");
                board.record_outcome(outcome);
            }
            Err(err) if job.attempt == 0 => {
                tracing::warn!(
                    worker,
                    run_id = %run_id,
                    error = %err,
                    delay_secs = retry_delay.as_secs(),
                    "job failed, scheduling retry"
                );
                board.publish(
                    ProgressUpdate::new(
                        run_id.clone(),
                        0,
                        format!("retrying after failure: {err}"),
                    )
                    .with_status(RunStatus::Retrying),
                );
                let retry = Job { attempt: 1, ..job };
                let sender = retry_sender.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(retry_delay).await;
                    let submitted = match sender.upgrade() {
                        Some(sender) => sender.send(retry).await.is_ok(),
                        None => false,
                    };
                    if !submitted {
                        tracing::warn!(run_id = %run_id, "queue closed before the retry ran");
                    }
                });
            }
            Err(err) => {
                tracing::error!(worker, run_id = %run_id, error = %err, "job failed permanently");
                board.record_outcome(RunOutcome {
                    run_id: run_id.clone(),
                    status: RunStatus::Failed,
                    accuracy: None,
                });
            }
        }
    }
    tracing::debug!(worker, "worker exiting");
}
