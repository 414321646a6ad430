//! Worker-side error taxonomy. One enum spans a whole training attempt
//! so the queue can treat any failure uniformly when deciding retries.

use thiserror::Error;

use crate::routine::RoutineError;

/// Anything that can sink a training attempt.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Artifact storage failed (archive, fetch, or staging).
    #[error(transparent)]
    Store(#[from] yard_store::StoreError),

    /// The routine could not be resolved or did not finish.
    #[error(transparent)]
    Routine(#[from] RoutineError),

    /// The submission itself is unusable.
    #[error("invalid training spec: {0}")]
    Spec(#[from] yard_core::ConfigError),

    /// Filesystem trouble in the working directory.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The queue was shut down before the job could be accepted.
    #[error("job queue is closed")]
    QueueClosed,
}
