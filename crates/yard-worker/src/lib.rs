//! # yard-worker
//!
//! Takes a validated training submission and turns it into a finished
//! run: queueing, the retry policy, the job body, the routine seam, and
//! best-effort experiment tracking.
//!
//! ## Flow
//!
//! [`JobQueue`] feeds a bounded worker pool; each job runs through a
//! [`Trainer`], which stages the dataset, archives artifacts, resolves a
//! [`TrainingRoutine`] (built-in via [`RoutineRegistry`] or a submitted
//! script via [`SubprocessRoutine`]), and publishes checkpoints on the
//! shared progress board. A successful run is recorded to the tracking
//! server when one is configured; tracking failures never fail the run.
//!
//! ## Crate Policy
//!
//! The queue owns all terminal outcomes. Handlers report results; only
//! the queue decides whether a failure retries or ends the run.

pub mod error;
pub mod queue;
pub mod routine;
pub mod runner;
pub mod tracking;

pub use error::WorkerError;
pub use queue::{Job, JobHandler, JobQueue};
pub use routine::{
    ProgressSink, RoutineContext, RoutineError, RoutineOutcome, RoutineRegistry,
    SubprocessRoutine, TrainingRoutine, DEFAULT_INTERPRETER,
};
pub use runner::Trainer;
pub use tracking::{TrackingClient, TrackingError, EXPERIMENT_NAME};
