//! # Progress Board — Snapshots and Fan-Out
//!
//! Live progress for every run flows through one [`ProgressBoard`]. It
//! keeps two views that are always updated together:
//!
//! - a **last-write-wins snapshot** per run, for point queries
//!   (`GET /api/progress/:run_id` style lookups);
//! - a **broadcast stream** of every published update, for subscribers
//!   (server-sent events, log followers).
//!
//! `publish()` stores the snapshot and then emits the event; a subscriber
//! can lag or be absent without affecting publishers. Terminal outcomes
//! are recorded separately so a finished run keeps its result even after
//! its snapshot is forgotten.
//!
//! ## Checkpoints
//!
//! The job pipeline reports progress at fixed checkpoint values (see
//! [`checkpoint`]); clients key UI stages off them. Routines may publish
//! any value in between while training.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::identity::RunId;

/// Fixed progress values published by the job pipeline.
pub mod checkpoint {
    /// Accepted into the queue.
    pub const QUEUED: u8 = 0;
    /// Training script materialized in the working directory.
    pub const SCRIPT_READY: u8 = 20;
    /// Artifact archiving started.
    pub const ARCHIVE_STARTED: u8 = 21;
    /// A name collision was resolved by renaming the stored dataset.
    pub const ARCHIVE_RENAMED: u8 = 22;
    /// Artifact archiving finished.
    pub const ARCHIVE_DONE: u8 = 23;
    /// Training routine resolved and loaded.
    pub const ROUTINE_LOADED: u8 = 25;
    /// Routine handed the dataset and started.
    pub const TRAINING_STARTED: u8 = 30;
    /// Routine reported near-done; model being saved.
    pub const SAVING_MODEL: u8 = 90;
    /// Run complete.
    pub const DONE: u8 = 100;
}

/// Lifecycle state of a run, carried on updates that change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting in the queue.
    Queued,
    /// Executing on a worker.
    Running,
    /// First attempt failed; rescheduled.
    Retrying,
    /// Finished successfully.
    Succeeded,
    /// Finished in error (terminal).
    Failed,
}

impl RunStatus {
    /// Whether this status ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

/// One progress report for a run.
///
/// `progress` is a percentage clamped to `0..=100` at construction.
/// `accuracy` and `status` ride along only when they change, so most
/// updates serialize as three fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// The run this update belongs to.
    pub run_id: RunId,
    /// Percentage complete, `0..=100`.
    pub progress: u8,
    /// Human-readable stage description.
    pub message: String,
    /// Model accuracy, present on the final successful update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Lifecycle change, present when the status moves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

impl ProgressUpdate {
    /// Create an update, clamping `progress` into `0..=100`.
    pub fn new(run_id: RunId, progress: u8, message: impl Into<String>) -> Self {
        Self {
            run_id,
            progress: progress.min(100),
            message: message.into(),
            accuracy: None,
            status: None,
        }
    }

    /// Attach an accuracy value.
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Attach a status change.
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether this update ends the run.
    pub fn is_terminal(&self) -> bool {
        self.status.map(|s| s.is_terminal()).unwrap_or(false)
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// The finished run.
    pub run_id: RunId,
    /// How it ended.
    pub status: RunStatus,
    /// Final accuracy, when the routine reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Broadcast capacity used by [`ProgressBoard::default`]. A slow
/// subscriber that falls further behind than this sees a lag error and
/// resubscribes; publishers are never blocked.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Shared progress state. Cheap to clone; all clones view the same board.
#[derive(Clone)]
pub struct ProgressBoard {
    inner: Arc<Inner>,
}

struct Inner {
    snapshots: DashMap<RunId, ProgressUpdate>,
    outcomes: DashMap<RunId, RunOutcome>,
    events: broadcast::Sender<ProgressUpdate>,
}

impl ProgressBoard {
    /// Create a board with the given broadcast capacity.
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            inner: Arc::new(Inner {
                snapshots: DashMap::new(),
                outcomes: DashMap::new(),
                events,
            }),
        }
    }

    /// Publish an update: store the snapshot, then emit the event.
    ///
    /// The two views never diverge — an update observable by `snapshot()`
    /// has been sent to subscribers, and vice versa. Absent or lagging
    /// subscribers do not fail a publish.
    pub fn publish(&self, update: ProgressUpdate) {
        self.inner
            .snapshots
            .insert(update.run_id.clone(), update.clone());
        // No receivers is fine; events are best-effort fan-out.
        let _ = self.inner.events.send(update);
    }

    /// Latest update for a run, if any has been published.
    pub fn snapshot(&self, run_id: &RunId) -> Option<ProgressUpdate> {
        self.inner.snapshots.get(run_id).map(|e| e.value().clone())
    }

    /// Subscribe to every subsequently published update.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.inner.events.subscribe()
    }

    /// Record a run's terminal outcome.
    pub fn record_outcome(&self, outcome: RunOutcome) {
        self.inner
            .outcomes
            .insert(outcome.run_id.clone(), outcome);
    }

    /// Terminal outcome for a run, once recorded.
    pub fn outcome(&self, run_id: &RunId) -> Option<RunOutcome> {
        self.inner.outcomes.get(run_id).map(|e| e.value().clone())
    }

    /// Drop a run's snapshot. Outcomes are kept.
    pub fn forget(&self, run_id: &RunId) {
        self.inner.snapshots.remove(run_id);
    }

    /// Number of runs with a live snapshot.
    pub fn tracked_runs(&self) -> usize {
        self.inner.snapshots.len()
    }
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for ProgressBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBoard")
            .field("tracked_runs", &self.tracked_runs())
            .finish()
    }
}
