//! # Shared Application State
//!
//! One [`AppState`] is built at startup and cloned into every handler.
//! All members are cheap to clone: the store sits behind an `Arc`, and
//! the board and queue are handles over shared internals.

use std::sync::Arc;

use yard_core::{ProgressBoard, YardConfig};
use yard_store::ObjectStore;
use yard_worker::JobQueue;

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    /// Startup configuration; bucket names and the staging root come
    /// from here.
    pub config: YardConfig,
    /// Object-store client, checked by the readiness probe.
    pub store: Arc<dyn ObjectStore>,
    /// Progress snapshots, outcomes, and the live event feed.
    pub board: ProgressBoard,
    /// Submission handle into the worker pool.
    pub queue: JobQueue,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
