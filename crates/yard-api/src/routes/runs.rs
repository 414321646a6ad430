//! Run progress and outcome endpoints.
//!
//! Progress is served two ways: a point-in-time snapshot and an SSE
//! stream that replays the latest checkpoint on connect, then forwards
//! live updates until a terminal one closes it.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use utoipa::ToSchema;

use yard_core::{ProgressUpdate, RunId, RunOutcome, RunStatus};

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

/// Routes served by this module.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/progress/:run_id", get(run_progress))
        .route("/api/progress/:run_id/stream", get(stream_run_progress))
        .route("/api/runs/:run_id/outcome", get(run_outcome))
}

/// A progress checkpoint as served to clients.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressResponse {
    #[schema(value_type = String, example = "86a3a77c-7bbe-4b5e-a7cb-96bc71778a8d")]
    pub run_id: RunId,
    /// Percentage from 0 to 100.
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, example = "running")]
    pub status: Option<RunStatus>,
}

impl From<ProgressUpdate> for ProgressResponse {
    fn from(update: ProgressUpdate) -> Self {
        Self {
            run_id: update.run_id,
            progress: update.progress,
            message: update.message,
            accuracy: update.accuracy,
            status: update.status,
        }
    }
}

/// Terminal result of a run.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OutcomeResponse {
    #[schema(value_type = String, example = "86a3a77c-7bbe-4b5e-a7cb-96bc71778a8d")]
    pub run_id: RunId,
    #[schema(value_type = String, example = "succeeded")]
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl From<RunOutcome> for OutcomeResponse {
    fn from(outcome: RunOutcome) -> Self {
        Self {
            run_id: outcome.run_id,
            status: outcome.status,
            accuracy: outcome.accuracy,
        }
    }
}

/// Latest checkpoint for a run.
#[utoipa::path(
    get,
    path = "/api/progress/{run_id}",
    tag = "progress",
    params(("run_id" = String, Path, description = "Run identifier")),
    responses(
        (status = 200, description = "Latest checkpoint", body = ProgressResponse),
        (status = 404, description = "Run not tracked", body = ErrorBody),
    )
)]
pub async fn run_progress(
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let update = state
        .board
        .snapshot(&run_id)
        .ok_or_else(|| ApiError::not_found(format!("no progress recorded for run {run_id}")))?;
    Ok(Json(update.into()))
}

/// Live checkpoint stream for a run.
#[utoipa::path(
    get,
    path = "/api/progress/{run_id}/stream",
    tag = "progress",
    params(("run_id" = String, Path, description = "Run identifier")),
    responses(
        (status = 200, description = "`text/event-stream` of checkpoints, closed after the terminal one"),
        (status = 404, description = "Run not tracked", body = ErrorBody),
    )
)]
pub async fn stream_run_progress(
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    // Subscribe first; the snapshot may then be replayed by the live
    // feed, and clients treat repeated checkpoints as idempotent.
    let events = state.board.subscribe();
    let snapshot = state
        .board
        .snapshot(&run_id)
        .ok_or_else(|| ApiError::not_found(format!("no progress recorded for run {run_id}")))?;

    let filter_id = run_id.clone();
    let live = BroadcastStream::new(events).filter_map(move |update| {
        futures::future::ready(match update {
            Ok(update) if update.run_id == filter_id => Some(update),
            // Lagged receivers skip ahead; the next update carries the
            // current state.
            _ => None,
        })
    });

    let stream = futures::stream::once(futures::future::ready(snapshot))
        .chain(live)
        .scan(false, |closed, update| {
            let next = if *closed { None } else { Some(update) };
            if let Some(update) = &next {
                *closed = update.is_terminal();
            }
            futures::future::ready(next)
        })
        .map(|update| Event::default().json_data(ProgressResponse::from(update)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Final outcome of a finished run.
#[utoipa::path(
    get,
    path = "/api/runs/{run_id}/outcome",
    tag = "progress",
    params(("run_id" = String, Path, description = "Run identifier")),
    responses(
        (status = 200, description = "Recorded outcome", body = OutcomeResponse),
        (status = 404, description = "Run unknown or still in flight", body = ErrorBody),
    )
)]
pub async fn run_outcome(
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let outcome = state
        .board
        .outcome(&run_id)
        .ok_or_else(|| ApiError::not_found(format!("no outcome recorded for run {run_id}")))?;
    Ok(Json(outcome.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use yard_core::progress::checkpoint;
    use yard_core::{ProgressBoard, YardConfig};
    use yard_store::MemoryObjectStore;
    use yard_worker::{Job, JobHandler, JobQueue, WorkerError};

    /// Succeeds immediately; these tests publish progress by hand.
    struct AckHandler;

    #[async_trait]
    impl JobHandler for AckHandler {
        async fn handle(&self, job: &Job) -> Result<RunOutcome, WorkerError> {
            Ok(RunOutcome {
                run_id: job.run_id.clone(),
                status: RunStatus::Succeeded,
                accuracy: None,
            })
        }
    }

    fn test_state() -> AppState {
        let board = ProgressBoard::default();
        let queue = JobQueue::start(
            Arc::new(AckHandler),
            board.clone(),
            1,
            Duration::from_millis(5),
        );
        AppState {
            config: YardConfig::default(),
            store: Arc::new(MemoryObjectStore::new()),
            board,
            queue,
        }
    }

    async fn get_path(state: AppState, path: &str) -> Response {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        router().with_state(state).oneshot(request).await.unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn unknown_run_progress_is_404() {
        let state = test_state();
        let response = get_path(state, &format!("/api/progress/{}", RunId::new())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.error.code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn snapshot_reflects_the_latest_update() {
        let state = test_state();
        let run_id = RunId::new();
        state.board.publish(
            ProgressUpdate::new(run_id.clone(), 42, "half way")
                .with_status(RunStatus::Running),
        );

        let response = get_path(state, &format!("/api/progress/{run_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: ProgressResponse = body_json(response).await;
        assert_eq!(body.run_id, run_id);
        assert_eq!(body.progress, 42);
        assert_eq!(body.message, "half way");
        assert_eq!(body.status, Some(RunStatus::Running));
    }

    #[tokio::test]
    async fn invalid_run_id_is_a_client_error() {
        let state = test_state();
        let response = get_path(state, "/api/progress/not-a-uuid").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn outcome_is_404_until_recorded() {
        let state = test_state();
        let run_id = RunId::new();
        state
            .board
            .publish(ProgressUpdate::new(run_id.clone(), 30, "training started"));

        let response = get_path(state.clone(), &format!("/api/runs/{run_id}/outcome")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        state.board.record_outcome(RunOutcome {
            run_id: run_id.clone(),
            status: RunStatus::Succeeded,
            accuracy: Some(0.93),
        });
        let response = get_path(state, &format!("/api/runs/{run_id}/outcome")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: OutcomeResponse = body_json(response).await;
        assert_eq!(body.status, RunStatus::Succeeded);
        assert_eq!(body.accuracy, Some(0.93));
    }

    #[tokio::test]
    async fn stream_of_a_finished_run_replays_the_terminal_checkpoint_and_closes() {
        let state = test_state();
        let run_id = RunId::new();
        state.board.publish(
            ProgressUpdate::new(run_id.clone(), checkpoint::DONE, "training complete")
                .with_accuracy(0.91)
                .with_status(RunStatus::Succeeded),
        );

        let response = get_path(state, &format!("/api/progress/{run_id}/stream")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        // Collecting returns only because the terminal event ends the stream.
        let body = body_text(response).await;
        assert!(body.contains("training complete"));
        assert!(body.contains("\"progress\":100"));
    }

    #[tokio::test]
    async fn stream_forwards_live_updates_until_terminal() {
        let state = test_state();
        let board = state.board.clone();
        let run_id = RunId::new();
        board.publish(ProgressUpdate::new(run_id.clone(), 30, "training started"));

        let response = get_path(state, &format!("/api/progress/{run_id}/stream")).await;
        assert_eq!(response.status(), StatusCode::OK);

        // The handler has subscribed by the time headers are out, so these
        // land in its buffer before the body is drained.
        board.publish(ProgressUpdate::new(run_id.clone(), 60, "still going"));
        // Noise for another run must not leak into this stream.
        board.publish(ProgressUpdate::new(RunId::new(), 10, "other run"));
        board.publish(
            ProgressUpdate::new(run_id.clone(), checkpoint::DONE, "training complete")
                .with_status(RunStatus::Succeeded),
        );

        let body = body_text(response).await;
        assert!(body.contains("training started"));
        assert!(body.contains("still going"));
        assert!(body.contains("training complete"));
        assert!(!body.contains("other run"));
    }

    #[tokio::test]
    async fn stream_of_an_unknown_run_is_404() {
        let state = test_state();
        let response = get_path(state, &format!("/api/progress/{}/stream", RunId::new())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
