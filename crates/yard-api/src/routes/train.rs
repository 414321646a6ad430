//! Training submission endpoint.
//!
//! `POST /api/train` takes a multipart form: a JSON `spec` part plus
//! optional `dataset` and `script` file parts. Files are staged under
//! `{work_dir}/{run_id}/incoming/` before the job is queued, so the
//! worker (and its retry) reads them from the run's own directory.

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use yard_core::{RunId, TrainingSpec};

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

const SPEC_PART: &str = "spec";
const DATASET_PART: &str = "dataset";
const SCRIPT_PART: &str = "script";

/// Routes served by this module.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/train", post(submit_training))
}

/// Accepted-run response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TrainResponse {
    /// Identifier to poll `/api/progress/{run_id}` with.
    #[schema(value_type = String, example = "86a3a77c-7bbe-4b5e-a7cb-96bc71778a8d")]
    pub run_id: RunId,
}

/// Shape of the multipart submission form, for the OpenAPI document.
/// The handler reads the parts manually.
#[derive(ToSchema)]
pub struct TrainForm {
    /// JSON-encoded training spec.
    pub spec: String,
    /// Dataset file; required when the spec sets `use_local_dataset`.
    #[schema(value_type = Option<String>, format = Binary)]
    pub dataset: Option<Vec<u8>>,
    /// Training script run instead of a registered routine.
    #[schema(value_type = Option<String>, format = Binary)]
    pub script: Option<Vec<u8>>,
}

/// Accept a training run.
#[utoipa::path(
    post,
    path = "/api/train",
    tag = "training",
    request_body(content = TrainForm, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Run accepted and queued", body = TrainResponse),
        (status = 422, description = "Invalid spec or inconsistent parts", body = ErrorBody),
        (status = 503, description = "Job queue is shut down", body = ErrorBody),
    )
)]
pub async fn submit_training(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<TrainResponse>), ApiError> {
    let mut spec: Option<TrainingSpec> = None;
    let mut dataset: Option<(String, Bytes)> = None;
    let mut script: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(SPEC_PART) => {
                let text = field.text().await?;
                spec = Some(serde_json::from_str(&text).map_err(|err| {
                    ApiError::BadRequest(format!("spec part is not valid JSON: {err}"))
                })?);
            }
            Some(DATASET_PART) => dataset = Some(read_file_part(field, "data.csv").await?),
            Some(SCRIPT_PART) => script = Some(read_file_part(field, "train.py").await?),
            Some(other) => {
                return Err(ApiError::validation(format!("unexpected form part `{other}`")));
            }
            None => return Err(ApiError::validation("form parts must be named")),
        }
    }

    let spec = spec.ok_or_else(|| ApiError::validation("missing `spec` part"))?;
    spec.validate()?;
    if spec.use_local_dataset && dataset.is_none() {
        return Err(ApiError::validation(
            "use_local_dataset is set but no dataset file was attached",
        ));
    }
    if !spec.use_local_dataset && dataset.is_some() {
        return Err(ApiError::validation(
            "a dataset file was attached but use_local_dataset is not set",
        ));
    }

    let run_id = RunId::new();
    let staging = state.config.work_dir.join(run_id.to_string()).join("incoming");
    let dataset_path = stage_part(&staging, dataset).await?;
    let script_path = stage_part(&staging, script).await?;

    let run_id = state
        .queue
        .submit_job(run_id, spec, dataset_path, script_path)
        .await?;
    tracing::info!(run_id = %run_id, "training run accepted");
    Ok((StatusCode::ACCEPTED, Json(TrainResponse { run_id })))
}

/// Pull a file part into memory, keeping only the basename of the
/// client-supplied filename.
async fn read_file_part(field: Field<'_>, fallback: &str) -> Result<(String, Bytes), ApiError> {
    let name = field
        .file_name()
        .and_then(|raw| Path::new(raw).file_name())
        .and_then(|name| name.to_str())
        .unwrap_or(fallback)
        .to_string();
    let data = field.bytes().await?;
    Ok((name, data))
}

/// Write an uploaded part under the staging directory.
async fn stage_part(
    staging: &Path,
    part: Option<(String, Bytes)>,
) -> Result<Option<PathBuf>, ApiError> {
    let Some((name, data)) = part else {
        return Ok(None);
    };
    tokio::fs::create_dir_all(staging).await?;
    let path = staging.join(name);
    tokio::fs::write(&path, &data).await?;
    Ok(Some(path))
}
