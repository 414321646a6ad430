//! # Experiment Tracking
//!
//! Thin client for an MLflow-compatible tracking server. Recording is
//! best-effort: the job body logs failures and moves on, because a dead
//! tracking server must never fail a training run.
//!
//! All runs land in one experiment, created on first use.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use yard_core::RunId;

/// Experiment that collects every orchestrated run.
pub const EXPERIMENT_NAME: &str = "trainyard";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("tracking request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status} from tracking server: {context}")]
    UnexpectedStatus { status: u16, context: String },
}

/// Client for the MLflow REST surface this crate uses.
pub struct TrackingClient {
    base: String,
    client: reqwest::Client,
}

// ── wire types ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ExperimentEnvelope {
    experiment: ExperimentBody,
}

#[derive(Deserialize)]
struct ExperimentBody {
    experiment_id: String,
}

#[derive(Deserialize)]
struct CreatedExperiment {
    experiment_id: String,
}

#[derive(Deserialize)]
struct RunEnvelope {
    run: RunBody,
}

#[derive(Deserialize)]
struct RunBody {
    info: RunInfo,
}

#[derive(Deserialize)]
struct RunInfo {
    run_id: String,
}

#[derive(Serialize)]
struct LogParam<'a> {
    run_id: &'a str,
    key: &'a str,
    value: String,
}

impl TrackingClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TrackingError> {
        let base = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base, client })
    }

    /// Records one finished run: experiment lookup (created on first
    /// use), run creation, params, the accuracy metric, and termination.
    pub async fn record_run(
        &self,
        run_id: &RunId,
        run_name: &str,
        hyperparams: &Map<String, Value>,
        accuracy: Option<f64>,
    ) -> Result<(), TrackingError> {
        let experiment_id = self.ensure_experiment().await?;
        let now = chrono::Utc::now().timestamp_millis();

        let created: RunEnvelope = self
            .post_json(
                "runs/create",
                &serde_json::json!({
                    "experiment_id": experiment_id,
                    "run_name": run_name,
                    "start_time": now,
                    "tags": [{"key": "yard.run_id", "value": run_id.to_string()}],
                }),
            )
            .await?;
        let tracked_id = created.run.info.run_id;

        for (key, value) in hyperparams {
            self.post_ok(
                "runs/log-parameter",
                &LogParam {
                    run_id: &tracked_id,
                    key,
                    value: param_text(value),
                },
            )
            .await?;
        }

        if let Some(accuracy) = accuracy {
            self.post_ok(
                "runs/log-metric",
                &serde_json::json!({
                    "run_id": tracked_id,
                    "key": "accuracy",
                    "value": accuracy,
                    "timestamp": now,
                }),
            )
            .await?;
        }

        self.post_ok(
            "runs/update",
            &serde_json::json!({
                "run_id": tracked_id,
                "status": "FINISHED",
                "end_time": chrono::Utc::now().timestamp_millis(),
            }),
        )
        .await?;

        tracing::debug!(run_id = %run_id, tracked_id, "run recorded to tracking server");
        Ok(())
    }

    /// Returns the experiment id, creating the experiment on 404.
    async fn ensure_experiment(&self) -> Result<String, TrackingError> {
        let response = self
            .client
            .get(self.endpoint("experiments/get-by-name"))
            .query(&[("experiment_name", EXPERIMENT_NAME)])
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {
                let envelope: ExperimentEnvelope = response.json().await?;
                Ok(envelope.experiment.experiment_id)
            }
            404 => {
                let created: CreatedExperiment = self
                    .post_json(
                        "experiments/create",
                        &serde_json::json!({"name": EXPERIMENT_NAME}),
                    )
                    .await?;
                tracing::info!(
                    experiment = EXPERIMENT_NAME,
                    id = created.experiment_id,
                    "created tracking experiment"
                );
                Ok(created.experiment_id)
            }
            status => Err(TrackingError::UnexpectedStatus {
                status,
                context: "experiments/get-by-name".into(),
            }),
        }
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, TrackingError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TrackingError::UnexpectedStatus {
                status: response.status().as_u16(),
                context: path.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    async fn post_ok(&self, path: &str, body: &impl Serialize) -> Result<(), TrackingError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TrackingError::UnexpectedStatus {
                status: response.status().as_u16(),
                context: path.to_string(),
            });
        }
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{path}", self.base)
    }
}

impl std::fmt::Debug for TrackingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingClient").field("base", &self.base).finish()
    }
}

/// Parameters go over as text; JSON strings drop their quotes.
fn param_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
