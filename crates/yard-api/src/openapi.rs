//! # OpenAPI Document
//!
//! Generated schema for the whole surface, served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::error::{ErrorBody, ErrorDetail};
use crate::routes::runs::{OutcomeResponse, ProgressResponse};
use crate::routes::train::{TrainForm, TrainResponse};
use crate::state::AppState;

/// OpenAPI document for the trainyard API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Trainyard API",
        description = "Submit training runs, stream their progress, and read their outcomes. \
                       Datasets and scripts ride along as multipart uploads; artifacts land in \
                       the configured object-store buckets.",
        license(name = "Apache-2.0"),
        contact(name = "trainyard", url = "https://github.com/trainyard-ml/trainyard")
    ),
    paths(
        crate::routes::train::submit_training,
        crate::routes::runs::run_progress,
        crate::routes::runs::stream_run_progress,
        crate::routes::runs::run_outcome,
    ),
    components(schemas(
        TrainForm,
        TrainResponse,
        ProgressResponse,
        OutcomeResponse,
        ErrorBody,
        ErrorDetail,
    )),
    tags(
        (name = "training", description = "Run submission"),
        (name = "progress", description = "Run progress and outcomes"),
    )
)]
pub struct ApiDoc;

/// Routes served by this module.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_has_the_expected_title() {
        let doc = ApiDoc::openapi();
        assert_eq!(doc.info.title, "Trainyard API");
    }

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        assert!(paths.contains(&"/api/train"));
        assert!(paths.contains(&"/api/progress/{run_id}"));
        assert!(paths.contains(&"/api/progress/{run_id}/stream"));
        assert!(paths.contains(&"/api/runs/{run_id}/outcome"));
    }

    #[test]
    fn document_registers_the_response_schemas() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components present");
        assert!(components.schemas.contains_key("TrainResponse"));
        assert!(components.schemas.contains_key("ProgressResponse"));
        assert!(components.schemas.contains_key("OutcomeResponse"));
        assert!(components.schemas.contains_key("ErrorBody"));
    }

    #[test]
    fn document_tags_both_route_groups() {
        let doc = ApiDoc::openapi();
        let tags = doc.tags.expect("tags present");
        let names: Vec<&str> = tags.iter().map(|tag| tag.name.as_str()).collect();
        assert!(names.contains(&"training"));
        assert!(names.contains(&"progress"));
    }
}
