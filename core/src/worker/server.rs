// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The worker's HTTP surface.
//!
//! Thin adapters over the job runner: submits validate and admit, status and
//! results are pure reads. Artifacts are only served once the job table shows
//! a terminal status, so the handlers never race the children writing them.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::WorkerSettings;
use crate::protocol::{
    CompetitiveRequest, CooperativeRequest, ErrorBody, PingResponse, ResultFile, ResultsResponse,
    StatusResponse, SubmitResponse,
};

use super::supervisor::{JobRunner, JobSpec, SubmitError};

/// Worker API errors, mapped onto the wire taxonomy.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 400 with a field-level message.
    #[error("{0}")]
    BadRequest(String),
    /// 409 with the canonical busy body.
    #[error("Resource busy. Another benchmark is currently running.")]
    Busy,
    /// 404.
    #[error("{0}")]
    NotFound(String),
    /// 500.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Busy => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Busy => Self::Busy,
        }
    }
}

/// Build the worker router over a shared runner.
pub fn router(runner: Arc<JobRunner>) -> Router {
    Router::new()
        .route("/submit_competitive_benchmark", post(submit_competitive))
        .route("/submit_cooperative_benchmark", post(submit_cooperative))
        .route("/task_status/:task_id", get(task_status))
        .route("/get_results/:task_id", get(get_results))
        .route("/ping", get(ping).post(ping))
        .with_state(runner)
}

/// Bind the worker surface and serve until the process ends.
pub async fn serve(runner: Arc<JobRunner>, settings: &WorkerSettings) -> std::io::Result<()> {
    let addr = format!("{}:{}", settings.api_host, settings.api_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "worker API listening");
    axum::serve(listener, router(runner)).await
}

async fn submit_competitive(
    State(runner): State<Arc<JobRunner>>,
    Json(request): Json<CompetitiveRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    request.validate().map_err(ApiError::BadRequest)?;
    info!(?request, "received competitive benchmark request");

    let task_id = runner.submit(JobSpec::Competitive(request))?;
    Ok(Json(SubmitResponse { task_id }))
}

async fn submit_cooperative(
    State(runner): State<Arc<JobRunner>>,
    Json(request): Json<CooperativeRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    request.validate().map_err(ApiError::BadRequest)?;
    info!(?request, "received cooperative benchmark request");

    let task_id = runner.submit(JobSpec::Cooperative(request))?;
    Ok(Json(SubmitResponse { task_id }))
}

async fn task_status(
    State(runner): State<Arc<JobRunner>>,
    Path(task_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = runner
        .table()
        .status(&task_id)
        .ok_or_else(|| ApiError::NotFound("Task ID not found.".to_string()))?;
    Ok(Json(StatusResponse { task_id, status }))
}

async fn get_results(
    State(runner): State<Arc<JobRunner>>,
    Path(task_id): Path<String>,
) -> Result<Json<ResultsResponse>, ApiError> {
    // Artifacts become visible only once the job is terminal; before that the
    // children may still be writing.
    let terminal = runner
        .table()
        .status(&task_id)
        .is_some_and(|status| status.is_terminal());
    let result_dir = runner.result_dir(&task_id);
    if !terminal || !result_dir.is_dir() {
        return Err(ApiError::NotFound(
            "Results for the given Task ID not found.".to_string(),
        ));
    }

    let mut results = Vec::new();
    let mut entries = tokio::fs::read_dir(&result_dir)
        .await
        .map_err(|err| ApiError::Internal(format!("Failed to list results: {err}.")))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| ApiError::Internal(format!("Failed to list results: {err}.")))?
    {
        if !entry.path().is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        let content = tokio::fs::read_to_string(entry.path())
            .await
            .map_err(|_| ApiError::Internal(format!("Failed to read file {filename}.")))?;
        results.push(ResultFile { filename, content });
    }

    if results.is_empty() {
        return Err(ApiError::NotFound(
            "No result files found for the given Task ID.".to_string(),
        ));
    }
    Ok(Json(ResultsResponse { task_id, results }))
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse::pong())
}
