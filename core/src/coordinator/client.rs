// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Typed HTTP client for one worker's endpoints.

use reqwest::StatusCode;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::config::DispatchTunables;
use crate::protocol::{
    CompetitiveRequest, CooperativeRequest, ErrorBody, JobStatus, PingResponse, PONG,
    ResultsResponse, StatusResponse, SubmitResponse, TaskId,
};

/// Failures talking to a worker.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The worker refused the submission because a job is active.
    #[error("worker is busy")]
    Busy,
    /// The worker answered with a non-success status.
    #[error("worker answered {code}: {message}")]
    Rejected {
        /// HTTP status code.
        code: StatusCode,
        /// Error body, when one was readable.
        message: String,
    },
    /// The worker could not be reached at all.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Artifacts could not be written locally.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client bound to one worker endpoint.
#[derive(Debug, Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    base_url: String,
    tunables: DispatchTunables,
}

impl NodeClient {
    /// Create a client for `base_url` (e.g. `http://10.0.0.11:5000`).
    pub fn new(base_url: String, tunables: DispatchTunables) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            tunables,
        }
    }

    /// The worker endpoint this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a competitive benchmark; returns the worker-assigned task id.
    pub async fn submit_competitive(
        &self,
        request: &CompetitiveRequest,
    ) -> Result<TaskId, ClientError> {
        self.submit("/submit_competitive_benchmark", request).await
    }

    /// Submit a cooperative benchmark; returns the worker-assigned task id.
    pub async fn submit_cooperative(
        &self,
        request: &CooperativeRequest,
    ) -> Result<TaskId, ClientError> {
        self.submit("/submit_cooperative_benchmark", request).await
    }

    async fn submit<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<TaskId, ClientError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .timeout(self.tunables.submit_timeout)
            .json(body)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let submit: SubmitResponse = response.json().await?;
                Ok(submit.task_id)
            }
            StatusCode::CONFLICT => Err(ClientError::Busy),
            status => Err(Self::rejected(status, response).await),
        }
    }

    /// Current status of a task on this worker.
    pub async fn status(&self, task_id: &str) -> Result<JobStatus, ClientError> {
        let response = self
            .http
            .get(format!("{}/task_status/{}", self.base_url, task_id))
            .timeout(self.tunables.status_timeout)
            .send()
            .await?;

        if response.status().is_success() {
            let status: StatusResponse = response.json().await?;
            Ok(status.status)
        } else {
            Err(Self::rejected(response.status(), response).await)
        }
    }

    /// Fetch the artifact envelope and write each file into `dest_dir`.
    ///
    /// Returns the number of files written. Later files with the same name
    /// overwrite earlier ones.
    pub async fn fetch_results(
        &self,
        task_id: &str,
        dest_dir: &Path,
    ) -> Result<usize, ClientError> {
        let response = self
            .http
            .get(format!("{}/get_results/{}", self.base_url, task_id))
            .timeout(self.tunables.results_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejected(response.status(), response).await);
        }
        let envelope: ResultsResponse = response.json().await?;

        std::fs::create_dir_all(dest_dir)?;
        for file in &envelope.results {
            // Base names only; anything else would escape the node directory.
            let name = Path::new(&file.filename)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.filename.clone());
            std::fs::write(dest_dir.join(name), &file.content)?;
        }
        debug!(task_id, files = envelope.results.len(), "artifacts written");
        Ok(envelope.results.len())
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let response = self
            .http
            .get(format!("{}/ping", self.base_url))
            .timeout(self.tunables.ping_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejected(response.status(), response).await);
        }
        let pong: PingResponse = response.json().await?;
        if pong.message == PONG {
            Ok(())
        } else {
            Err(ClientError::Rejected {
                code: StatusCode::OK,
                message: format!("unexpected ping reply '{}'", pong.message),
            })
        }
    }

    async fn rejected(code: StatusCode, response: reqwest::Response) -> ClientError {
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => "unreadable error body".to_string(),
        };
        ClientError::Rejected { code, message }
    }
}
