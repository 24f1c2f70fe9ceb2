// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Wire contract shared by the coordinator and the workers.
//!
//! All bodies are JSON/UTF-8. Numeric fields are JSON numbers; IPs and task
//! ids are strings. Status values cross the wire as the exact strings the
//! fleet has always used, spaces included.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Task identifier: 128-bit random, rendered as 32 lowercase hex chars.
pub type TaskId = String;

/// Body of the 409 response a busy worker returns.
pub const BUSY_MESSAGE: &str = "Resource busy. Another benchmark is currently running.";

/// Body of the `/ping` response.
pub const PONG: &str = "pong";

/// Observable lifecycle states of a worker-side job.
///
/// `Running` is the only non-terminal state; a job that has reached any other
/// state never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Job admitted; children may still be starting or finishing.
    Running,
    /// Every child exited zero.
    Completed,
    /// The input deck or hostfile could not be produced.
    #[serde(rename = "Configuration Error")]
    ConfigurationError,
    /// At least one child exited non-zero or failed to spawn.
    #[serde(rename = "Execution Error")]
    ExecutionError,
}

impl JobStatus {
    /// Whether this status is final.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::ConfigurationError => write!(f, "Configuration Error"),
            Self::ExecutionError => write!(f, "Execution Error"),
        }
    }
}

/// Parameters shared by every HPL submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HplParams {
    /// Process grid P.
    pub ps: u32,
    /// Process grid Q.
    pub qs: u32,
    /// Problem size N.
    pub n_value: u32,
    /// Block size NB.
    pub nb: u32,
}

impl HplParams {
    /// Number of MPI ranks the deck describes.
    pub fn process_count(self) -> u32 {
        self.ps * self.qs
    }

    /// Reject non-positive grid or problem parameters.
    pub fn validate(self) -> Result<(), String> {
        for (name, value) in [
            ("ps", self.ps),
            ("qs", self.qs),
            ("n_value", self.n_value),
            ("nb", self.nb),
        ] {
            if value == 0 {
                return Err(format!("'{name}' must be a positive integer."));
            }
        }
        Ok(())
    }
}

/// `POST /submit_competitive_benchmark` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitiveRequest {
    /// Process grid P.
    pub ps: u32,
    /// Process grid Q.
    pub qs: u32,
    /// Problem size N.
    pub n_value: u32,
    /// Block size NB.
    pub nb: u32,
    /// Number of independent instances to run in parallel on the node.
    pub instances_num: u32,
}

impl CompetitiveRequest {
    /// The HPL parameters embedded in the request.
    pub fn params(&self) -> HplParams {
        HplParams {
            ps: self.ps,
            qs: self.qs,
            n_value: self.n_value,
            nb: self.nb,
        }
    }

    /// Reject non-positive fields.
    pub fn validate(&self) -> Result<(), String> {
        self.params().validate()?;
        if self.instances_num == 0 {
            return Err("'instances_num' must be a positive integer.".to_string());
        }
        Ok(())
    }
}

/// `POST /submit_cooperative_benchmark` request body.
///
/// `node_slots` maps node IPs to MPI slot counts; the worker writes it
/// verbatim into the hostfile. An empty map is accepted here and left for the
/// MPI runtime to refuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooperativeRequest {
    /// Process grid P.
    pub ps: u32,
    /// Process grid Q.
    pub qs: u32,
    /// Problem size N.
    pub n_value: u32,
    /// Block size NB.
    pub nb: u32,
    /// Per-node slot allocation for the hostfile.
    pub node_slots: BTreeMap<String, u32>,
}

impl CooperativeRequest {
    /// The HPL parameters embedded in the request.
    pub fn params(&self) -> HplParams {
        HplParams {
            ps: self.ps,
            qs: self.qs,
            n_value: self.n_value,
            nb: self.nb,
        }
    }

    /// Reject non-positive fields.
    pub fn validate(&self) -> Result<(), String> {
        self.params().validate()
    }
}

/// Successful submit response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned task identifier.
    pub task_id: TaskId,
}

/// `GET /task_status/<task_id>` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Task identifier echoed back.
    pub task_id: TaskId,
    /// Current status.
    pub status: JobStatus,
}

/// One artifact inside the results envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFile {
    /// Base name only, no directory components.
    pub filename: String,
    /// Whole file content; artifacts are text.
    pub content: String,
}

/// `GET /get_results/<task_id>` response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsResponse {
    /// Task identifier echoed back.
    pub task_id: TaskId,
    /// Artifacts in directory-listing order.
    pub results: Vec<ResultFile>,
}

/// System metrics a worker reports at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Node hostname.
    pub hostname: String,
    /// Logical CPU count.
    pub cpu_count: usize,
    /// Total RAM in bytes.
    pub total_ram_bytes: u64,
    /// Available RAM in bytes.
    pub available_ram_bytes: u64,
    /// Total disk capacity in bytes, summed over mounts.
    pub disk_total_bytes: u64,
    /// Available disk capacity in bytes, summed over mounts.
    pub disk_available_bytes: u64,
    /// Operating system description.
    pub operating_system: String,
}

/// `POST /register` request body. The registering node's IP is taken from the
/// connection, never from the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Port the worker's HTTP surface listens on.
    pub port: u16,
    /// Snapshot of the worker's system metrics.
    pub metrics: SystemMetrics,
}

/// `POST /register` response, echoing the stored entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Always `"registered"`.
    pub status: String,
    /// The registry entry as stored.
    pub node: NodeEntry,
}

/// One registered worker as held by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Remote address observed at registration time.
    pub ip: String,
    /// Worker-advertised HTTP port.
    pub port: u16,
    /// Metrics reported at registration.
    pub metrics: SystemMetrics,
    /// When the entry was created or last replaced.
    pub registered_at: DateTime<Utc>,
}

impl NodeEntry {
    /// Base URL of the worker's HTTP surface.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

/// `GET /get_ssh_public_key` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    /// Key material, trimmed.
    pub public_key: String,
}

/// `GET /get_ssh_private_key` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateKeyResponse {
    /// Key material, trimmed.
    pub private_key: String,
}

/// `/ping` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    /// Always `"pong"`.
    pub message: String,
}

impl PingResponse {
    /// The canonical pong.
    pub fn pong() -> Self {
        Self {
            message: PONG.to_string(),
        }
    }
}

/// Error body carried by every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub error: String,
}

/// Mint a fresh task identifier.
pub fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().simple().to_string()
}
