// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Runtime settings for both sides of the control plane.
//!
//! Values arrive through environment variables and CLI flags (wired up in the
//! CLI crate); the structs here carry them into the library with `Default`
//! impls matching the fleet's conventional ports and paths. Timing knobs are
//! plain fields so tests can shrink them to milliseconds.

use std::path::PathBuf;
use std::time::Duration;

/// Default worker bind port.
pub const DEFAULT_WORKER_PORT: u16 = 5000;

/// Default coordinator bind port.
pub const DEFAULT_COORDINATOR_PORT: u16 = 8000;

/// Worker-side settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Bind address for the worker HTTP surface (`API_HOST`).
    pub api_host: String,
    /// Bind port for the worker HTTP surface (`API_PORT`).
    pub api_port: u16,
    /// Coordinator address (`MASTER_IP`).
    pub master_ip: String,
    /// Coordinator port (`MASTER_PORT`).
    pub master_port: u16,
    /// Root of the per-task result tree.
    pub results_root: PathBuf,
    /// Root under which per-instance working directories are created.
    pub work_root: PathBuf,
    /// Path to the HPL binary staged into each working directory.
    pub hpl_binary: PathBuf,
    /// MPI launcher program.
    pub mpirun_program: String,
    /// Collectl program.
    pub collectl_program: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0".to_string(),
            api_port: DEFAULT_WORKER_PORT,
            master_ip: "127.0.0.1".to_string(),
            master_port: DEFAULT_COORDINATOR_PORT,
            results_root: PathBuf::from("../results"),
            work_root: PathBuf::from("/tmp"),
            hpl_binary: PathBuf::from("/usr/local/hpl/bin/xhpl"),
            mpirun_program: "mpirun".to_string(),
            collectl_program: "collectl".to_string(),
        }
    }
}

impl WorkerSettings {
    /// Base URL of the coordinator this worker reports to.
    pub fn master_url(&self) -> String {
        format!("http://{}:{}", self.master_ip, self.master_port)
    }
}

/// Knobs for the worker's startup sequence.
#[derive(Debug, Clone)]
pub struct BootstrapTunables {
    /// Registration attempts before giving up.
    pub max_retries: u32,
    /// First retry delay; doubles on every attempt.
    pub backoff_base: Duration,
    /// Timeout for each HTTP call to the coordinator.
    pub http_timeout: Duration,
}

impl Default for BootstrapTunables {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff_base: Duration::from_secs(2),
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Coordinator-side settings.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Root under which timestamped session directories are created.
    pub results_dir: PathBuf,
    /// Collectl program for the session-wide monitor.
    pub collectl_program: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_COORDINATOR_PORT,
            results_dir: PathBuf::from("benchmarks"),
            collectl_program: "collectl".to_string(),
        }
    }
}

/// Knobs for a dispatch session's pacing, polling and timeouts.
#[derive(Debug, Clone)]
pub struct DispatchTunables {
    /// Sleep between submissions to successive nodes.
    pub pacing_delay: Duration,
    /// Sleep between monitor passes.
    pub poll_interval: Duration,
    /// Consecutive failed polls before a node is abandoned.
    pub max_unreachable_polls: u32,
    /// Timeout for submit calls.
    pub submit_timeout: Duration,
    /// Timeout for status calls.
    pub status_timeout: Duration,
    /// Timeout for result retrieval.
    pub results_timeout: Duration,
    /// Timeout for liveness pings.
    pub ping_timeout: Duration,
}

impl Default for DispatchTunables {
    fn default() -> Self {
        Self {
            pacing_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(5),
            max_unreachable_polls: 3,
            submit_timeout: Duration::from_secs(10),
            status_timeout: Duration::from_secs(10),
            results_timeout: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(3),
        }
    }
}
