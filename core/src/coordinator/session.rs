// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Dispatch sessions: one operator command from fan-out to artifact
//! collection.
//!
//! Competitive dispatch submits the same parameters to every registered node
//! and tracks each returned task. Cooperative dispatch submits once, to the
//! first registered node, with a hostfile allocation spanning the whole
//! fleet. Both then poll until every tracked task is terminal or abandoned,
//! pulling artifacts into a timestamped result tree. A session-wide collectl
//! runs alongside and is stopped on teardown.

use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::collectl::Collectl;
use crate::config::{CoordinatorSettings, DispatchTunables};
use crate::protocol::{CompetitiveRequest, CooperativeRequest, HplParams, JobStatus, TaskId};

use super::client::NodeClient;
use super::registry::NodeRegistry;

/// Session-level failures. Per-node trouble is absorbed into outcomes.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Dispatch invoked with an empty registry.
    #[error("no nodes registered")]
    NoNodes,
    /// The session result tree could not be created.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// How one node's task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Terminal `Completed`; artifacts were written locally.
    Completed {
        /// Number of artifact files retrieved.
        files: usize,
    },
    /// Terminal error status reported by the worker.
    Failed(JobStatus),
    /// The submission was refused (busy or rejected).
    SubmitRejected,
    /// The node stopped answering and was abandoned.
    Unreachable,
}

/// What a finished session produced.
#[derive(Debug)]
pub struct DispatchReport {
    /// Timestamped directory all artifacts were written under.
    pub session_dir: PathBuf,
    /// Per-node outcomes, keyed by node IP.
    pub outcomes: BTreeMap<String, NodeOutcome>,
}

struct ActiveTask {
    ip: String,
    task_id: TaskId,
    client: NodeClient,
    node_dir: PathBuf,
    failed_polls: u32,
}

/// Runs dispatch sessions against the shared registry.
pub struct DispatchSession {
    registry: Arc<NodeRegistry>,
    settings: CoordinatorSettings,
    tunables: DispatchTunables,
}

impl DispatchSession {
    /// Create a session runner.
    pub fn new(
        registry: Arc<NodeRegistry>,
        settings: CoordinatorSettings,
        tunables: DispatchTunables,
    ) -> Self {
        Self {
            registry,
            settings,
            tunables,
        }
    }

    /// Submit `request` to every registered node and monitor to completion.
    pub async fn run_competitive(
        &self,
        request: &CompetitiveRequest,
    ) -> Result<DispatchReport, SessionError> {
        let nodes = self.registry.snapshot();
        if nodes.is_empty() {
            return Err(SessionError::NoNodes);
        }

        let session_dir = self.create_session_dir()?;
        let collectl = self.start_master_collectl(&session_dir);

        let mut outcomes = BTreeMap::new();
        let mut active: Vec<ActiveTask> = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            if index > 0 {
                // Advisory pacing so the fleet does not start as one thundering
                // herd on shared storage.
                tokio::time::sleep(self.tunables.pacing_delay).await;
            }

            let client = NodeClient::new(node.endpoint(), self.tunables.clone());
            match client.submit_competitive(request).await {
                Ok(task_id) => {
                    info!(ip = %node.ip, task_id = %task_id, "benchmark started");
                    let node_dir = session_dir.join(&node.ip);
                    if let Err(err) = std::fs::create_dir_all(&node_dir) {
                        warn!(ip = %node.ip, error = %err, "cannot create node directory");
                    }
                    active.push(ActiveTask {
                        ip: node.ip.clone(),
                        task_id,
                        client,
                        node_dir,
                        failed_polls: 0,
                    });
                }
                Err(err) => {
                    warn!(ip = %node.ip, error = %err, "submission failed, skipping node");
                    outcomes.insert(node.ip.clone(), NodeOutcome::SubmitRejected);
                }
            }
        }

        self.monitor(active, &mut outcomes).await;

        if let Some(collectl) = collectl {
            collectl.stop().await;
        }
        Ok(DispatchReport {
            session_dir,
            outcomes,
        })
    }

    /// Submit one fleet-spanning job to the first registered node and monitor
    /// it to completion.
    pub async fn run_cooperative(
        &self,
        params: HplParams,
        slots_per_node: u32,
    ) -> Result<DispatchReport, SessionError> {
        let nodes = self.registry.snapshot();
        let Some(initiator) = nodes.first() else {
            return Err(SessionError::NoNodes);
        };

        let node_slots: BTreeMap<String, u32> = nodes
            .iter()
            .map(|node| (node.ip.clone(), slots_per_node))
            .collect();
        let request = CooperativeRequest {
            ps: params.ps,
            qs: params.qs,
            n_value: params.n_value,
            nb: params.nb,
            node_slots,
        };

        let session_dir = self.create_session_dir()?;
        let collectl = self.start_master_collectl(&session_dir);

        let mut outcomes = BTreeMap::new();
        let client = NodeClient::new(initiator.endpoint(), self.tunables.clone());
        match client.submit_cooperative(&request).await {
            Ok(task_id) => {
                info!(ip = %initiator.ip, task_id = %task_id, "cooperative benchmark started");
                let node_dir = session_dir.join(&initiator.ip);
                if let Err(err) = std::fs::create_dir_all(&node_dir) {
                    warn!(ip = %initiator.ip, error = %err, "cannot create node directory");
                }
                let active = vec![ActiveTask {
                    ip: initiator.ip.clone(),
                    task_id,
                    client,
                    node_dir,
                    failed_polls: 0,
                }];
                self.monitor(active, &mut outcomes).await;
            }
            Err(err) => {
                warn!(ip = %initiator.ip, error = %err, "cooperative submission failed");
                outcomes.insert(initiator.ip.clone(), NodeOutcome::SubmitRejected);
            }
        }

        if let Some(collectl) = collectl {
            collectl.stop().await;
        }
        Ok(DispatchReport {
            session_dir,
            outcomes,
        })
    }

    /// Poll every active task until all are terminal or abandoned.
    async fn monitor(&self, mut active: Vec<ActiveTask>, outcomes: &mut BTreeMap<String, NodeOutcome>) {
        while !active.is_empty() {
            tokio::time::sleep(self.tunables.poll_interval).await;

            let mut still_active = Vec::new();
            for mut task in active {
                let ip = task.ip.clone();
                match task.client.status(&task.task_id).await {
                    Ok(JobStatus::Running) => {
                        task.failed_polls = 0;
                        still_active.push(task);
                    }
                    Ok(JobStatus::Completed) => {
                        let files = match task
                            .client
                            .fetch_results(&task.task_id, &task.node_dir)
                            .await
                        {
                            Ok(files) => files,
                            Err(err) => {
                                warn!(%ip, error = %err, "result retrieval failed");
                                0
                            }
                        };
                        info!(%ip, task_id = %task.task_id, files, "benchmark completed");
                        outcomes.insert(ip, NodeOutcome::Completed { files });
                    }
                    Ok(status) => {
                        warn!(%ip, task_id = %task.task_id, %status, "benchmark failed");
                        // Partial artifacts are still worth keeping.
                        if let Err(err) = task
                            .client
                            .fetch_results(&task.task_id, &task.node_dir)
                            .await
                        {
                            warn!(%ip, error = %err, "no partial artifacts retrieved");
                        }
                        outcomes.insert(ip, NodeOutcome::Failed(status));
                    }
                    Err(err) => {
                        task.failed_polls += 1;
                        warn!(
                            %ip,
                            error = %err,
                            failed_polls = task.failed_polls,
                            "status poll failed"
                        );
                        if task.failed_polls >= self.tunables.max_unreachable_polls {
                            outcomes.insert(ip, NodeOutcome::Unreachable);
                        } else {
                            still_active.push(task);
                        }
                    }
                }
            }
            active = still_active;
        }
    }

    fn create_session_dir(&self) -> std::io::Result<PathBuf> {
        let session_dir = self
            .settings
            .results_dir
            .join(Local::now().format("%Y-%m-%d_%H-%M-%S").to_string());
        std::fs::create_dir_all(&session_dir)?;
        Ok(session_dir)
    }

    fn start_master_collectl(&self, session_dir: &Path) -> Option<Collectl> {
        match Collectl::spawn(
            &self.settings.collectl_program,
            &session_dir.join("master_collectl.log"),
        ) {
            Ok(collectl) => Some(collectl),
            Err(err) => {
                warn!(error = %err, "session collectl unavailable, continuing without it");
                None
            }
        }
    }
}
