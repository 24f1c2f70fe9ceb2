// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The coordinator's node registry.
//!
//! An in-memory list of registered workers behind one lock. Registration
//! upserts by (ip, port); `reload` pings every node outside the lock and
//! prunes the ones that fail within the deadline.

use chrono::Utc;
use parking_lot::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::DispatchTunables;
use crate::protocol::{NodeEntry, RegisterRequest};

use super::client::NodeClient;

/// Shared registry of live workers.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<NodeEntry>>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for (ip, advertised port).
    pub fn upsert(&self, ip: String, request: RegisterRequest) -> NodeEntry {
        let entry = NodeEntry {
            ip,
            port: request.port,
            metrics: request.metrics,
            registered_at: Utc::now(),
        };

        let mut nodes = self.nodes.write();
        nodes.retain(|node| !(node.ip == entry.ip && node.port == entry.port));
        nodes.push(entry.clone());
        info!(ip = %entry.ip, port = entry.port, "node registered");
        entry
    }

    /// Snapshot of all entries, registration order preserved.
    pub fn snapshot(&self) -> Vec<NodeEntry> {
        self.nodes.read().clone()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Ping every node and drop the ones that fail or time out.
    ///
    /// Returns the removed entries.
    pub async fn reload(&self, tunables: &DispatchTunables) -> Vec<NodeEntry> {
        let nodes = self.snapshot();
        let mut probes = JoinSet::new();
        for node in nodes {
            let client = NodeClient::new(node.endpoint(), tunables.clone());
            probes.spawn(async move {
                let alive = client.ping().await.is_ok();
                (node, alive)
            });
        }

        let mut dead = Vec::new();
        while let Some(joined) = probes.join_next().await {
            if let Ok((node, alive)) = joined {
                if !alive {
                    warn!(ip = %node.ip, port = node.port, "node failed liveness probe");
                    dead.push(node);
                }
            }
        }

        if !dead.is_empty() {
            let mut nodes = self.nodes.write();
            nodes.retain(|node| {
                !dead
                    .iter()
                    .any(|gone| gone.ip == node.ip && gone.port == node.port)
            });
        }
        dead
    }
}
