//! Health prober
//!
//! Probes every node concurrently once per cycle. A node without a dialable
//! endpoint is offline without a network call. When a node goes from online
//! to offline, everything running on it is downgraded locally; remote cleanup
//! waits for reconciliation or the operator.

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::model::{Node, NodeStatus};
use crate::Fleet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub probed: usize,
    pub online: usize,
    pub offline: usize,
    /// Nodes whose probe result could not be recorded
    pub failed: usize,
    pub rules_stopped: u64,
    pub tunnels_stopped: u64,
}

struct NodeProbe {
    status: NodeStatus,
    rules_stopped: u64,
    tunnels_stopped: u64,
}

#[derive(Clone)]
pub struct HealthProber {
    fleet: Fleet,
}

impl HealthProber {
    pub fn new(fleet: Fleet) -> Self {
        Self { fleet }
    }

    /// Probe all nodes and wait for every probe to finish
    pub async fn run_cycle(&self) -> ProbeReport {
        let mut report = ProbeReport::default();

        let nodes = match self.fleet.stores.nodes.all().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("Failed to load nodes for probing: {}", e);
                return report;
            }
        };

        let mut probes = JoinSet::new();
        for node in nodes {
            let fleet = self.fleet.clone();
            probes.spawn(async move {
                let node_id = node.id;
                (node_id, probe_node(&fleet, node).await)
            });
        }

        while let Some(joined) = probes.join_next().await {
            report.probed += 1;
            match joined {
                Ok((_, Ok(probe))) => {
                    match probe.status {
                        NodeStatus::Online => report.online += 1,
                        _ => report.offline += 1,
                    }
                    report.rules_stopped += probe.rules_stopped;
                    report.tunnels_stopped += probe.tunnels_stopped;
                }
                Ok((node_id, Err(e))) => {
                    error!(node_id, "Failed to record probe result: {}", e);
                    report.failed += 1;
                }
                Err(e) => {
                    error!("Probe task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

async fn probe_node(fleet: &Fleet, node: Node) -> Result<NodeProbe, StoreError> {
    let status = match fleet.api_for(&node) {
        None => {
            debug!(node_id = node.id, "No dialable endpoint, marking offline");
            NodeStatus::Offline
        }
        Some(api) => match tokio::time::timeout(fleet.config.remote_timeout, api.probe()).await {
            Ok(Ok(())) => NodeStatus::Online,
            Ok(Err(e)) => {
                debug!(node_id = node.id, "Probe failed: {}", e);
                NodeStatus::Offline
            }
            Err(_) => {
                debug!(node_id = node.id, "Probe timed out");
                NodeStatus::Offline
            }
        },
    };

    fleet
        .stores
        .nodes
        .record_probe(node.id, status, Utc::now())
        .await?;

    let mut probe = NodeProbe {
        status,
        rules_stopped: 0,
        tunnels_stopped: 0,
    };

    if node.status != status {
        info!(node_id = node.id, "Node {} is now {}", node.name, status);
    }

    if node.status == NodeStatus::Online && status == NodeStatus::Offline {
        probe.rules_stopped = fleet.stores.rules.stop_running_on_node(node.id).await?;
        probe.tunnels_stopped = fleet.stores.tunnels.stop_running_on_node(node.id).await?;
        if probe.rules_stopped > 0 || probe.tunnels_stopped > 0 {
            warn!(
                node_id = node.id,
                "Node {} went offline, stopped {} rules and {} tunnels locally",
                node.name,
                probe.rules_stopped,
                probe.tunnels_stopped
            );
        }
    }

    Ok(probe)
}
