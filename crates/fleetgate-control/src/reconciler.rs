//! State reconciler
//!
//! For every node not known to be offline, compares the locally recorded
//! status of its rules (entry node) and tunnels (exit node) with the service
//! states the node reports, and lets the node win on mismatch.
//!
//! Local rows are read before the remote config is fetched and each write is
//! a compare-and-set against the status that was read. When another writer
//! got there first the row is left alone until the next cycle.

use fleetgate_gateway::{relay_service_name, FailureCause, Operation, RemoteError, ServiceState};
use std::collections::HashMap;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Conflict, ControlError};
use crate::model::{Node, NodeStatus, RunStatus};
use crate::Fleet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub nodes_scanned: usize,
    pub nodes_failed: usize,
    pub rules_changed: usize,
    pub tunnels_changed: usize,
}

#[derive(Default)]
struct NodeSync {
    rules_changed: usize,
    tunnels_changed: usize,
}

#[derive(Clone)]
pub struct StateReconciler {
    fleet: Fleet,
}

impl StateReconciler {
    pub fn new(fleet: Fleet) -> Self {
        Self { fleet }
    }

    /// Reconcile every reachable node and wait for all of them
    pub async fn run_cycle(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let nodes = match self.fleet.stores.nodes.all().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("Failed to load nodes for reconciliation: {}", e);
                return report;
            }
        };

        let mut syncs = JoinSet::new();
        for node in nodes
            .into_iter()
            .filter(|n| n.status != NodeStatus::Offline)
        {
            let fleet = self.fleet.clone();
            syncs.spawn(async move {
                let node_id = node.id;
                (node_id, reconcile_node(&fleet, node).await)
            });
        }

        while let Some(joined) = syncs.join_next().await {
            report.nodes_scanned += 1;
            match joined {
                Ok((_, Ok(sync))) => {
                    report.rules_changed += sync.rules_changed;
                    report.tunnels_changed += sync.tunnels_changed;
                }
                Ok((node_id, Err(e))) => {
                    warn!(node_id, "Reconciliation skipped: {}", e);
                    report.nodes_failed += 1;
                }
                Err(e) => {
                    error!("Reconciliation task failed: {}", e);
                    report.nodes_failed += 1;
                }
            }
        }

        report
    }
}

fn run_status(state: ServiceState) -> RunStatus {
    match state {
        ServiceState::Running => RunStatus::Running,
        ServiceState::Error => RunStatus::Error,
        ServiceState::Stopped => RunStatus::Stopped,
    }
}

fn observed(states: &HashMap<String, ServiceState>, name: &str) -> RunStatus {
    run_status(states.get(name).copied().unwrap_or(ServiceState::Stopped))
}

async fn reconcile_node(fleet: &Fleet, node: Node) -> Result<NodeSync, ControlError> {
    let rules = fleet.stores.rules.by_entry_node(node.id).await?;
    let tunnels = fleet.stores.tunnels.by_exit_node(node.id).await?;

    let api = fleet.api_for(&node).ok_or(Conflict::NodeUnavailable {
        node_id: node.id,
        status: node.status,
    })?;
    let config = tokio::time::timeout(fleet.config.remote_timeout, api.fetch_config())
        .await
        .map_err(|_| {
            RemoteError::new(
                Operation::FetchConfig,
                "config",
                FailureCause::Transport("timed out".to_string()),
            )
        })??;
    let states = config.service_states();

    let mut sync = NodeSync::default();

    for rule in rules {
        let target = observed(&states, &rule.service_name());
        if target == rule.status {
            continue;
        }
        if fleet
            .stores
            .rules
            .set_status_if(rule.id, rule.status, target)
            .await?
        {
            info!(
                rule_id = rule.id,
                node_id = node.id,
                "Rule {} reconciled {} -> {}",
                rule.name,
                rule.status,
                target
            );
            sync.rules_changed += 1;
        } else {
            debug!(rule_id = rule.id, "Rule changed concurrently, deferring");
        }
    }

    for tunnel in tunnels {
        let target = observed(&states, &relay_service_name(tunnel.id));
        if target == tunnel.status {
            continue;
        }
        if fleet
            .stores
            .tunnels
            .set_status_if(tunnel.id, tunnel.status, target)
            .await?
        {
            info!(
                tunnel_id = tunnel.id,
                node_id = node.id,
                "Tunnel {} reconciled {} -> {}",
                tunnel.name,
                tunnel.status,
                target
            );
            sync.tunnels_changed += 1;
        } else {
            debug!(tunnel_id = tunnel.id, "Tunnel changed concurrently, deferring");
        }
    }

    Ok(sync)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_service_counts_as_stopped() {
        let mut states = HashMap::new();
        states.insert("rule-1".to_string(), ServiceState::Running);
        states.insert("rule-2".to_string(), ServiceState::Error);

        assert_eq!(observed(&states, "rule-1"), RunStatus::Running);
        assert_eq!(observed(&states, "rule-2"), RunStatus::Error);
        assert_eq!(observed(&states, "rule-3"), RunStatus::Stopped);
    }
}
