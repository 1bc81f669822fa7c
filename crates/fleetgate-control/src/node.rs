//! Node registry
//!
//! Operator-facing management of the known nodes. Status is never written
//! here; it belongs to the health prober.

use fleetgate_gateway::RemoteConfig;
use tracing::info;

use crate::audit::{Actor, AuditAction, AuditEntry};
use crate::error::{Conflict, ControlError, ResourceKind, StoreError};
use crate::model::{
    non_empty, require_name, require_port, NewNode, Node, NodeDraft, NodeFilter, NodeId, Page,
    Paged,
};
use crate::Fleet;

pub struct NodeRegistry {
    fleet: Fleet,
}

impl NodeRegistry {
    pub fn new(fleet: Fleet) -> Self {
        Self { fleet }
    }

    pub async fn get(&self, id: NodeId) -> Result<Node, ControlError> {
        self.fleet.node(id).await
    }

    pub async fn list(&self, filter: &NodeFilter, page: Page) -> Result<Paged<Node>, ControlError> {
        Ok(self.fleet.stores.nodes.list(filter, page).await?)
    }

    pub async fn create(&self, draft: NodeDraft, actor: &Actor) -> Result<Node, ControlError> {
        let new = validate(draft)?;
        if self.fleet.stores.nodes.find_by_name(&new.name).await?.is_some() {
            return Err(Conflict::NodeNameTaken(new.name).into());
        }

        let node = self
            .fleet
            .stores
            .nodes
            .insert(&new)
            .await
            .map_err(|e| name_conflict(e, &new.name))?;

        info!(node_id = node.id, "Node {} registered at {}", node.name, node.address);
        self.audit(actor, AuditAction::Create, &node, "created node");
        Ok(node)
    }

    pub async fn update(
        &self,
        id: NodeId,
        draft: NodeDraft,
        actor: &Actor,
    ) -> Result<Node, ControlError> {
        let new = validate(draft)?;
        self.fleet.node(id).await?;
        if let Some(other) = self.fleet.stores.nodes.find_by_name(&new.name).await? {
            if other.id != id {
                return Err(Conflict::NodeNameTaken(new.name).into());
            }
        }

        let node = self
            .fleet
            .stores
            .nodes
            .update(id, &new)
            .await
            .map_err(|e| name_conflict(e, &new.name))?
            .ok_or_else(|| ControlError::not_found(ResourceKind::Node, id))?;

        self.audit(actor, AuditAction::Update, &node, "updated node");
        Ok(node)
    }

    /// Remove a node that no rule or tunnel references
    pub async fn delete(&self, id: NodeId, actor: &Actor) -> Result<(), ControlError> {
        let node = self.fleet.node(id).await?;
        if self.fleet.stores.rules.count_by_entry_node(id).await? > 0 {
            return Err(Conflict::NodeHasRules(id).into());
        }
        if self.fleet.stores.tunnels.count_by_node(id).await? > 0 {
            return Err(Conflict::NodeHasTunnels(id).into());
        }

        match self.fleet.stores.nodes.delete(id).await {
            Ok(_) => {}
            // Referenced by a rule or tunnel created since the counts
            Err(StoreError::Referenced(_)) => {
                if self.fleet.stores.rules.count_by_entry_node(id).await? > 0 {
                    return Err(Conflict::NodeHasRules(id).into());
                }
                return Err(Conflict::NodeHasTunnels(id).into());
            }
            Err(e) => return Err(e.into()),
        }
        info!(node_id = id, "Node {} removed", node.name);
        self.audit(actor, AuditAction::Delete, &node, "deleted node");
        Ok(())
    }

    /// Live configuration as reported by the node itself
    pub async fn fetch_config(&self, id: NodeId) -> Result<RemoteConfig, ControlError> {
        let node = self.fleet.node(id).await?;
        let api = self.fleet.api_for(&node).ok_or(Conflict::NodeUnavailable {
            node_id: node.id,
            status: node.status,
        })?;
        Ok(api.fetch_config().await?)
    }

    fn audit(&self, actor: &Actor, action: AuditAction, node: &Node, what: &str) {
        self.fleet.audit.record(AuditEntry::new(
            actor,
            action,
            ResourceKind::Node,
            node.id,
            format!("{} {}", what, node.name),
        ));
    }
}

fn validate(draft: NodeDraft) -> Result<NewNode, ControlError> {
    let name = require_name(&draft.name, "name")?;
    let address = require_name(&draft.address, "address")?;
    let port = require_port(draft.port, "port")?;

    Ok(NewNode {
        name,
        address,
        port,
        username: non_empty(draft.username),
        password: draft.password.filter(|p| !p.is_empty()),
        remark: non_empty(draft.remark),
    })
}

fn name_conflict(err: StoreError, name: &str) -> ControlError {
    match err {
        StoreError::Duplicate(_) => Conflict::NodeNameTaken(name.to_string()).into(),
        other => other.into(),
    }
}
