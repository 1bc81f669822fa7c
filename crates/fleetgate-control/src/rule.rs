//! Rule orchestration
//!
//! A rule becomes one forwarding service on its entry node. Rules bound to a
//! tunnel route through the tunnel's chain, so starting one first makes sure
//! the tunnel itself is running.

use fleetgate_db::entities::system_setting::PANEL_URL;
use fleetgate_gateway::{
    forward_service, observer_name, report_observer, rule_service_name, ForwardSpec, NodeApi,
};
use tracing::{debug, error, info, warn};

use crate::audit::{Actor, AuditAction, AuditEntry};
use crate::compensation::{CleanupAction, Compensation, Transition};
use crate::config::ObserverPolicy;
use crate::error::{Conflict, ControlError, ResourceKind, StoreError};
use crate::model::{
    non_empty, require_name, require_port, require_targets, NewRule, Node, NodeId, Page, Paged,
    Rule, RuleChanges, RuleDraft, RuleEntry, RuleFilter, RuleId, RuleKind, RuleUpdate, RunStatus,
};
use crate::Fleet;

pub struct RuleOrchestrator {
    fleet: Fleet,
}

impl RuleOrchestrator {
    pub fn new(fleet: Fleet) -> Self {
        Self { fleet }
    }

    pub async fn get(&self, id: RuleId) -> Result<Rule, ControlError> {
        self.fleet
            .stores
            .rules
            .get(id)
            .await?
            .ok_or_else(|| ControlError::not_found(ResourceKind::Rule, id))
    }

    pub async fn list(&self, filter: &RuleFilter, page: Page) -> Result<Paged<Rule>, ControlError> {
        Ok(self.fleet.stores.rules.list(filter, page).await?)
    }

    /// Node that owns the listen port of a rule with this entry
    pub async fn resolve_entry_node(&self, entry: &RuleEntry) -> Result<NodeId, ControlError> {
        match *entry {
            RuleEntry::Forward { node_id } => Ok(self.fleet.node(node_id).await?.id),
            RuleEntry::Tunnel { tunnel_id } => {
                let tunnel = self.fleet.tunnels().get(tunnel_id).await?;
                Ok(tunnel.entry_node_id)
            }
        }
    }

    pub async fn create(&self, draft: RuleDraft, actor: &Actor) -> Result<Rule, ControlError> {
        let name = require_name(&draft.name, "name")?;
        let listen_port = require_port(draft.listen_port, "listen_port")?;
        let targets = require_targets(&draft.targets)?;

        let entry = match draft.kind {
            RuleKind::Forward => RuleEntry::Forward {
                node_id: draft.node_id.ok_or_else(|| {
                    ControlError::validation("node_id is required for forward rules")
                })?,
            },
            RuleKind::Tunnel => RuleEntry::Tunnel {
                tunnel_id: draft.tunnel_id.ok_or_else(|| {
                    ControlError::validation("tunnel_id is required for tunnel rules")
                })?,
            },
        };
        let entry_node_id = self.resolve_entry_node(&entry).await?;
        self.ensure_port_free(entry_node_id, listen_port, None)
            .await?;

        let rule = self
            .fleet
            .stores
            .rules
            .insert(&NewRule {
                name,
                entry,
                entry_node_id,
                protocol: draft.protocol,
                listen_port,
                targets,
                strategy: draft.strategy.unwrap_or_default(),
                enable_tls: draft.enable_tls,
                remark: non_empty(draft.remark),
            })
            .await
            .map_err(|e| match e {
                // The node or tunnel went away after the lookup
                StoreError::Referenced(_) => match entry {
                    RuleEntry::Forward { node_id } => {
                        ControlError::not_found(ResourceKind::Node, node_id)
                    }
                    RuleEntry::Tunnel { tunnel_id } => {
                        ControlError::not_found(ResourceKind::Tunnel, tunnel_id)
                    }
                },
                other => port_conflict(other, entry_node_id, listen_port),
            })?;

        info!(rule_id = rule.id, "Rule {} created", rule.name);
        self.audit(actor, AuditAction::Create, &rule, "created rule");
        Ok(rule)
    }

    pub async fn update(
        &self,
        id: RuleId,
        update: RuleUpdate,
        actor: &Actor,
    ) -> Result<Rule, ControlError> {
        let current = self.get(id).await?;
        if current.status == RunStatus::Running {
            return Err(Conflict::RuleRunning(id).into());
        }

        let changes = RuleChanges {
            name: require_name(update.name.as_deref().unwrap_or(&current.name), "name")?,
            protocol: update.protocol.unwrap_or(current.protocol),
            listen_port: match update.listen_port {
                Some(port) => require_port(port, "listen_port")?,
                None => current.listen_port,
            },
            targets: match &update.targets {
                Some(targets) => require_targets(targets)?,
                None => current.targets.clone(),
            },
            strategy: update.strategy.unwrap_or(current.strategy),
            enable_tls: update.enable_tls.unwrap_or(current.enable_tls),
            remark: match update.remark {
                Some(remark) => non_empty(Some(remark)),
                None => current.remark.clone(),
            },
        };

        if changes.listen_port != current.listen_port {
            self.ensure_port_free(current.entry_node_id, changes.listen_port, Some(id))
                .await?;
        }

        let rule = self
            .fleet
            .stores
            .rules
            .update(id, &changes)
            .await
            .map_err(|e| port_conflict(e, current.entry_node_id, changes.listen_port))?
            .ok_or_else(|| ControlError::not_found(ResourceKind::Rule, id))?;

        self.audit(actor, AuditAction::Update, &rule, "updated rule");
        Ok(rule)
    }

    /// Remove a rule, stopping it first when needed
    pub async fn delete(&self, id: RuleId, actor: &Actor) -> Result<(), ControlError> {
        let rule = self.get(id).await?;
        if rule.status != RunStatus::Stopped {
            if let Err(e) = self.stop(id, actor).await.result {
                warn!(rule_id = id, "Stop before delete failed: {}", e);
            }
        }

        self.fleet.stores.rules.delete(id).await?;
        info!(rule_id = id, "Rule {} deleted", rule.name);
        self.audit(actor, AuditAction::Delete, &rule, "deleted rule");
        Ok(())
    }

    pub async fn start(&self, id: RuleId, actor: &Actor) -> Transition<Rule> {
        let mut compensation = Compensation::new();
        let result = self.start_with(id, actor, &mut compensation).await;
        Transition::new(result, compensation)
    }

    pub async fn stop(&self, id: RuleId, actor: &Actor) -> Transition<Rule> {
        let mut compensation = Compensation::new();
        let result = self.stop_with(id, actor, &mut compensation).await;
        Transition::new(result, compensation)
    }

    async fn start_with(
        &self,
        id: RuleId,
        actor: &Actor,
        compensation: &mut Compensation,
    ) -> Result<Rule, ControlError> {
        let rule = self.get(id).await?;
        if rule.status == RunStatus::Running {
            debug!(rule_id = id, "Rule already running");
            return Ok(rule);
        }

        let chain = match rule.entry {
            RuleEntry::Forward { .. } => None,
            RuleEntry::Tunnel { tunnel_id } => {
                let tunnel = self
                    .fleet
                    .tunnels()
                    .start_with(tunnel_id, actor, compensation)
                    .await?;
                match non_empty(tunnel.chain_id) {
                    Some(chain) => Some(chain),
                    None => {
                        self.mark_error(id).await;
                        return Err(ControlError::TunnelChainUnavailable(tunnel_id));
                    }
                }
            }
        };

        let node = self.fleet.node(rule.entry_node_id).await?;
        let api = self.fleet.online_api(&node)?;

        if rule.status == RunStatus::Error {
            self.clear_leftovers(&rule, &node, &*api, compensation)
                .await?;
        }

        let observer = match self.provision_observer(&rule, &node, &*api).await {
            Ok(observer) => Some(observer),
            Err(e @ (ControlError::PanelUrlMissing | ControlError::ObserverFailed { .. })) => {
                match self.fleet.config.observer_policy {
                    ObserverPolicy::BestEffort => {
                        warn!(rule_id = id, "Starting rule without traffic stats: {}", e);
                        None
                    }
                    ObserverPolicy::Required => {
                        if matches!(e, ControlError::ObserverFailed { .. }) {
                            self.mark_error(id).await;
                        }
                        return Err(e);
                    }
                }
            }
            Err(e) => return Err(e),
        };

        let service_name = rule_service_name(id);
        let mut service = forward_service(&ForwardSpec {
            name: &service_name,
            protocol: rule.protocol.as_str(),
            listen_port: rule.listen_port,
            targets: &rule.targets,
            strategy: Some(rule.strategy.as_str()),
            chain: chain.as_deref(),
        });
        if let Some(observer) = &observer {
            service = service.with_observer(observer);
        }

        if let Err(source) = api.create_service(&service).await {
            if let Some(observer) = &observer {
                compensation
                    .run(
                        node.id,
                        &*api,
                        CleanupAction::DeleteObserver(observer.clone()),
                    )
                    .await;
            }
            self.mark_error(id).await;
            return Err(ControlError::StartFailed {
                kind: ResourceKind::Rule,
                id,
                source,
            });
        }

        if let Err(e) = self
            .fleet
            .stores
            .rules
            .record_started(id, &service_name, observer.as_deref())
            .await
        {
            compensation
                .run(node.id, &*api, CleanupAction::DeleteService(service_name))
                .await;
            if let Some(observer) = observer {
                compensation
                    .run(node.id, &*api, CleanupAction::DeleteObserver(observer))
                    .await;
            }
            self.mark_error(id).await;
            return Err(e.into());
        }
        self.fleet.save_config(node.id, &*api).await;

        info!(
            rule_id = id,
            node_id = node.id,
            "Rule {} started on :{}", rule.name, rule.listen_port
        );
        self.audit(actor, AuditAction::Start, &rule, "started rule");
        self.get(id).await
    }

    /// Create the rule's report observer and return its name
    async fn provision_observer(
        &self,
        rule: &Rule,
        node: &Node,
        api: &dyn NodeApi,
    ) -> Result<String, ControlError> {
        let panel_url = self
            .fleet
            .stores
            .settings
            .get(PANEL_URL)
            .await?
            .and_then(|url| non_empty(Some(url)))
            .ok_or(ControlError::PanelUrlMissing)?;

        let name = observer_name(&node.name, rule.id);
        api.create_observer(&report_observer(&name, &panel_url))
            .await
            .map_err(|source| ControlError::ObserverFailed {
                name: name.clone(),
                source,
            })?;
        Ok(name)
    }

    /// Remove the service and observer an earlier failed start left on the
    /// node. Creation skips names that already exist, so anything left in
    /// place would keep its old settings.
    async fn clear_leftovers(
        &self,
        rule: &Rule,
        node: &Node,
        api: &dyn NodeApi,
        compensation: &mut Compensation,
    ) -> Result<(), ControlError> {
        let observer = non_empty(rule.observer_id.clone())
            .unwrap_or_else(|| observer_name(&node.name, rule.id));
        let leftovers = [
            CleanupAction::DeleteService(rule.service_name()),
            CleanupAction::DeleteObserver(observer),
        ];
        for action in leftovers {
            if let Err(source) = compensation.run_required(node.id, api, action).await {
                return Err(ControlError::StartFailed {
                    kind: ResourceKind::Rule,
                    id: rule.id,
                    source,
                });
            }
        }
        debug!(rule_id = rule.id, "Cleared leftovers of failed start");
        Ok(())
    }

    async fn stop_with(
        &self,
        id: RuleId,
        actor: &Actor,
        compensation: &mut Compensation,
    ) -> Result<Rule, ControlError> {
        let rule = self.get(id).await?;
        if rule.status == RunStatus::Stopped {
            debug!(rule_id = id, "Rule already stopped");
            return Ok(rule);
        }

        let node = self.fleet.stores.nodes.get(rule.entry_node_id).await?;
        let reachable = node
            .filter(Node::is_online)
            .and_then(|node| self.fleet.api_for(&node).map(|api| (node, api)));

        match reachable {
            Some((node, api)) => {
                compensation
                    .run(
                        node.id,
                        &*api,
                        CleanupAction::DeleteService(rule.service_name()),
                    )
                    .await;
                let observer = non_empty(rule.observer_id.clone())
                    .unwrap_or_else(|| observer_name(&node.name, id));
                compensation
                    .run(node.id, &*api, CleanupAction::DeleteObserver(observer))
                    .await;
                self.fleet.save_config(node.id, &*api).await;
            }
            None => debug!(rule_id = id, "Entry node not online, marking stopped locally"),
        }

        self.fleet
            .stores
            .rules
            .set_status(id, RunStatus::Stopped)
            .await?;

        info!(rule_id = id, "Rule {} stopped", rule.name);
        self.audit(actor, AuditAction::Stop, &rule, "stopped rule");
        self.get(id).await
    }

    async fn ensure_port_free(
        &self,
        node_id: NodeId,
        port: u16,
        exclude: Option<RuleId>,
    ) -> Result<(), ControlError> {
        if self
            .fleet
            .stores
            .rules
            .port_in_use(node_id, port, exclude)
            .await?
        {
            return Err(Conflict::PortInUse { node_id, port }.into());
        }
        Ok(())
    }

    async fn mark_error(&self, id: RuleId) {
        if let Err(e) = self
            .fleet
            .stores
            .rules
            .set_status(id, RunStatus::Error)
            .await
        {
            error!(rule_id = id, "Failed to mark rule as error: {}", e);
        }
    }

    fn audit(&self, actor: &Actor, action: AuditAction, rule: &Rule, what: &str) {
        self.fleet.audit.record(AuditEntry::new(
            actor,
            action,
            ResourceKind::Rule,
            rule.id,
            format!("{} {}", what, rule.name),
        ));
    }
}

/// A unique violation on insert/update means another rule took the port
fn port_conflict(err: StoreError, node_id: NodeId, port: u16) -> ControlError {
    match err {
        StoreError::Duplicate(_) => Conflict::PortInUse { node_id, port }.into(),
        other => other.into(),
    }
}
