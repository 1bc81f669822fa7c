//! Tunnel orchestration
//!
//! A tunnel spans two nodes: a relay service on the exit node and a chain on
//! the entry node that dials it. Start creates them in that order and
//! removes the relay again when the chain cannot be created. Stop tears
//! both down best-effort and always ends locally stopped.

use fleetgate_gateway::{chain_name, relay_chain, relay_endpoint, relay_service, relay_service_name};
use tracing::{debug, error, info, warn};

use crate::audit::{Actor, AuditAction, AuditEntry};
use crate::compensation::{CleanupAction, Compensation, Transition};
use crate::error::{Conflict, ControlError, ResourceKind, StoreError};
use crate::model::{
    non_empty, require_name, require_port, NewTunnel, Page, Paged, RunStatus, Tunnel,
    TunnelChanges, TunnelDraft, TunnelFilter, TunnelId, TunnelUpdate,
};
use crate::Fleet;

pub struct TunnelOrchestrator {
    fleet: Fleet,
}

impl TunnelOrchestrator {
    pub fn new(fleet: Fleet) -> Self {
        Self { fleet }
    }

    pub async fn get(&self, id: TunnelId) -> Result<Tunnel, ControlError> {
        self.fleet
            .stores
            .tunnels
            .get(id)
            .await?
            .ok_or_else(|| ControlError::not_found(ResourceKind::Tunnel, id))
    }

    pub async fn list(
        &self,
        filter: &TunnelFilter,
        page: Page,
    ) -> Result<Paged<Tunnel>, ControlError> {
        Ok(self.fleet.stores.tunnels.list(filter, page).await?)
    }

    pub async fn create(&self, draft: TunnelDraft, actor: &Actor) -> Result<Tunnel, ControlError> {
        let name = require_name(&draft.name, "name")?;
        let relay_port = require_port(draft.relay_port, "relay_port")?;
        if draft.entry_node_id == draft.exit_node_id {
            return Err(ControlError::validation(
                "entry and exit node of a tunnel must differ",
            ));
        }
        self.fleet.node(draft.entry_node_id).await?;
        self.fleet.node(draft.exit_node_id).await?;

        let inserted = self
            .fleet
            .stores
            .tunnels
            .insert(&NewTunnel {
                name,
                entry_node_id: draft.entry_node_id,
                exit_node_id: draft.exit_node_id,
                protocol: draft.protocol,
                relay_port,
                remark: non_empty(draft.remark),
            })
            .await;
        let tunnel = match inserted {
            Ok(tunnel) => tunnel,
            // One of the nodes went away after the lookup
            Err(StoreError::Referenced(detail)) => {
                self.fleet.node(draft.entry_node_id).await?;
                self.fleet.node(draft.exit_node_id).await?;
                return Err(StoreError::Referenced(detail).into());
            }
            Err(e) => return Err(e.into()),
        };

        info!(tunnel_id = tunnel.id, "Tunnel {} created", tunnel.name);
        self.audit(actor, AuditAction::Create, &tunnel, "created tunnel");
        Ok(tunnel)
    }

    pub async fn update(
        &self,
        id: TunnelId,
        update: TunnelUpdate,
        actor: &Actor,
    ) -> Result<Tunnel, ControlError> {
        let current = self.get(id).await?;
        if current.status == RunStatus::Running {
            return Err(Conflict::TunnelRunning(id).into());
        }

        let changes = TunnelChanges {
            name: require_name(update.name.as_deref().unwrap_or(&current.name), "name")?,
            protocol: update.protocol.unwrap_or(current.protocol),
            relay_port: match update.relay_port {
                Some(port) => require_port(port, "relay_port")?,
                None => current.relay_port,
            },
            remark: match update.remark {
                Some(remark) => non_empty(Some(remark)),
                None => current.remark,
            },
        };

        let tunnel = self
            .fleet
            .stores
            .tunnels
            .update(id, &changes)
            .await?
            .ok_or_else(|| ControlError::not_found(ResourceKind::Tunnel, id))?;

        self.audit(actor, AuditAction::Update, &tunnel, "updated tunnel");
        Ok(tunnel)
    }

    /// Remove a tunnel no rule references, stopping it first when needed
    pub async fn delete(&self, id: TunnelId, actor: &Actor) -> Result<(), ControlError> {
        let tunnel = self.get(id).await?;
        if self.fleet.stores.rules.count_by_tunnel(id).await? > 0 {
            return Err(Conflict::TunnelInUse(id).into());
        }

        if tunnel.status != RunStatus::Stopped {
            if let Err(e) = self.stop(id, actor).await.result {
                warn!(tunnel_id = id, "Stop before delete failed: {}", e);
            }
        }

        // A rule created since the count is caught by the foreign key
        self.fleet
            .stores
            .tunnels
            .delete(id)
            .await
            .map_err(|e| match e {
                StoreError::Referenced(_) => ControlError::from(Conflict::TunnelInUse(id)),
                other => other.into(),
            })?;
        info!(tunnel_id = id, "Tunnel {} deleted", tunnel.name);
        self.audit(actor, AuditAction::Delete, &tunnel, "deleted tunnel");
        Ok(())
    }

    pub async fn start(&self, id: TunnelId, actor: &Actor) -> Transition<Tunnel> {
        let mut compensation = Compensation::new();
        let result = self.start_with(id, actor, &mut compensation).await;
        Transition::new(result, compensation)
    }

    pub async fn stop(&self, id: TunnelId, actor: &Actor) -> Transition<Tunnel> {
        let mut compensation = Compensation::new();
        let result = self.stop_with(id, actor, &mut compensation).await;
        Transition::new(result, compensation)
    }

    /// Start sequence; a running tunnel is returned untouched
    pub(crate) async fn start_with(
        &self,
        id: TunnelId,
        actor: &Actor,
        compensation: &mut Compensation,
    ) -> Result<Tunnel, ControlError> {
        let tunnel = self.get(id).await?;
        if tunnel.status == RunStatus::Running {
            debug!(tunnel_id = id, "Tunnel already running");
            return Ok(tunnel);
        }

        let entry = self.fleet.node(tunnel.entry_node_id).await?;
        let exit = self.fleet.node(tunnel.exit_node_id).await?;
        let entry_api = self.fleet.online_api(&entry)?;
        let exit_api = self.fleet.online_api(&exit)?;

        if tunnel.status == RunStatus::Error {
            let leftovers = [
                (
                    &entry,
                    &entry_api,
                    CleanupAction::DeleteChain(
                        non_empty(tunnel.chain_id.clone()).unwrap_or_else(|| chain_name(id)),
                    ),
                ),
                (
                    &exit,
                    &exit_api,
                    CleanupAction::DeleteService(
                        non_empty(tunnel.service_id.clone())
                            .unwrap_or_else(|| relay_service_name(id)),
                    ),
                ),
            ];
            // Creation skips existing names, so stale pieces must go first
            for (node, api, action) in leftovers {
                if let Err(source) = compensation.run_required(node.id, &**api, action).await {
                    return Err(ControlError::StartFailed {
                        kind: ResourceKind::Tunnel,
                        id,
                        source,
                    });
                }
            }
            debug!(tunnel_id = id, "Cleared leftovers of failed start");
        }

        let protocol = tunnel.protocol.as_str();
        let relay = relay_service(id, protocol, tunnel.relay_port);
        if let Err(source) = exit_api.create_service(&relay).await {
            self.mark_error(id).await;
            return Err(ControlError::StartFailed {
                kind: ResourceKind::Tunnel,
                id,
                source,
            });
        }

        let relay_addr = relay_endpoint(&exit.address, tunnel.relay_port);
        if let Err(e) = self
            .fleet
            .stores
            .tunnels
            .set_relay_endpoint(id, &relay_addr)
            .await
        {
            compensation
                .run(exit.id, &*exit_api, CleanupAction::DeleteService(relay.name))
                .await;
            self.mark_error(id).await;
            return Err(e.into());
        }

        let chain = relay_chain(id, protocol, &exit.address, tunnel.relay_port);
        if let Err(source) = entry_api.create_chain(&chain).await {
            compensation
                .run(
                    exit.id,
                    &*exit_api,
                    CleanupAction::DeleteService(relay.name.clone()),
                )
                .await;
            self.mark_error(id).await;
            return Err(ControlError::StartFailed {
                kind: ResourceKind::Tunnel,
                id,
                source,
            });
        }

        if let Err(e) = self
            .fleet
            .stores
            .tunnels
            .record_started(id, &relay.name, &chain.name)
            .await
        {
            compensation
                .run(entry.id, &*entry_api, CleanupAction::DeleteChain(chain.name))
                .await;
            compensation
                .run(exit.id, &*exit_api, CleanupAction::DeleteService(relay.name))
                .await;
            self.mark_error(id).await;
            return Err(e.into());
        }
        self.fleet.save_config(exit.id, &*exit_api).await;
        self.fleet.save_config(entry.id, &*entry_api).await;

        info!(
            tunnel_id = id,
            "Tunnel {} started, relay {} via {}", tunnel.name, relay.name, relay_addr
        );
        self.audit(actor, AuditAction::Start, &tunnel, "started tunnel");
        self.get(id).await
    }

    /// Stop sequence; remote cleanup only reaches online nodes
    pub(crate) async fn stop_with(
        &self,
        id: TunnelId,
        actor: &Actor,
        compensation: &mut Compensation,
    ) -> Result<Tunnel, ControlError> {
        let tunnel = self.get(id).await?;
        if tunnel.status == RunStatus::Stopped {
            debug!(tunnel_id = id, "Tunnel already stopped");
            return Ok(tunnel);
        }

        let nodes = &self.fleet.stores.nodes;

        match nodes.get(tunnel.entry_node_id).await? {
            Some(entry) if entry.is_online() => {
                if let Some(api) = self.fleet.api_for(&entry) {
                    let chain = non_empty(tunnel.chain_id.clone()).unwrap_or_else(|| chain_name(id));
                    compensation
                        .run(entry.id, &*api, CleanupAction::DeleteChain(chain))
                        .await;
                    self.fleet.save_config(entry.id, &*api).await;
                }
            }
            _ => debug!(tunnel_id = id, "Entry node not online, chain left in place"),
        }

        match nodes.get(tunnel.exit_node_id).await? {
            Some(exit) if exit.is_online() => {
                if let Some(api) = self.fleet.api_for(&exit) {
                    let relay = non_empty(tunnel.service_id.clone())
                        .unwrap_or_else(|| relay_service_name(id));
                    compensation
                        .run(exit.id, &*api, CleanupAction::DeleteService(relay))
                        .await;
                    self.fleet.save_config(exit.id, &*api).await;
                }
            }
            _ => debug!(tunnel_id = id, "Exit node not online, relay left in place"),
        }

        self.fleet
            .stores
            .tunnels
            .set_status(id, RunStatus::Stopped)
            .await?;

        info!(tunnel_id = id, "Tunnel {} stopped", tunnel.name);
        self.audit(actor, AuditAction::Stop, &tunnel, "stopped tunnel");
        self.get(id).await
    }

    async fn mark_error(&self, id: TunnelId) {
        if let Err(e) = self
            .fleet
            .stores
            .tunnels
            .set_status(id, RunStatus::Error)
            .await
        {
            error!(tunnel_id = id, "Failed to mark tunnel as error: {}", e);
        }
    }

    fn audit(&self, actor: &Actor, action: AuditAction, tunnel: &Tunnel, what: &str) {
        self.fleet.audit.record(AuditEntry::new(
            actor,
            action,
            ResourceKind::Tunnel,
            tunnel.id,
            format!("{} {}", what, tunnel.name),
        ));
    }
}
