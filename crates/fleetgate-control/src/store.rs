//! Persistence ports
//!
//! Status and identifier changes are narrow updates by id so that the
//! prober, the reconciler and the orchestrators never overwrite each other's
//! fields with a stale whole-record save.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::StoreError;
use crate::memory::MemoryStore;
use crate::model::{
    NewNode, NewRule, NewTunnel, Node, NodeFilter, NodeId, NodeStatus, Page, Paged, Rule,
    RuleChanges, RuleFilter, RuleId, RuleKind, RunStatus, TrafficSample, Tunnel, TunnelChanges,
    TunnelFilter, TunnelId,
};
use crate::sea_store::SeaStore;

#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn insert(&self, node: &NewNode) -> Result<Node, StoreError>;
    async fn update(&self, id: NodeId, node: &NewNode) -> Result<Option<Node>, StoreError>;
    async fn delete(&self, id: NodeId) -> Result<bool, StoreError>;
    async fn get(&self, id: NodeId) -> Result<Option<Node>, StoreError>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Node>, StoreError>;
    async fn list(&self, filter: &NodeFilter, page: Page) -> Result<Paged<Node>, StoreError>;
    async fn all(&self) -> Result<Vec<Node>, StoreError>;
    async fn count(&self, status: Option<NodeStatus>) -> Result<u64, StoreError>;

    /// Persist a probe outcome: status and last-checked time together
    async fn record_probe(
        &self,
        id: NodeId,
        status: NodeStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert(&self, rule: &NewRule) -> Result<Rule, StoreError>;
    async fn update(&self, id: RuleId, changes: &RuleChanges) -> Result<Option<Rule>, StoreError>;
    async fn delete(&self, id: RuleId) -> Result<bool, StoreError>;
    async fn get(&self, id: RuleId) -> Result<Option<Rule>, StoreError>;
    async fn list(&self, filter: &RuleFilter, page: Page) -> Result<Paged<Rule>, StoreError>;

    /// Rules whose listen port lives on `node_id`
    async fn by_entry_node(&self, node_id: NodeId) -> Result<Vec<Rule>, StoreError>;

    async fn port_in_use(
        &self,
        node_id: NodeId,
        port: u16,
        exclude: Option<RuleId>,
    ) -> Result<bool, StoreError>;

    async fn count(
        &self,
        status: Option<RunStatus>,
        kind: Option<RuleKind>,
    ) -> Result<u64, StoreError>;
    async fn count_by_entry_node(&self, node_id: NodeId) -> Result<u64, StoreError>;
    async fn count_by_tunnel(&self, tunnel_id: TunnelId) -> Result<u64, StoreError>;

    async fn set_status(&self, id: RuleId, status: RunStatus) -> Result<(), StoreError>;

    /// Compare-and-set; returns whether the row still had `expected`
    async fn set_status_if(
        &self,
        id: RuleId,
        expected: RunStatus,
        status: RunStatus,
    ) -> Result<bool, StoreError>;

    /// Downgrade every running rule on the node to stopped
    async fn stop_running_on_node(&self, node_id: NodeId) -> Result<u64, StoreError>;

    /// Mark running together with the remote identifiers
    async fn record_started(
        &self,
        id: RuleId,
        service_id: &str,
        observer_id: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Overwrite traffic counters; false when the rule does not exist
    async fn update_traffic(&self, id: RuleId, sample: TrafficSample) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait TunnelStore: Send + Sync {
    async fn insert(&self, tunnel: &NewTunnel) -> Result<Tunnel, StoreError>;
    async fn update(
        &self,
        id: TunnelId,
        changes: &TunnelChanges,
    ) -> Result<Option<Tunnel>, StoreError>;
    async fn delete(&self, id: TunnelId) -> Result<bool, StoreError>;
    async fn get(&self, id: TunnelId) -> Result<Option<Tunnel>, StoreError>;
    async fn list(&self, filter: &TunnelFilter, page: Page) -> Result<Paged<Tunnel>, StoreError>;

    /// Tunnels whose relay service lives on `node_id`
    async fn by_exit_node(&self, node_id: NodeId) -> Result<Vec<Tunnel>, StoreError>;

    async fn count(&self, status: Option<RunStatus>) -> Result<u64, StoreError>;
    async fn count_by_node(&self, node_id: NodeId) -> Result<u64, StoreError>;

    async fn set_status(&self, id: TunnelId, status: RunStatus) -> Result<(), StoreError>;
    async fn set_status_if(
        &self,
        id: TunnelId,
        expected: RunStatus,
        status: RunStatus,
    ) -> Result<bool, StoreError>;

    /// Downgrade every running tunnel with the node as entry or exit
    async fn stop_running_on_node(&self, node_id: NodeId) -> Result<u64, StoreError>;

    async fn set_relay_endpoint(&self, id: TunnelId, relay_addr: &str) -> Result<(), StoreError>;

    async fn record_started(
        &self,
        id: TunnelId,
        service_id: &str,
        chain_id: &str,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Bundle of persistence ports handed to every component
#[derive(Clone)]
pub struct Stores {
    pub nodes: Arc<dyn NodeStore>,
    pub rules: Arc<dyn RuleStore>,
    pub tunnels: Arc<dyn TunnelStore>,
    pub settings: Arc<dyn SettingsStore>,
}

impl Stores {
    pub fn sea(db: sea_orm::DatabaseConnection) -> Self {
        let store = Arc::new(SeaStore::new(db));
        Self {
            nodes: store.clone(),
            rules: store.clone(),
            tunnels: store.clone(),
            settings: store,
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            nodes: store.clone(),
            rules: store.clone(),
            tunnels: store.clone(),
            settings: store,
        }
    }
}
