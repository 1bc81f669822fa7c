//! Control plane for a fleet of proxy nodes
//!
//! Keeps the locally recorded state of nodes, rules and tunnels consistent
//! with what is actually configured on each node:
//! - [`HealthProber`] probes node reachability and cascades local stops when
//!   a node drops offline
//! - [`StateReconciler`] overwrites local rule/tunnel status with the state
//!   observed on each reachable node
//! - [`TunnelOrchestrator`] and [`RuleOrchestrator`] drive the multi-step
//!   remote provisioning sequences with compensation on partial failure
//! - [`Scheduler`] runs the recurring tasks and drains them on shutdown
//!
//! Persistence is reached through the port traits in [`store`]; the
//! sea-orm backed [`SeaStore`] is used in production and [`MemoryStore`] in
//! tests.

pub mod audit;
pub mod compensation;
pub mod config;
pub mod error;
pub mod memory;
pub mod model;
pub mod node;
pub mod observer;
pub mod prober;
pub mod reconciler;
pub mod rule;
pub mod scheduler;
pub mod sea_store;
pub mod stats;
pub mod store;
pub mod task_tracker;
pub mod tunnel;

pub use audit::{Actor, AuditAction, AuditEntry, AuditSink, DbAuditSink, TracingAuditSink};
pub use compensation::{CleanupAction, CleanupAttempt, Compensation, Transition};
pub use config::{ControlConfig, ObserverPolicy};
pub use error::{Conflict, ControlError, ErrorClass, ResourceKind, StoreError};
pub use memory::MemoryStore;
pub use node::NodeRegistry;
pub use observer::{
    parse_service_id, IngestSummary, ObserverEvent, ObserverReport, ObserverStats, TrafficIngestor,
};
pub use prober::{HealthProber, ProbeReport};
pub use reconciler::{ReconcileReport, StateReconciler};
pub use rule::RuleOrchestrator;
pub use scheduler::Scheduler;
pub use sea_store::SeaStore;
pub use stats::{DashboardStats, NodeStats, RuleStats, StatsService, TunnelStats};
pub use store::{NodeStore, RuleStore, SettingsStore, Stores, TunnelStore};
pub use task_tracker::TaskTracker;
pub use tunnel::TunnelOrchestrator;

use fleetgate_gateway::{NodeApi, NodeConnector};
use std::sync::Arc;
use tracing::warn;

use model::{Node, NodeId};

/// Everything the control plane components share
#[derive(Clone)]
pub struct Fleet {
    pub stores: Stores,
    pub connector: Arc<dyn NodeConnector>,
    pub audit: Arc<dyn AuditSink>,
    pub config: ControlConfig,
}

impl Fleet {
    pub fn new(
        stores: Stores,
        connector: Arc<dyn NodeConnector>,
        audit: Arc<dyn AuditSink>,
        config: ControlConfig,
    ) -> Self {
        Self {
            stores,
            connector,
            audit,
            config,
        }
    }

    pub fn nodes(&self) -> NodeRegistry {
        NodeRegistry::new(self.clone())
    }

    pub fn tunnels(&self) -> TunnelOrchestrator {
        TunnelOrchestrator::new(self.clone())
    }

    pub fn rules(&self) -> RuleOrchestrator {
        RuleOrchestrator::new(self.clone())
    }

    pub fn prober(&self) -> HealthProber {
        HealthProber::new(self.clone())
    }

    pub fn reconciler(&self) -> StateReconciler {
        StateReconciler::new(self.clone())
    }

    pub fn ingestor(&self) -> TrafficIngestor {
        TrafficIngestor::new(self.stores.rules.clone())
    }

    pub fn stats(&self) -> StatsService {
        StatsService::new(self.stores.clone())
    }

    pub(crate) async fn node(&self, id: NodeId) -> Result<Node, ControlError> {
        self.stores
            .nodes
            .get(id)
            .await?
            .ok_or_else(|| ControlError::not_found(ResourceKind::Node, id))
    }

    /// API handle for a node, `None` when it has nothing to dial
    pub(crate) fn api_for(&self, node: &Node) -> Option<Arc<dyn NodeApi>> {
        node.endpoint()
            .map(|endpoint| self.connector.connect(&endpoint))
    }

    /// API handle for a node that must currently be online
    pub(crate) fn online_api(&self, node: &Node) -> Result<Arc<dyn NodeApi>, ControlError> {
        let unavailable = || Conflict::NodeUnavailable {
            node_id: node.id,
            status: node.status,
        };
        if !node.is_online() {
            return Err(unavailable().into());
        }
        self.api_for(node).ok_or_else(|| unavailable().into())
    }

    /// Persist a node's running config; failures are logged only
    pub(crate) async fn save_config(&self, node_id: NodeId, api: &dyn NodeApi) {
        if let Err(e) = api.save_config().await {
            warn!(node_id, "Failed to save node config: {}", e);
        }
    }
}
