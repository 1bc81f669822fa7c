//! Scripted fleet of fake nodes shared by the control-plane tests

#![allow(dead_code)]

pub mod failing_store;

use async_trait::async_trait;
use fleetgate_control::{
    Actor, ControlConfig, Fleet, MemoryStore, NodeStore, ObserverPolicy, Stores,
    TracingAuditSink,
};
use fleetgate_control::model::{Node, NodeDraft, NodeStatus, RuleDraft, RuleKind, TunnelDraft};
use fleetgate_db::entities::system_setting::PANEL_URL;
use fleetgate_gateway::{
    ChainConfig, FailureCause, LimiterConfig, NodeApi, NodeConnector, NodeEndpoint,
    ObserverConfig, Operation, RemoteConfig, RemoteError, ServiceConfig, ServiceStatus,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use failing_store::FailingStore;

/// One fake node; state survives across `connect` calls
#[derive(Default)]
pub struct FakeNode {
    unreachable: AtomicBool,
    services: Mutex<BTreeMap<String, ServiceConfig>>,
    chains: Mutex<BTreeMap<String, ChainConfig>>,
    observers: Mutex<BTreeMap<String, ObserverConfig>>,
    limiters: Mutex<BTreeMap<String, LimiterConfig>>,
    /// Remote state reported for a service, `running` when unset
    states: Mutex<HashMap<String, String>>,
    /// Calls that answer with a 500, e.g. `create_chain`
    failing: Mutex<HashSet<String>>,
    /// How long `probe` or `fetch_config` take to answer
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

impl FakeNode {
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn fail(&self, call: &str) {
        self.failing.lock().unwrap().insert(call.to_string());
    }

    pub fn delay(&self, call: &str, duration: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(call.to_string(), duration);
    }

    async fn pause(&self, call: &str) {
        let delay = self.delays.lock().unwrap().get(call).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn set_state(&self, service: &str, state: &str) {
        self.states
            .lock()
            .unwrap()
            .insert(service.to_string(), state.to_string());
    }

    pub fn put_service(&self, service: ServiceConfig) {
        self.services
            .lock()
            .unwrap()
            .insert(service.name.clone(), service);
    }

    pub fn service(&self, name: &str) -> Option<ServiceConfig> {
        self.services.lock().unwrap().get(name).cloned()
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.lock().unwrap().contains_key(name)
    }

    pub fn has_chain(&self, name: &str) -> bool {
        self.chains.lock().unwrap().contains_key(name)
    }

    pub fn has_observer(&self, name: &str) -> bool {
        self.observers.lock().unwrap().contains_key(name)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than probes and config fetches
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c != "probe" && c != "fetch_config")
            .collect()
    }

    fn enter(&self, call: &str, operation: Operation, resource: &str) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(call.to_string());
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::new(
                operation,
                resource,
                FailureCause::Transport("connection refused".to_string()),
            ));
        }
        let prefix = call.split(' ').next().unwrap_or(call);
        if self.failing.lock().unwrap().contains(prefix) {
            return Err(RemoteError::new(
                operation,
                resource,
                FailureCause::Status {
                    code: 500,
                    body: "scripted failure".to_string(),
                },
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeApi for FakeNode {
    async fn probe(&self) -> Result<(), RemoteError> {
        self.pause("probe").await;
        self.enter("probe", Operation::Probe, "config")
    }

    async fn fetch_config(&self) -> Result<RemoteConfig, RemoteError> {
        self.pause("fetch_config").await;
        self.enter("fetch_config", Operation::FetchConfig, "config")?;
        let states = self.states.lock().unwrap().clone();
        let services = self
            .services
            .lock()
            .unwrap()
            .values()
            .map(|service| {
                let mut service = service.clone();
                service.status = Some(ServiceStatus {
                    state: states
                        .get(&service.name)
                        .cloned()
                        .unwrap_or_else(|| "running".to_string()),
                });
                service
            })
            .collect();

        Ok(RemoteConfig {
            services,
            chains: self.chains.lock().unwrap().values().cloned().collect(),
            observers: self.observers.lock().unwrap().values().cloned().collect(),
            limiters: self.limiters.lock().unwrap().values().cloned().collect(),
        })
    }

    async fn save_config(&self) -> Result<(), RemoteError> {
        self.enter("save_config", Operation::SaveConfig, "config")
    }

    async fn create_service(&self, service: &ServiceConfig) -> Result<(), RemoteError> {
        let call = format!("create_service {}", service.name);
        self.enter(&call, Operation::Create, &service.name)?;
        self.services
            .lock()
            .unwrap()
            .entry(service.name.clone())
            .or_insert_with(|| service.clone());
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<(), RemoteError> {
        self.enter(&format!("delete_service {}", name), Operation::Delete, name)?;
        self.services.lock().unwrap().remove(name);
        Ok(())
    }

    async fn create_chain(&self, chain: &ChainConfig) -> Result<(), RemoteError> {
        let call = format!("create_chain {}", chain.name);
        self.enter(&call, Operation::Create, &chain.name)?;
        self.chains
            .lock()
            .unwrap()
            .entry(chain.name.clone())
            .or_insert_with(|| chain.clone());
        Ok(())
    }

    async fn delete_chain(&self, name: &str) -> Result<(), RemoteError> {
        self.enter(&format!("delete_chain {}", name), Operation::Delete, name)?;
        self.chains.lock().unwrap().remove(name);
        Ok(())
    }

    async fn create_observer(&self, observer: &ObserverConfig) -> Result<(), RemoteError> {
        let call = format!("create_observer {}", observer.name);
        self.enter(&call, Operation::Create, &observer.name)?;
        self.observers
            .lock()
            .unwrap()
            .entry(observer.name.clone())
            .or_insert_with(|| observer.clone());
        Ok(())
    }

    async fn delete_observer(&self, name: &str) -> Result<(), RemoteError> {
        self.enter(&format!("delete_observer {}", name), Operation::Delete, name)?;
        self.observers.lock().unwrap().remove(name);
        Ok(())
    }

    async fn create_limiter(&self, limiter: &LimiterConfig) -> Result<(), RemoteError> {
        let call = format!("create_limiter {}", limiter.name);
        self.enter(&call, Operation::Create, &limiter.name)?;
        self.limiters
            .lock()
            .unwrap()
            .entry(limiter.name.clone())
            .or_insert_with(|| limiter.clone());
        Ok(())
    }

    async fn delete_limiter(&self, name: &str) -> Result<(), RemoteError> {
        self.enter(&format!("delete_limiter {}", name), Operation::Delete, name)?;
        self.limiters.lock().unwrap().remove(name);
        Ok(())
    }
}

/// Fake nodes keyed by address
#[derive(Default)]
pub struct FakeFleet {
    nodes: Mutex<HashMap<String, Arc<FakeNode>>>,
}

impl FakeFleet {
    pub fn node(&self, address: &str) -> Arc<FakeNode> {
        self.nodes
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .clone()
    }

    /// Every call made to any node
    pub fn total_calls(&self) -> usize {
        self.nodes
            .lock()
            .unwrap()
            .values()
            .map(|node| node.calls().len())
            .sum()
    }
}

impl NodeConnector for FakeFleet {
    fn connect(&self, endpoint: &NodeEndpoint) -> Arc<dyn NodeApi> {
        self.node(&endpoint.address)
    }
}

pub struct Harness {
    pub fleet: Fleet,
    pub store: Arc<MemoryStore>,
    pub remote: Arc<FakeFleet>,
    pub actor: Actor,
}

pub async fn harness() -> Harness {
    harness_with(ObserverPolicy::Required).await
}

pub async fn harness_with(policy: ObserverPolicy) -> Harness {
    harness_with_config(ControlConfig {
        observer_policy: policy,
        ..ControlConfig::default()
    })
    .await
}

pub async fn harness_with_config(config: ControlConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(FakeFleet::default());
    let fleet = Fleet::new(
        Stores::memory(store.clone()),
        remote.clone(),
        Arc::new(TracingAuditSink),
        config,
    );
    fleet
        .stores
        .settings
        .set(PANEL_URL, "http://panel.local:3080")
        .await
        .unwrap();

    Harness {
        fleet,
        store,
        remote,
        actor: Actor::new("tester"),
    }
}

impl Harness {
    /// Route rule and tunnel writes through a [`FailingStore`]
    pub fn with_failing_writes(mut self) -> (Self, Arc<FailingStore>) {
        let failing = Arc::new(FailingStore::new(self.store.clone()));
        self.fleet.stores.rules = failing.clone();
        self.fleet.stores.tunnels = failing.clone();
        (self, failing)
    }

    /// Register a node and mark it online the way the prober would
    pub async fn online_node(&self, name: &str, address: &str) -> Node {
        let node = self.offline_node(name, address).await;
        self.fleet
            .stores
            .nodes
            .record_probe(node.id, NodeStatus::Online, chrono::Utc::now())
            .await
            .unwrap();
        self.fleet.stores.nodes.get(node.id).await.unwrap().unwrap()
    }

    pub async fn offline_node(&self, name: &str, address: &str) -> Node {
        self.fleet
            .nodes()
            .create(
                NodeDraft {
                    name: name.to_string(),
                    address: address.to_string(),
                    port: 18080,
                    ..NodeDraft::default()
                },
                &self.actor,
            )
            .await
            .unwrap()
    }

    pub async fn node_status(&self, id: i32) -> NodeStatus {
        NodeStore::get(self.store.as_ref(), id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

pub fn tunnel_draft(name: &str, entry: i32, exit: i32, relay_port: i64) -> TunnelDraft {
    TunnelDraft {
        name: name.to_string(),
        entry_node_id: entry,
        exit_node_id: exit,
        protocol: fleetgate_control::model::Protocol::Tcp,
        relay_port,
        remark: None,
    }
}

pub fn forward_draft(name: &str, node_id: i32, port: i64, targets: &[&str]) -> RuleDraft {
    RuleDraft {
        name: name.to_string(),
        kind: RuleKind::Forward,
        node_id: Some(node_id),
        tunnel_id: None,
        protocol: fleetgate_control::model::Protocol::Tcp,
        listen_port: port,
        targets: targets.iter().map(|t| t.to_string()).collect(),
        strategy: None,
        enable_tls: false,
        remark: None,
    }
}

pub fn tunnel_rule_draft(name: &str, tunnel_id: i32, port: i64, targets: &[&str]) -> RuleDraft {
    RuleDraft {
        kind: RuleKind::Tunnel,
        node_id: None,
        tunnel_id: Some(tunnel_id),
        ..forward_draft(name, 0, port, targets)
    }
}
