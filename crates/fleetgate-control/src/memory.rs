//! In-memory store
//!
//! Enforces the same uniqueness rules as the database schema, refuses to
//! delete nodes and tunnels that are still referenced, and counts every
//! mutating call, which lets tests assert that a pass wrote nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::model::{
    keyword_matches, NewNode, NewRule, NewTunnel, Node, NodeFilter, NodeId, NodeStatus, Page,
    Paged, Rule, RuleChanges, RuleFilter, RuleId, RuleKind, RunStatus, Traffic, TrafficSample,
    Tunnel, TunnelChanges, TunnelFilter, TunnelId,
};
use crate::store::{NodeStore, RuleStore, SettingsStore, TunnelStore};

#[derive(Default)]
pub struct MemoryStore {
    nodes: DashMap<NodeId, Node>,
    rules: DashMap<RuleId, Rule>,
    tunnels: DashMap<TunnelId, Tunnel>,
    settings: DashMap<String, String>,
    next_node: AtomicI32,
    next_rule: AtomicI32,
    next_tunnel: AtomicI32,
    writes: AtomicU64,
    // Serialises the check-then-insert of unique keys
    unique: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls made so far
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn next_id(counter: &AtomicI32) -> i32 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn node_name_taken(&self, name: &str, exclude: Option<NodeId>) -> bool {
        self.nodes
            .iter()
            .any(|n| n.name == name && Some(n.id) != exclude)
    }

    fn port_taken(&self, node_id: NodeId, port: u16, exclude: Option<RuleId>) -> bool {
        self.rules.iter().any(|r| {
            r.entry_node_id == node_id && r.listen_port == port && Some(r.id) != exclude
        })
    }

    fn update_rule<F>(&self, id: RuleId, apply: F) -> bool
    where
        F: FnOnce(&mut Rule),
    {
        self.wrote();
        match self.rules.get_mut(&id) {
            Some(mut rule) => {
                apply(rule.value_mut());
                true
            }
            None => false,
        }
    }

    fn update_tunnel<F>(&self, id: TunnelId, apply: F) -> bool
    where
        F: FnOnce(&mut Tunnel),
    {
        self.wrote();
        match self.tunnels.get_mut(&id) {
            Some(mut tunnel) => {
                apply(tunnel.value_mut());
                true
            }
            None => false,
        }
    }

    fn lock_unique(&self) -> std::sync::MutexGuard<'_, ()> {
        self.unique.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn paginate<T: Clone>(mut items: Vec<T>, page: Page, id: impl Fn(&T) -> i32) -> Paged<T> {
    items.sort_by_key(|item| std::cmp::Reverse(id(item)));
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.page_size as usize)
        .collect();

    Paged {
        items,
        total,
        page: page.page,
        page_size: page.page_size,
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn insert(&self, new: &NewNode) -> Result<Node, StoreError> {
        self.wrote();
        let _guard = self.lock_unique();
        if self.node_name_taken(&new.name, None) {
            return Err(StoreError::Duplicate(format!("nodes.name = {}", new.name)));
        }

        let now = Utc::now();
        let node = Node {
            id: Self::next_id(&self.next_node),
            name: new.name.clone(),
            address: new.address.clone(),
            port: i32::from(new.port),
            username: new.username.clone(),
            password: new.password.clone(),
            status: NodeStatus::Offline,
            total_bytes: 0,
            input_bytes: 0,
            output_bytes: 0,
            last_check_at: None,
            remark: new.remark.clone(),
            created_at: now,
            updated_at: now,
        };
        self.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn update(&self, id: NodeId, new: &NewNode) -> Result<Option<Node>, StoreError> {
        self.wrote();
        let _guard = self.lock_unique();
        if self.node_name_taken(&new.name, Some(id)) {
            return Err(StoreError::Duplicate(format!("nodes.name = {}", new.name)));
        }

        Ok(self.nodes.get_mut(&id).map(|mut node| {
            node.name = new.name.clone();
            node.address = new.address.clone();
            node.port = i32::from(new.port);
            node.username = new.username.clone();
            node.password = new.password.clone();
            node.remark = new.remark.clone();
            node.updated_at = Utc::now();
            node.clone()
        }))
    }

    async fn delete(&self, id: NodeId) -> Result<bool, StoreError> {
        self.wrote();
        let _guard = self.lock_unique();
        let referenced = self
            .rules
            .iter()
            .any(|r| r.entry_node_id == id || r.entry.node_id() == Some(id))
            || self.tunnels.iter().any(|t| t.references(id));
        if referenced {
            return Err(StoreError::Referenced(format!("nodes.id = {}", id)));
        }
        Ok(self.nodes.remove(&id).is_some())
    }

    async fn get(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        Ok(self.nodes.get(&id).map(|n| n.clone()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Node>, StoreError> {
        Ok(self
            .nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| n.clone()))
    }

    async fn list(&self, filter: &NodeFilter, page: Page) -> Result<Paged<Node>, StoreError> {
        let items: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| filter.status.map_or(true, |s| n.status == s))
            .filter(|n| keyword_matches(&filter.keyword, &[&n.name, &n.address]))
            .map(|n| n.clone())
            .collect();
        Ok(paginate(items, page, |n| n.id))
    }

    async fn all(&self) -> Result<Vec<Node>, StoreError> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|n| n.clone()).collect();
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    async fn count(&self, status: Option<NodeStatus>) -> Result<u64, StoreError> {
        Ok(self
            .nodes
            .iter()
            .filter(|n| status.map_or(true, |s| n.status == s))
            .count() as u64)
    }

    async fn record_probe(
        &self,
        id: NodeId,
        status: NodeStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.wrote();
        if let Some(mut node) = self.nodes.get_mut(&id) {
            node.status = status;
            node.last_check_at = Some(checked_at);
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn insert(&self, new: &NewRule) -> Result<Rule, StoreError> {
        self.wrote();
        let _guard = self.lock_unique();
        if self.port_taken(new.entry_node_id, new.listen_port, None) {
            return Err(StoreError::Duplicate(format!(
                "rules.entry_node_id, rules.listen_port = {}, {}",
                new.entry_node_id, new.listen_port
            )));
        }

        let now = Utc::now();
        let rule = Rule {
            id: Self::next_id(&self.next_rule),
            name: new.name.clone(),
            entry: new.entry,
            entry_node_id: new.entry_node_id,
            protocol: new.protocol,
            listen_port: new.listen_port,
            targets: new.targets.clone(),
            strategy: new.strategy,
            enable_tls: new.enable_tls,
            status: RunStatus::Stopped,
            service_id: None,
            observer_id: None,
            traffic: Traffic::default(),
            remark: new.remark.clone(),
            created_at: now,
            updated_at: now,
        };
        self.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn update(&self, id: RuleId, changes: &RuleChanges) -> Result<Option<Rule>, StoreError> {
        self.wrote();
        let _guard = self.lock_unique();
        let entry_node = match self.rules.get(&id) {
            Some(rule) => rule.entry_node_id,
            None => return Ok(None),
        };
        if self.port_taken(entry_node, changes.listen_port, Some(id)) {
            return Err(StoreError::Duplicate(format!(
                "rules.entry_node_id, rules.listen_port = {}, {}",
                entry_node, changes.listen_port
            )));
        }

        Ok(self.rules.get_mut(&id).map(|mut rule| {
            rule.name = changes.name.clone();
            rule.protocol = changes.protocol;
            rule.listen_port = changes.listen_port;
            rule.targets = changes.targets.clone();
            rule.strategy = changes.strategy;
            rule.enable_tls = changes.enable_tls;
            rule.remark = changes.remark.clone();
            rule.updated_at = Utc::now();
            rule.clone()
        }))
    }

    async fn delete(&self, id: RuleId) -> Result<bool, StoreError> {
        self.wrote();
        Ok(self.rules.remove(&id).is_some())
    }

    async fn get(&self, id: RuleId) -> Result<Option<Rule>, StoreError> {
        Ok(self.rules.get(&id).map(|r| r.clone()))
    }

    async fn list(&self, filter: &RuleFilter, page: Page) -> Result<Paged<Rule>, StoreError> {
        let items: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.kind.map_or(true, |k| r.entry.kind() == k))
            .filter(|r| filter.node_id.map_or(true, |n| r.entry_node_id == n))
            .filter(|r| {
                filter
                    .tunnel_id
                    .map_or(true, |t| r.entry.tunnel_id() == Some(t))
            })
            .filter(|r| keyword_matches(&filter.keyword, &[&r.name]))
            .map(|r| r.clone())
            .collect();
        Ok(paginate(items, page, |r| r.id))
    }

    async fn by_entry_node(&self, node_id: NodeId) -> Result<Vec<Rule>, StoreError> {
        let mut rules: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| r.entry_node_id == node_id)
            .map(|r| r.clone())
            .collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn port_in_use(
        &self,
        node_id: NodeId,
        port: u16,
        exclude: Option<RuleId>,
    ) -> Result<bool, StoreError> {
        Ok(self.port_taken(node_id, port, exclude))
    }

    async fn count(
        &self,
        status: Option<RunStatus>,
        kind: Option<RuleKind>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .filter(|r| kind.map_or(true, |k| r.entry.kind() == k))
            .count() as u64)
    }

    async fn count_by_entry_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.entry_node_id == node_id)
            .count() as u64)
    }

    async fn count_by_tunnel(&self, tunnel_id: TunnelId) -> Result<u64, StoreError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.entry.tunnel_id() == Some(tunnel_id))
            .count() as u64)
    }

    async fn set_status(&self, id: RuleId, status: RunStatus) -> Result<(), StoreError> {
        self.update_rule(id, |rule| {
            rule.status = status;
            rule.updated_at = Utc::now();
        });
        Ok(())
    }

    async fn set_status_if(
        &self,
        id: RuleId,
        expected: RunStatus,
        status: RunStatus,
    ) -> Result<bool, StoreError> {
        self.wrote();
        Ok(match self.rules.get_mut(&id) {
            Some(mut rule) if rule.status == expected => {
                rule.status = status;
                rule.updated_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn stop_running_on_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        self.wrote();
        let mut stopped = 0;
        for mut rule in self.rules.iter_mut() {
            if rule.entry_node_id == node_id && rule.status == RunStatus::Running {
                rule.status = RunStatus::Stopped;
                rule.updated_at = Utc::now();
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    async fn record_started(
        &self,
        id: RuleId,
        service_id: &str,
        observer_id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.update_rule(id, |rule| {
            rule.status = RunStatus::Running;
            rule.service_id = Some(service_id.to_string());
            rule.observer_id = observer_id.map(str::to_string);
            rule.updated_at = Utc::now();
        });
        Ok(())
    }

    async fn update_traffic(&self, id: RuleId, sample: TrafficSample) -> Result<bool, StoreError> {
        Ok(self.update_rule(id, |rule| {
            rule.traffic = Traffic {
                input_bytes: sample.input_bytes,
                output_bytes: sample.output_bytes,
                total_bytes: sample.input_bytes.saturating_add(sample.output_bytes),
                total_requests: sample.requests,
            };
        }))
    }
}

#[async_trait]
impl TunnelStore for MemoryStore {
    async fn insert(&self, new: &NewTunnel) -> Result<Tunnel, StoreError> {
        self.wrote();
        let now = Utc::now();
        let tunnel = Tunnel {
            id: Self::next_id(&self.next_tunnel),
            name: new.name.clone(),
            entry_node_id: new.entry_node_id,
            exit_node_id: new.exit_node_id,
            protocol: new.protocol,
            relay_port: new.relay_port,
            status: RunStatus::Stopped,
            service_id: None,
            chain_id: None,
            relay_addr: None,
            remark: new.remark.clone(),
            created_at: now,
            updated_at: now,
        };
        self.tunnels.insert(tunnel.id, tunnel.clone());
        Ok(tunnel)
    }

    async fn update(
        &self,
        id: TunnelId,
        changes: &TunnelChanges,
    ) -> Result<Option<Tunnel>, StoreError> {
        self.wrote();
        Ok(self.tunnels.get_mut(&id).map(|mut tunnel| {
            tunnel.name = changes.name.clone();
            tunnel.protocol = changes.protocol;
            tunnel.relay_port = changes.relay_port;
            tunnel.remark = changes.remark.clone();
            tunnel.updated_at = Utc::now();
            tunnel.clone()
        }))
    }

    async fn delete(&self, id: TunnelId) -> Result<bool, StoreError> {
        self.wrote();
        let _guard = self.lock_unique();
        if self.rules.iter().any(|r| r.entry.tunnel_id() == Some(id)) {
            return Err(StoreError::Referenced(format!("tunnels.id = {}", id)));
        }
        Ok(self.tunnels.remove(&id).is_some())
    }

    async fn get(&self, id: TunnelId) -> Result<Option<Tunnel>, StoreError> {
        Ok(self.tunnels.get(&id).map(|t| t.clone()))
    }

    async fn list(&self, filter: &TunnelFilter, page: Page) -> Result<Paged<Tunnel>, StoreError> {
        let items: Vec<Tunnel> = self
            .tunnels
            .iter()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.node_id.map_or(true, |n| t.references(n)))
            .filter(|t| keyword_matches(&filter.keyword, &[&t.name]))
            .map(|t| t.clone())
            .collect();
        Ok(paginate(items, page, |t| t.id))
    }

    async fn by_exit_node(&self, node_id: NodeId) -> Result<Vec<Tunnel>, StoreError> {
        let mut tunnels: Vec<Tunnel> = self
            .tunnels
            .iter()
            .filter(|t| t.exit_node_id == node_id)
            .map(|t| t.clone())
            .collect();
        tunnels.sort_by_key(|t| t.id);
        Ok(tunnels)
    }

    async fn count(&self, status: Option<RunStatus>) -> Result<u64, StoreError> {
        Ok(self
            .tunnels
            .iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .count() as u64)
    }

    async fn count_by_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        Ok(self
            .tunnels
            .iter()
            .filter(|t| t.references(node_id))
            .count() as u64)
    }

    async fn set_status(&self, id: TunnelId, status: RunStatus) -> Result<(), StoreError> {
        self.update_tunnel(id, |tunnel| {
            tunnel.status = status;
            tunnel.updated_at = Utc::now();
        });
        Ok(())
    }

    async fn set_status_if(
        &self,
        id: TunnelId,
        expected: RunStatus,
        status: RunStatus,
    ) -> Result<bool, StoreError> {
        self.wrote();
        Ok(match self.tunnels.get_mut(&id) {
            Some(mut tunnel) if tunnel.status == expected => {
                tunnel.status = status;
                tunnel.updated_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn stop_running_on_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        self.wrote();
        let mut stopped = 0;
        for mut tunnel in self.tunnels.iter_mut() {
            if tunnel.references(node_id) && tunnel.status == RunStatus::Running {
                tunnel.status = RunStatus::Stopped;
                tunnel.updated_at = Utc::now();
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    async fn set_relay_endpoint(&self, id: TunnelId, relay_addr: &str) -> Result<(), StoreError> {
        self.update_tunnel(id, |tunnel| {
            tunnel.relay_addr = Some(relay_addr.to_string());
            tunnel.updated_at = Utc::now();
        });
        Ok(())
    }

    async fn record_started(
        &self,
        id: TunnelId,
        service_id: &str,
        chain_id: &str,
    ) -> Result<(), StoreError> {
        self.update_tunnel(id, |tunnel| {
            tunnel.status = RunStatus::Running;
            tunnel.service_id = Some(service_id.to_string());
            tunnel.chain_id = Some(chain_id.to_string());
            tunnel.updated_at = Utc::now();
        });
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.settings.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.wrote();
        self.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
