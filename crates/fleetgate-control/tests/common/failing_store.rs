//! Rule and tunnel store that fails chosen writes

use async_trait::async_trait;
use fleetgate_control::model::{
    NewRule, NewTunnel, NodeId, Page, Paged, Rule, RuleChanges, RuleFilter, RuleId, RuleKind,
    RunStatus, TrafficSample, Tunnel, TunnelChanges, TunnelFilter, TunnelId,
};
use fleetgate_control::{MemoryStore, RuleStore, StoreError, TunnelStore};
use sea_orm::DbErr;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Delegates to a [`MemoryStore`]; calls named with [`fail`](Self::fail)
/// answer with a database error instead, e.g. `tunnels.record_started`
pub struct FailingStore {
    inner: Arc<MemoryStore>,
    failing: Mutex<HashSet<String>>,
    hide_references: AtomicBool,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            hide_references: AtomicBool::new(false),
        }
    }

    /// Report zero referencing rules and tunnels, as if they were written
    /// after the caller counted
    pub fn hide_references(&self) {
        self.hide_references.store(true, Ordering::SeqCst);
    }

    fn hidden(&self) -> bool {
        self.hide_references.load(Ordering::SeqCst)
    }

    pub fn fail(&self, call: &str) {
        self.failing.lock().unwrap().insert(call.to_string());
    }

    fn check(&self, call: &str) -> Result<(), StoreError> {
        if self.failing.lock().unwrap().contains(call) {
            return Err(StoreError::Db(DbErr::Custom(format!(
                "scripted failure in {}",
                call
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for FailingStore {
    async fn insert(&self, rule: &NewRule) -> Result<Rule, StoreError> {
        RuleStore::insert(self.inner.as_ref(), rule).await
    }

    async fn update(&self, id: RuleId, changes: &RuleChanges) -> Result<Option<Rule>, StoreError> {
        RuleStore::update(self.inner.as_ref(), id, changes).await
    }

    async fn delete(&self, id: RuleId) -> Result<bool, StoreError> {
        RuleStore::delete(self.inner.as_ref(), id).await
    }

    async fn get(&self, id: RuleId) -> Result<Option<Rule>, StoreError> {
        RuleStore::get(self.inner.as_ref(), id).await
    }

    async fn list(&self, filter: &RuleFilter, page: Page) -> Result<Paged<Rule>, StoreError> {
        RuleStore::list(self.inner.as_ref(), filter, page).await
    }

    async fn by_entry_node(&self, node_id: NodeId) -> Result<Vec<Rule>, StoreError> {
        self.inner.by_entry_node(node_id).await
    }

    async fn port_in_use(
        &self,
        node_id: NodeId,
        port: u16,
        exclude: Option<RuleId>,
    ) -> Result<bool, StoreError> {
        self.inner.port_in_use(node_id, port, exclude).await
    }

    async fn count(
        &self,
        status: Option<RunStatus>,
        kind: Option<RuleKind>,
    ) -> Result<u64, StoreError> {
        RuleStore::count(self.inner.as_ref(), status, kind).await
    }

    async fn count_by_entry_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        if self.hidden() {
            return Ok(0);
        }
        self.inner.count_by_entry_node(node_id).await
    }

    async fn count_by_tunnel(&self, tunnel_id: TunnelId) -> Result<u64, StoreError> {
        if self.hidden() {
            return Ok(0);
        }
        self.inner.count_by_tunnel(tunnel_id).await
    }

    async fn set_status(&self, id: RuleId, status: RunStatus) -> Result<(), StoreError> {
        RuleStore::set_status(self.inner.as_ref(), id, status).await
    }

    async fn set_status_if(
        &self,
        id: RuleId,
        expected: RunStatus,
        status: RunStatus,
    ) -> Result<bool, StoreError> {
        RuleStore::set_status_if(self.inner.as_ref(), id, expected, status).await
    }

    async fn stop_running_on_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        RuleStore::stop_running_on_node(self.inner.as_ref(), node_id).await
    }

    async fn record_started(
        &self,
        id: RuleId,
        service_id: &str,
        observer_id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.check("rules.record_started")?;
        RuleStore::record_started(self.inner.as_ref(), id, service_id, observer_id).await
    }

    async fn update_traffic(&self, id: RuleId, sample: TrafficSample) -> Result<bool, StoreError> {
        self.inner.update_traffic(id, sample).await
    }
}

#[async_trait]
impl TunnelStore for FailingStore {
    async fn insert(&self, tunnel: &NewTunnel) -> Result<Tunnel, StoreError> {
        TunnelStore::insert(self.inner.as_ref(), tunnel).await
    }

    async fn update(
        &self,
        id: TunnelId,
        changes: &TunnelChanges,
    ) -> Result<Option<Tunnel>, StoreError> {
        TunnelStore::update(self.inner.as_ref(), id, changes).await
    }

    async fn delete(&self, id: TunnelId) -> Result<bool, StoreError> {
        TunnelStore::delete(self.inner.as_ref(), id).await
    }

    async fn get(&self, id: TunnelId) -> Result<Option<Tunnel>, StoreError> {
        TunnelStore::get(self.inner.as_ref(), id).await
    }

    async fn list(&self, filter: &TunnelFilter, page: Page) -> Result<Paged<Tunnel>, StoreError> {
        TunnelStore::list(self.inner.as_ref(), filter, page).await
    }

    async fn by_exit_node(&self, node_id: NodeId) -> Result<Vec<Tunnel>, StoreError> {
        self.inner.by_exit_node(node_id).await
    }

    async fn count(&self, status: Option<RunStatus>) -> Result<u64, StoreError> {
        TunnelStore::count(self.inner.as_ref(), status).await
    }

    async fn count_by_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        if self.hidden() {
            return Ok(0);
        }
        self.inner.count_by_node(node_id).await
    }

    async fn set_status(&self, id: TunnelId, status: RunStatus) -> Result<(), StoreError> {
        TunnelStore::set_status(self.inner.as_ref(), id, status).await
    }

    async fn set_status_if(
        &self,
        id: TunnelId,
        expected: RunStatus,
        status: RunStatus,
    ) -> Result<bool, StoreError> {
        TunnelStore::set_status_if(self.inner.as_ref(), id, expected, status).await
    }

    async fn stop_running_on_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        TunnelStore::stop_running_on_node(self.inner.as_ref(), node_id).await
    }

    async fn set_relay_endpoint(&self, id: TunnelId, relay_addr: &str) -> Result<(), StoreError> {
        self.check("tunnels.set_relay_endpoint")?;
        self.inner.set_relay_endpoint(id, relay_addr).await
    }

    async fn record_started(
        &self,
        id: TunnelId,
        service_id: &str,
        chain_id: &str,
    ) -> Result<(), StoreError> {
        self.check("tunnels.record_started")?;
        TunnelStore::record_started(self.inner.as_ref(), id, service_id, chain_id).await
    }
}
