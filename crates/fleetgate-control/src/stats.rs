//! Status aggregates for dashboards

use serde::Serialize;

use crate::error::ControlError;
use crate::model::{NodeStatus, RuleKind, RunStatus};
use crate::store::Stores;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub total: u64,
    pub online: u64,
    pub offline: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    pub total: u64,
    pub running: u64,
    pub stopped: u64,
    pub forward_type: u64,
    pub tunnel_type: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TunnelStats {
    pub total: u64,
    pub running: u64,
    pub stopped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub nodes: NodeStats,
    pub rules: RuleStats,
    pub tunnels: TunnelStats,
    pub version: String,
}

pub struct StatsService {
    stores: Stores,
}

impl StatsService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn nodes(&self) -> Result<NodeStats, ControlError> {
        let nodes = &self.stores.nodes;
        Ok(NodeStats {
            total: nodes.count(None).await?,
            online: nodes.count(Some(NodeStatus::Online)).await?,
            offline: nodes.count(Some(NodeStatus::Offline)).await?,
        })
    }

    pub async fn rules(&self) -> Result<RuleStats, ControlError> {
        let rules = &self.stores.rules;
        Ok(RuleStats {
            total: rules.count(None, None).await?,
            running: rules.count(Some(RunStatus::Running), None).await?,
            stopped: rules.count(Some(RunStatus::Stopped), None).await?,
            forward_type: rules.count(None, Some(RuleKind::Forward)).await?,
            tunnel_type: rules.count(None, Some(RuleKind::Tunnel)).await?,
        })
    }

    pub async fn tunnels(&self) -> Result<TunnelStats, ControlError> {
        let tunnels = &self.stores.tunnels;
        Ok(TunnelStats {
            total: tunnels.count(None).await?,
            running: tunnels.count(Some(RunStatus::Running)).await?,
            stopped: tunnels.count(Some(RunStatus::Stopped)).await?,
        })
    }

    pub async fn dashboard(&self) -> Result<DashboardStats, ControlError> {
        Ok(DashboardStats {
            nodes: self.nodes().await?,
            rules: self.rules().await?,
            tunnels: self.tunnels().await?,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
