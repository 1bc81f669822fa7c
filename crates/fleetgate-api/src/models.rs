//! API request and response models

use chrono::{DateTime, Utc};
use fleetgate_control::model::{
    Node, NodeDraft, Paged, Protocol, Rule, RuleDraft, RuleKind, RuleUpdate, Strategy, Tunnel,
    TunnelDraft, TunnelUpdate,
};
use fleetgate_control::{
    CleanupAction, CleanupAttempt, DashboardStats, IngestSummary, NodeStats, RuleStats,
    TunnelStats,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Machine-readable error code, e.g. `PORT_IN_USE`
    pub code: String,
    /// Remote cleanup performed while handling a failed start or stop
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup: Vec<CleanupReport>,
}

/// One best-effort cleanup call against a node
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CleanupReport {
    pub node_id: i32,
    /// `delete_service`, `delete_chain` or `delete_observer`
    pub action: String,
    /// Remote resource name
    pub resource: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&CleanupAttempt> for CleanupReport {
    fn from(attempt: &CleanupAttempt) -> Self {
        let action = match attempt.action {
            CleanupAction::DeleteService(_) => "delete_service",
            CleanupAction::DeleteChain(_) => "delete_chain",
            CleanupAction::DeleteObserver(_) => "delete_observer",
        };
        Self {
            node_id: attempt.node_id,
            action: action.to_string(),
            resource: attempt.action.name().to_string(),
            succeeded: attempt.succeeded(),
            error: attempt.outcome.as_ref().err().map(|e| e.to_string()),
        }
    }
}

/// Pagination and filter parameters shared by the list endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Page number, starting at 1 (default: 1)
    pub page: Option<u64>,
    /// Page size, 1 to 100 (default: 10)
    pub page_size: Option<u64>,
    /// Filter by status
    pub status: Option<String>,
    /// Match against name (and address for nodes)
    pub keyword: Option<String>,
    /// Filter rules by type (`forward` or `tunnel`)
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Filter by node (rules: entry node, tunnels: entry or exit node)
    pub node_id: Option<i32>,
    /// Filter rules by tunnel
    pub tunnel_id: Option<i32>,
}

// ============================================================================
// Nodes
// ============================================================================

/// A proxy node
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeResponse {
    pub id: i32,
    pub name: String,
    pub address: String,
    pub port: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// `online`, `offline` or `error`
    pub status: String,
    pub total_bytes: i64,
    pub input_bytes: i64,
    pub output_bytes: i64,
    /// Time of the last health probe
    pub last_check_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Node> for NodeResponse {
    fn from(node: Node) -> Self {
        Self {
            id: node.id,
            name: node.name,
            address: node.address,
            port: node.port,
            username: node.username,
            status: node.status.to_string(),
            total_bytes: node.total_bytes,
            input_bytes: node.input_bytes,
            output_bytes: node.output_bytes,
            last_check_at: node.last_check_at,
            remark: node.remark,
            created_at: node.created_at,
            updated_at: node.updated_at,
        }
    }
}

/// Request to register or replace a node
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeRequest {
    pub name: String,
    /// Host or IP of the node's config API
    pub address: String,
    /// Port of the node's config API
    pub port: i64,
    #[serde(default)]
    pub username: Option<String>,
    /// Never returned by the API
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl From<NodeRequest> for NodeDraft {
    fn from(req: NodeRequest) -> Self {
        NodeDraft {
            name: req.name,
            address: req.address,
            port: req.port,
            username: req.username,
            password: req.password,
            remark: req.remark,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeList {
    pub items: Vec<NodeResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl From<Paged<Node>> for NodeList {
    fn from(paged: Paged<Node>) -> Self {
        Self {
            items: paged.items.into_iter().map(Into::into).collect(),
            total: paged.total,
            page: paged.page,
            page_size: paged.page_size,
        }
    }
}

// ============================================================================
// Rules
// ============================================================================

/// A forwarding rule
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RuleResponse {
    pub id: i32,
    pub name: String,
    /// `forward` or `tunnel`
    #[serde(rename = "type")]
    pub kind: String,
    /// Set for forward rules
    pub node_id: Option<i32>,
    /// Set for tunnel rules
    pub tunnel_id: Option<i32>,
    /// Node that owns the listen port
    pub entry_node_id: i32,
    pub protocol: String,
    pub listen_port: u16,
    pub targets: Vec<String>,
    pub strategy: String,
    pub enable_tls: bool,
    /// `running`, `stopped` or `error`
    pub status: String,
    pub service_id: Option<String>,
    pub observer_id: Option<String>,
    pub input_bytes: i64,
    pub output_bytes: i64,
    pub total_bytes: i64,
    pub total_requests: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Rule> for RuleResponse {
    fn from(rule: Rule) -> Self {
        Self {
            id: rule.id,
            name: rule.name,
            kind: rule.entry.kind().to_string(),
            node_id: rule.entry.node_id(),
            tunnel_id: rule.entry.tunnel_id(),
            entry_node_id: rule.entry_node_id,
            protocol: rule.protocol.to_string(),
            listen_port: rule.listen_port,
            targets: rule.targets,
            strategy: rule.strategy.to_string(),
            enable_tls: rule.enable_tls,
            status: rule.status.to_string(),
            service_id: rule.service_id,
            observer_id: rule.observer_id,
            input_bytes: rule.traffic.input_bytes,
            output_bytes: rule.traffic.output_bytes,
            total_bytes: rule.traffic.total_bytes,
            total_requests: rule.traffic.total_requests,
            remark: rule.remark,
            created_at: rule.created_at,
            updated_at: rule.updated_at,
        }
    }
}

/// Request to create a rule
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateRuleRequest {
    pub name: String,
    /// `forward` (default) or `tunnel`
    #[serde(rename = "type", default)]
    #[schema(value_type = Option<String>)]
    pub kind: Option<RuleKind>,
    /// Required for forward rules
    #[serde(default)]
    pub node_id: Option<i32>,
    /// Required for tunnel rules
    #[serde(default)]
    pub tunnel_id: Option<i32>,
    /// `tcp` (default) or `udp`
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub protocol: Option<Protocol>,
    pub listen_port: i64,
    /// Upstream `host:port` addresses
    #[serde(default)]
    pub targets: Vec<String>,
    /// `round` (default), `rand`, `fifo` or `hash`
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub enable_tls: bool,
    #[serde(default)]
    pub remark: Option<String>,
}

impl From<CreateRuleRequest> for RuleDraft {
    fn from(req: CreateRuleRequest) -> Self {
        RuleDraft {
            name: req.name,
            kind: req.kind.unwrap_or(RuleKind::Forward),
            node_id: req.node_id,
            tunnel_id: req.tunnel_id,
            protocol: req.protocol.unwrap_or(Protocol::Tcp),
            listen_port: req.listen_port,
            targets: req.targets,
            strategy: req.strategy,
            enable_tls: req.enable_tls,
            remark: req.remark,
        }
    }
}

/// Request to modify a stopped rule; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    #[schema(value_type = Option<String>)]
    pub protocol: Option<Protocol>,
    pub listen_port: Option<i64>,
    pub targets: Option<Vec<String>>,
    #[schema(value_type = Option<String>)]
    pub strategy: Option<Strategy>,
    pub enable_tls: Option<bool>,
    pub remark: Option<String>,
}

impl From<UpdateRuleRequest> for RuleUpdate {
    fn from(req: UpdateRuleRequest) -> Self {
        RuleUpdate {
            name: req.name,
            protocol: req.protocol,
            listen_port: req.listen_port,
            targets: req.targets,
            strategy: req.strategy,
            enable_tls: req.enable_tls,
            remark: req.remark,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RuleList {
    pub items: Vec<RuleResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl From<Paged<Rule>> for RuleList {
    fn from(paged: Paged<Rule>) -> Self {
        Self {
            items: paged.items.into_iter().map(Into::into).collect(),
            total: paged.total,
            page: paged.page,
            page_size: paged.page_size,
        }
    }
}

// ============================================================================
// Tunnels
// ============================================================================

/// A relay tunnel between an entry and an exit node
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TunnelResponse {
    pub id: i32,
    pub name: String,
    pub entry_node_id: i32,
    pub exit_node_id: i32,
    pub protocol: String,
    pub relay_port: u16,
    /// `running`, `stopped` or `error`
    pub status: String,
    /// Relay service on the exit node
    pub service_id: Option<String>,
    /// Chain on the entry node
    pub chain_id: Option<String>,
    /// Address the entry chain dials
    pub relay_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Tunnel> for TunnelResponse {
    fn from(tunnel: Tunnel) -> Self {
        Self {
            id: tunnel.id,
            name: tunnel.name,
            entry_node_id: tunnel.entry_node_id,
            exit_node_id: tunnel.exit_node_id,
            protocol: tunnel.protocol.to_string(),
            relay_port: tunnel.relay_port,
            status: tunnel.status.to_string(),
            service_id: tunnel.service_id,
            chain_id: tunnel.chain_id,
            relay_addr: tunnel.relay_addr,
            remark: tunnel.remark,
            created_at: tunnel.created_at,
            updated_at: tunnel.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateTunnelRequest {
    pub name: String,
    pub entry_node_id: i32,
    pub exit_node_id: i32,
    /// `tcp` (default) or `udp`
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub protocol: Option<Protocol>,
    /// Port of the relay service on the exit node
    pub relay_port: i64,
    #[serde(default)]
    pub remark: Option<String>,
}

impl From<CreateTunnelRequest> for TunnelDraft {
    fn from(req: CreateTunnelRequest) -> Self {
        TunnelDraft {
            name: req.name,
            entry_node_id: req.entry_node_id,
            exit_node_id: req.exit_node_id,
            protocol: req.protocol.unwrap_or(Protocol::Tcp),
            relay_port: req.relay_port,
            remark: req.remark,
        }
    }
}

/// Request to modify a stopped tunnel; its nodes cannot change
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateTunnelRequest {
    pub name: Option<String>,
    #[schema(value_type = Option<String>)]
    pub protocol: Option<Protocol>,
    pub relay_port: Option<i64>,
    pub remark: Option<String>,
}

impl From<UpdateTunnelRequest> for TunnelUpdate {
    fn from(req: UpdateTunnelRequest) -> Self {
        TunnelUpdate {
            name: req.name,
            protocol: req.protocol,
            relay_port: req.relay_port,
            remark: req.remark,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TunnelList {
    pub items: Vec<TunnelResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl From<Paged<Tunnel>> for TunnelList {
    fn from(paged: Paged<Tunnel>) -> Self {
        Self {
            items: paged.items.into_iter().map(Into::into).collect(),
            total: paged.total,
            page: paged.page,
            page_size: paged.page_size,
        }
    }
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeStatsResponse {
    pub total: u64,
    pub online: u64,
    pub offline: u64,
}

impl From<NodeStats> for NodeStatsResponse {
    fn from(stats: NodeStats) -> Self {
        Self {
            total: stats.total,
            online: stats.online,
            offline: stats.offline,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RuleStatsResponse {
    pub total: u64,
    pub running: u64,
    pub stopped: u64,
    pub forward_type: u64,
    pub tunnel_type: u64,
}

impl From<RuleStats> for RuleStatsResponse {
    fn from(stats: RuleStats) -> Self {
        Self {
            total: stats.total,
            running: stats.running,
            stopped: stats.stopped,
            forward_type: stats.forward_type,
            tunnel_type: stats.tunnel_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TunnelStatsResponse {
    pub total: u64,
    pub running: u64,
    pub stopped: u64,
}

impl From<TunnelStats> for TunnelStatsResponse {
    fn from(stats: TunnelStats) -> Self {
        Self {
            total: stats.total,
            running: stats.running,
            stopped: stats.stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DashboardResponse {
    pub nodes: NodeStatsResponse,
    pub rules: RuleStatsResponse,
    pub tunnels: TunnelStatsResponse,
    pub version: String,
}

impl From<DashboardStats> for DashboardResponse {
    fn from(stats: DashboardStats) -> Self {
        Self {
            nodes: stats.nodes.into(),
            rules: stats.rules.into(),
            tunnels: stats.tunnels.into(),
            version: stats.version,
        }
    }
}

// ============================================================================
// Observer reports and system settings
// ============================================================================

/// Acknowledgement returned to reporting nodes
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ObserverAck {
    pub ok: bool,
    /// Events applied to rule counters
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl From<IngestSummary> for ObserverAck {
    fn from(summary: IngestSummary) -> Self {
        Self {
            ok: true,
            applied: summary.applied,
            skipped: summary.skipped,
            failed: summary.failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SystemConfig {
    /// Base URL nodes use to reach this panel, e.g. `http://10.0.0.1:3080`
    pub panel_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateSystemConfigRequest {
    pub panel_url: String,
}
