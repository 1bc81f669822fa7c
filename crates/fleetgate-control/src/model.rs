//! Domain model
//!
//! Records here are transient copies of what the store holds. Components
//! read them, decide, and write back narrow updates through the store ports.

use chrono::{DateTime, Utc};
use fleetgate_gateway::{rule_service_name, NodeEndpoint};
use serde::{Deserialize, Serialize};

use crate::error::ControlError;

pub use fleetgate_db::entities::{NodeStatus, Protocol, RuleKind, RunStatus, Strategy};

pub type NodeId = i32;
pub type RuleId = i32;
pub type TunnelId = i32;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub address: String,
    /// Stored as given; anything outside 1..=65535 is never dialled
    pub port: i32,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub status: NodeStatus,
    pub total_bytes: i64,
    pub input_bytes: i64,
    pub output_bytes: i64,
    pub last_check_at: Option<DateTime<Utc>>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Config API endpoint, or `None` when the address or port cannot be dialled
    pub fn endpoint(&self) -> Option<NodeEndpoint> {
        let port = u16::try_from(self.port).ok()?;
        let endpoint = NodeEndpoint::new(self.address.trim(), port)
            .with_credentials(self.username.clone(), self.password.clone());
        endpoint.is_dialable().then_some(endpoint)
    }

    pub fn is_online(&self) -> bool {
        self.status == NodeStatus::Online
    }
}

/// Where a rule's listen port lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleEntry {
    /// Directly on a node
    Forward { node_id: NodeId },
    /// On a tunnel's entry node, routed through the tunnel's chain
    Tunnel { tunnel_id: TunnelId },
}

impl RuleEntry {
    pub fn kind(&self) -> RuleKind {
        match self {
            RuleEntry::Forward { .. } => RuleKind::Forward,
            RuleEntry::Tunnel { .. } => RuleKind::Tunnel,
        }
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            RuleEntry::Forward { node_id } => Some(*node_id),
            RuleEntry::Tunnel { .. } => None,
        }
    }

    pub fn tunnel_id(&self) -> Option<TunnelId> {
        match self {
            RuleEntry::Forward { .. } => None,
            RuleEntry::Tunnel { tunnel_id } => Some(*tunnel_id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traffic {
    pub input_bytes: i64,
    pub output_bytes: i64,
    pub total_bytes: i64,
    pub total_requests: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub entry: RuleEntry,
    /// Node that owns the listen port, resolved when the rule is created
    pub entry_node_id: NodeId,
    pub protocol: Protocol,
    pub listen_port: u16,
    pub targets: Vec<String>,
    pub strategy: Strategy,
    pub enable_tls: bool,
    pub status: RunStatus,
    pub service_id: Option<String>,
    pub observer_id: Option<String>,
    pub traffic: Traffic,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Remote service name, the stored one or the deterministic default
    pub fn service_name(&self) -> String {
        self.service_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| rule_service_name(self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tunnel {
    pub id: TunnelId,
    pub name: String,
    pub entry_node_id: NodeId,
    pub exit_node_id: NodeId,
    pub protocol: Protocol,
    pub relay_port: u16,
    pub status: RunStatus,
    pub service_id: Option<String>,
    pub chain_id: Option<String>,
    /// `host:port` the entry chain dials
    pub relay_addr: Option<String>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tunnel {
    pub fn references(&self, node_id: NodeId) -> bool {
        self.entry_node_id == node_id || self.exit_node_id == node_id
    }
}

/// Validated node fields
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRule {
    pub name: String,
    pub entry: RuleEntry,
    pub entry_node_id: NodeId,
    pub protocol: Protocol,
    pub listen_port: u16,
    pub targets: Vec<String>,
    pub strategy: Strategy,
    pub enable_tls: bool,
    pub remark: Option<String>,
}

/// Editable rule fields; type and entry are fixed at creation
#[derive(Debug, Clone, PartialEq)]
pub struct RuleChanges {
    pub name: String,
    pub protocol: Protocol,
    pub listen_port: u16,
    pub targets: Vec<String>,
    pub strategy: Strategy,
    pub enable_tls: bool,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTunnel {
    pub name: String,
    pub entry_node_id: NodeId,
    pub exit_node_id: NodeId,
    pub protocol: Protocol,
    pub relay_port: u16,
    pub remark: Option<String>,
}

/// Editable tunnel fields; its nodes are fixed at creation
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelChanges {
    pub name: String,
    pub protocol: Protocol,
    pub relay_port: u16,
    pub remark: Option<String>,
}

/// Operator input for creating or replacing a node
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeDraft {
    pub name: String,
    pub address: String,
    pub port: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

/// Operator input for creating a rule
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    #[serde(rename = "type", default = "default_rule_kind")]
    pub kind: RuleKind,
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub tunnel_id: Option<TunnelId>,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    pub listen_port: i64,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub enable_tls: bool,
    #[serde(default)]
    pub remark: Option<String>,
}

/// Operator input for modifying a rule; absent fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub protocol: Option<Protocol>,
    pub listen_port: Option<i64>,
    pub targets: Option<Vec<String>>,
    pub strategy: Option<Strategy>,
    pub enable_tls: Option<bool>,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TunnelDraft {
    pub name: String,
    pub entry_node_id: NodeId,
    pub exit_node_id: NodeId,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    pub relay_port: i64,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TunnelUpdate {
    pub name: Option<String>,
    pub protocol: Option<Protocol>,
    pub relay_port: Option<i64>,
    pub remark: Option<String>,
}

fn default_rule_kind() -> RuleKind {
    RuleKind::Forward
}

fn default_protocol() -> Protocol {
    Protocol::Tcp
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub status: Option<NodeStatus>,
    /// Matches name or address
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFilter {
    pub status: Option<RunStatus>,
    pub kind: Option<RuleKind>,
    /// Matches the entry node
    pub node_id: Option<NodeId>,
    pub tunnel_id: Option<TunnelId>,
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelFilter {
    pub status: Option<RunStatus>,
    /// Matches entry or exit node
    pub node_id: Option<NodeId>,
    pub keyword: Option<String>,
}

/// One-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub page_size: u64,
}

impl Page {
    /// Clamp to page >= 1 and page size within 1..=100
    pub fn new(page: Option<u64>, page_size: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.page_size
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

/// Absolute traffic counters reported by an observer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSample {
    pub input_bytes: i64,
    pub output_bytes: i64,
    pub requests: i64,
}

pub(crate) fn keyword_matches(keyword: &Option<String>, fields: &[&str]) -> bool {
    match keyword.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(keyword) => {
            let keyword = keyword.to_lowercase();
            fields
                .iter()
                .any(|field| field.to_lowercase().contains(&keyword))
        }
    }
}

pub(crate) fn require_name(name: &str, field: &str) -> Result<String, ControlError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ControlError::validation(format!("{} must not be empty", field)));
    }
    Ok(name.to_string())
}

pub(crate) fn require_port(value: i64, field: &str) -> Result<u16, ControlError> {
    u16::try_from(value)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| {
            ControlError::validation(format!("{} must be within 1-65535, got {}", field, value))
        })
}

/// Trimmed `host:port` targets, at least one
pub(crate) fn require_targets(targets: &[String]) -> Result<Vec<String>, ControlError> {
    let targets: Vec<String> = targets
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if targets.is_empty() {
        return Err(ControlError::validation("at least one target is required"));
    }
    if let Some(bad) = targets.iter().find(|t| !is_host_port(t)) {
        return Err(ControlError::validation(format!(
            "target '{}' is not a host:port address",
            bad
        )));
    }
    Ok(targets)
}

fn is_host_port(target: &str) -> bool {
    let Some((host, port)) = target.rsplit_once(':') else {
        return false;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    !host.is_empty() && port.parse::<u16>().is_ok_and(|port| port != 0)
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
