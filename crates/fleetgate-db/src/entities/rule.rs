//! Rule entity: a forwarding service exposed on one listen port

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::tunnel::RunStatus;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[sea_orm(string_value = "tcp")]
    Tcp,

    #[sea_orm(string_value = "udp")]
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rule reaches its entry node
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Direct forward on the rule's own node
    #[sea_orm(string_value = "forward")]
    Forward,

    /// Forward on a tunnel's entry node, routed through its chain
    #[sea_orm(string_value = "tunnel")]
    Tunnel,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Forward => "forward",
            RuleKind::Tunnel => "tunnel",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load-balancing strategy across targets, named as the node expects them
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Round-robin
    #[default]
    #[sea_orm(string_value = "round")]
    #[serde(alias = "round-robin")]
    Round,

    #[sea_orm(string_value = "rand")]
    #[serde(alias = "random")]
    Rand,

    /// First available
    #[sea_orm(string_value = "fifo")]
    Fifo,

    #[sea_orm(string_value = "hash")]
    Hash,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Round => "round",
            Strategy::Rand => "rand",
            Strategy::Fifo => "fifo",
            Strategy::Hash => "hash",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub name: String,

    pub rule_type: RuleKind,

    /// Owning node, set for forward rules only
    pub node_id: Option<i32>,

    /// Owning tunnel, set for tunnel rules only
    pub tunnel_id: Option<i32>,

    /// Node the listen port is opened on: the owning node, or the tunnel's
    /// entry node. Unique together with `listen_port`.
    pub entry_node_id: i32,

    pub protocol: Protocol,

    pub listen_port: i32,

    /// JSON array of `host:port` targets, in order
    #[sea_orm(column_type = "Text")]
    pub targets: String,

    pub strategy: Strategy,

    pub enable_tls: bool,

    pub status: RunStatus,

    /// Service name on the entry node
    pub service_id: Option<String>,

    /// Observer name on the entry node
    pub observer_id: Option<String>,

    pub input_bytes: i64,

    pub output_bytes: i64,

    pub total_bytes: i64,

    pub total_requests: i64,

    #[sea_orm(column_type = "Text", nullable)]
    pub remark: Option<String>,

    pub created_at: ChronoDateTimeUtc,

    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
