//! Tunnel entity: relay service on the exit node plus chain on the entry node

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provisioning status shared by rules and tunnels
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[sea_orm(string_value = "running")]
    Running,

    #[sea_orm(string_value = "stopped")]
    Stopped,

    #[sea_orm(string_value = "error")]
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Stopped => "stopped",
            RunStatus::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tunnels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub name: String,

    pub entry_node_id: i32,

    pub exit_node_id: i32,

    pub protocol: super::rule::Protocol,

    /// Port of the relay service on the exit node
    pub relay_port: i32,

    pub status: RunStatus,

    /// Relay service name on the exit node
    pub service_id: Option<String>,

    /// Chain name on the entry node
    pub chain_id: Option<String>,

    /// Exit node address the chain was pointed at
    pub relay_addr: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub remark: Option<String>,

    pub created_at: ChronoDateTimeUtc,

    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
