//! Node entity: one proxy host exposing a config API

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Last known reachability of a node
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[sea_orm(string_value = "online")]
    Online,

    #[sea_orm(string_value = "offline")]
    Offline,

    #[sea_orm(string_value = "error")]
    Error,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Error => "error",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "nodes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Operator-facing name, unique across the fleet
    #[sea_orm(unique)]
    pub name: String,

    /// IP address or hostname of the config API
    pub address: String,

    pub port: i32,

    pub username: Option<String>,

    pub password: Option<String>,

    pub status: NodeStatus,

    pub total_bytes: i64,

    pub input_bytes: i64,

    pub output_bytes: i64,

    /// Set by every probe, whether or not the status changed
    pub last_check_at: Option<ChronoDateTimeUtc>,

    #[sea_orm(column_type = "Text", nullable)]
    pub remark: Option<String>,

    pub created_at: ChronoDateTimeUtc,

    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
