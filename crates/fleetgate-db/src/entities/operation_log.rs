//! Audit trail of operator actions

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "operation_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub actor: String,

    /// create, update, delete, start, stop
    pub action: String,

    /// node, rule, tunnel
    pub resource_type: String,

    pub resource_id: Option<i32>,

    #[sea_orm(column_type = "Text")]
    pub description: String,

    pub origin_ip: Option<String>,

    pub user_agent: Option<String>,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
