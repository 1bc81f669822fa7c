//! sea-orm implementation of the persistence ports

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetgate_db::entities::{node, rule, system_setting, tunnel};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};

use crate::error::{ResourceKind, StoreError};
use crate::model::{
    NewNode, NewRule, NewTunnel, Node, NodeFilter, NodeId, NodeStatus, Page, Paged, Rule,
    RuleChanges, RuleEntry, RuleFilter, RuleId, RuleKind, RunStatus, Traffic, TrafficSample,
    Tunnel, TunnelChanges, TunnelFilter, TunnelId,
};
use crate::store::{NodeStore, RuleStore, SettingsStore, TunnelStore};

/// Store backed by a sea-orm connection (SQLite or PostgreSQL)
#[derive(Clone)]
pub struct SeaStore {
    db: DatabaseConnection,
}

impl SeaStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn keyword(keyword: &Option<String>) -> Option<&str> {
    keyword.as_deref().map(str::trim).filter(|k| !k.is_empty())
}

fn corrupt(kind: ResourceKind, id: i32, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        kind,
        id,
        reason: reason.into(),
    }
}

fn node_from_model(model: node::Model) -> Node {
    Node {
        id: model.id,
        name: model.name,
        address: model.address,
        port: model.port,
        username: model.username,
        password: model.password,
        status: model.status,
        total_bytes: model.total_bytes,
        input_bytes: model.input_bytes,
        output_bytes: model.output_bytes,
        last_check_at: model.last_check_at,
        remark: model.remark,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

fn rule_from_model(model: rule::Model) -> Result<Rule, StoreError> {
    let entry = match model.rule_type {
        RuleKind::Forward => RuleEntry::Forward {
            node_id: model
                .node_id
                .ok_or_else(|| corrupt(ResourceKind::Rule, model.id, "forward rule without node"))?,
        },
        RuleKind::Tunnel => RuleEntry::Tunnel {
            tunnel_id: model.tunnel_id.ok_or_else(|| {
                corrupt(ResourceKind::Rule, model.id, "tunnel rule without tunnel")
            })?,
        },
    };
    let listen_port = u16::try_from(model.listen_port).map_err(|_| {
        corrupt(
            ResourceKind::Rule,
            model.id,
            format!("listen port {} out of range", model.listen_port),
        )
    })?;
    let targets: Vec<String> = serde_json::from_str(&model.targets)
        .map_err(|e| corrupt(ResourceKind::Rule, model.id, format!("targets: {}", e)))?;

    Ok(Rule {
        id: model.id,
        name: model.name,
        entry,
        entry_node_id: model.entry_node_id,
        protocol: model.protocol,
        listen_port,
        targets,
        strategy: model.strategy,
        enable_tls: model.enable_tls,
        status: model.status,
        service_id: model.service_id,
        observer_id: model.observer_id,
        traffic: Traffic {
            input_bytes: model.input_bytes,
            output_bytes: model.output_bytes,
            total_bytes: model.total_bytes,
            total_requests: model.total_requests,
        },
        remark: model.remark,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn tunnel_from_model(model: tunnel::Model) -> Result<Tunnel, StoreError> {
    let relay_port = u16::try_from(model.relay_port).map_err(|_| {
        corrupt(
            ResourceKind::Tunnel,
            model.id,
            format!("relay port {} out of range", model.relay_port),
        )
    })?;

    Ok(Tunnel {
        id: model.id,
        name: model.name,
        entry_node_id: model.entry_node_id,
        exit_node_id: model.exit_node_id,
        protocol: model.protocol,
        relay_port,
        status: model.status,
        service_id: model.service_id,
        chain_id: model.chain_id,
        relay_addr: model.relay_addr,
        remark: model.remark,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn encode_targets(targets: &[String]) -> String {
    serde_json::Value::from(targets.to_vec()).to_string()
}

#[async_trait]
impl NodeStore for SeaStore {
    async fn insert(&self, new: &NewNode) -> Result<Node, StoreError> {
        let now = Utc::now();
        let model = node::ActiveModel {
            name: Set(new.name.clone()),
            address: Set(new.address.clone()),
            port: Set(i32::from(new.port)),
            username: Set(new.username.clone()),
            password: Set(new.password.clone()),
            status: Set(NodeStatus::Offline),
            total_bytes: Set(0),
            input_bytes: Set(0),
            output_bytes: Set(0),
            last_check_at: Set(None),
            remark: Set(new.remark.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        Ok(node_from_model(model))
    }

    async fn update(&self, id: NodeId, new: &NewNode) -> Result<Option<Node>, StoreError> {
        let result = node::Entity::update_many()
            .col_expr(node::Column::Name, Expr::value(new.name.clone()))
            .col_expr(node::Column::Address, Expr::value(new.address.clone()))
            .col_expr(node::Column::Port, Expr::value(i32::from(new.port)))
            .col_expr(node::Column::Username, Expr::value(new.username.clone()))
            .col_expr(node::Column::Password, Expr::value(new.password.clone()))
            .col_expr(node::Column::Remark, Expr::value(new.remark.clone()))
            .col_expr(node::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(node::Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        NodeStore::get(self, id).await
    }

    async fn delete(&self, id: NodeId) -> Result<bool, StoreError> {
        let result = node::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    async fn get(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        let model = node::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(node_from_model))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Node>, StoreError> {
        let model = node::Entity::find()
            .filter(node::Column::Name.eq(name))
            .one(&self.db)
            .await?;
        Ok(model.map(node_from_model))
    }

    async fn list(&self, filter: &NodeFilter, page: Page) -> Result<Paged<Node>, StoreError> {
        let mut query = node::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(node::Column::Status.eq(status));
        }
        if let Some(keyword) = keyword(&filter.keyword) {
            query = query.filter(
                Condition::any()
                    .add(node::Column::Name.contains(keyword))
                    .add(node::Column::Address.contains(keyword)),
            );
        }

        let paginator = query
            .order_by_desc(node::Column::Id)
            .paginate(&self.db, page.page_size);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.page - 1).await?;

        Ok(Paged {
            items: items.into_iter().map(node_from_model).collect(),
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn all(&self) -> Result<Vec<Node>, StoreError> {
        let models = node::Entity::find()
            .order_by_asc(node::Column::Id)
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(node_from_model).collect())
    }

    async fn count(&self, status: Option<NodeStatus>) -> Result<u64, StoreError> {
        let mut query = node::Entity::find();
        if let Some(status) = status {
            query = query.filter(node::Column::Status.eq(status));
        }
        Ok(query.count(&self.db).await?)
    }

    async fn record_probe(
        &self,
        id: NodeId,
        status: NodeStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        node::Entity::update_many()
            .col_expr(node::Column::Status, Expr::value(status))
            .col_expr(node::Column::LastCheckAt, Expr::value(Some(checked_at)))
            .filter(node::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for SeaStore {
    async fn insert(&self, new: &NewRule) -> Result<Rule, StoreError> {
        let now = Utc::now();
        let model = rule::ActiveModel {
            name: Set(new.name.clone()),
            rule_type: Set(new.entry.kind()),
            node_id: Set(new.entry.node_id()),
            tunnel_id: Set(new.entry.tunnel_id()),
            entry_node_id: Set(new.entry_node_id),
            protocol: Set(new.protocol),
            listen_port: Set(i32::from(new.listen_port)),
            targets: Set(encode_targets(&new.targets)),
            strategy: Set(new.strategy),
            enable_tls: Set(new.enable_tls),
            status: Set(RunStatus::Stopped),
            service_id: Set(None),
            observer_id: Set(None),
            input_bytes: Set(0),
            output_bytes: Set(0),
            total_bytes: Set(0),
            total_requests: Set(0),
            remark: Set(new.remark.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        rule_from_model(model)
    }

    async fn update(&self, id: RuleId, changes: &RuleChanges) -> Result<Option<Rule>, StoreError> {
        let result = rule::Entity::update_many()
            .col_expr(rule::Column::Name, Expr::value(changes.name.clone()))
            .col_expr(rule::Column::Protocol, Expr::value(changes.protocol))
            .col_expr(
                rule::Column::ListenPort,
                Expr::value(i32::from(changes.listen_port)),
            )
            .col_expr(
                rule::Column::Targets,
                Expr::value(encode_targets(&changes.targets)),
            )
            .col_expr(rule::Column::Strategy, Expr::value(changes.strategy))
            .col_expr(rule::Column::EnableTls, Expr::value(changes.enable_tls))
            .col_expr(rule::Column::Remark, Expr::value(changes.remark.clone()))
            .col_expr(rule::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(rule::Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        RuleStore::get(self, id).await
    }

    async fn delete(&self, id: RuleId) -> Result<bool, StoreError> {
        let result = rule::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    async fn get(&self, id: RuleId) -> Result<Option<Rule>, StoreError> {
        rule::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(rule_from_model)
            .transpose()
    }

    async fn list(&self, filter: &RuleFilter, page: Page) -> Result<Paged<Rule>, StoreError> {
        let mut query = rule::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(rule::Column::Status.eq(status));
        }
        if let Some(kind) = filter.kind {
            query = query.filter(rule::Column::RuleType.eq(kind));
        }
        if let Some(node_id) = filter.node_id {
            query = query.filter(rule::Column::EntryNodeId.eq(node_id));
        }
        if let Some(tunnel_id) = filter.tunnel_id {
            query = query.filter(rule::Column::TunnelId.eq(tunnel_id));
        }
        if let Some(keyword) = keyword(&filter.keyword) {
            query = query.filter(rule::Column::Name.contains(keyword));
        }

        let paginator = query
            .order_by_desc(rule::Column::Id)
            .paginate(&self.db, page.page_size);
        let total = paginator.num_items().await?;
        let items = paginator
            .fetch_page(page.page - 1)
            .await?
            .into_iter()
            .map(rule_from_model)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Paged {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn by_entry_node(&self, node_id: NodeId) -> Result<Vec<Rule>, StoreError> {
        rule::Entity::find()
            .filter(rule::Column::EntryNodeId.eq(node_id))
            .order_by_asc(rule::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(rule_from_model)
            .collect()
    }

    async fn port_in_use(
        &self,
        node_id: NodeId,
        port: u16,
        exclude: Option<RuleId>,
    ) -> Result<bool, StoreError> {
        let mut query = rule::Entity::find()
            .filter(rule::Column::EntryNodeId.eq(node_id))
            .filter(rule::Column::ListenPort.eq(i32::from(port)));
        if let Some(exclude) = exclude {
            query = query.filter(rule::Column::Id.ne(exclude));
        }
        Ok(query.count(&self.db).await? > 0)
    }

    async fn count(
        &self,
        status: Option<RunStatus>,
        kind: Option<RuleKind>,
    ) -> Result<u64, StoreError> {
        let mut query = rule::Entity::find();
        if let Some(status) = status {
            query = query.filter(rule::Column::Status.eq(status));
        }
        if let Some(kind) = kind {
            query = query.filter(rule::Column::RuleType.eq(kind));
        }
        Ok(query.count(&self.db).await?)
    }

    async fn count_by_entry_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        Ok(rule::Entity::find()
            .filter(rule::Column::EntryNodeId.eq(node_id))
            .count(&self.db)
            .await?)
    }

    async fn count_by_tunnel(&self, tunnel_id: TunnelId) -> Result<u64, StoreError> {
        Ok(rule::Entity::find()
            .filter(rule::Column::TunnelId.eq(tunnel_id))
            .count(&self.db)
            .await?)
    }

    async fn set_status(&self, id: RuleId, status: RunStatus) -> Result<(), StoreError> {
        rule::Entity::update_many()
            .col_expr(rule::Column::Status, Expr::value(status))
            .col_expr(rule::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(rule::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn set_status_if(
        &self,
        id: RuleId,
        expected: RunStatus,
        status: RunStatus,
    ) -> Result<bool, StoreError> {
        let result = rule::Entity::update_many()
            .col_expr(rule::Column::Status, Expr::value(status))
            .col_expr(rule::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(rule::Column::Id.eq(id))
            .filter(rule::Column::Status.eq(expected))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn stop_running_on_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        let result = rule::Entity::update_many()
            .col_expr(rule::Column::Status, Expr::value(RunStatus::Stopped))
            .col_expr(rule::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(rule::Column::EntryNodeId.eq(node_id))
            .filter(rule::Column::Status.eq(RunStatus::Running))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn record_started(
        &self,
        id: RuleId,
        service_id: &str,
        observer_id: Option<&str>,
    ) -> Result<(), StoreError> {
        rule::Entity::update_many()
            .col_expr(rule::Column::Status, Expr::value(RunStatus::Running))
            .col_expr(rule::Column::ServiceId, Expr::value(Some(service_id.to_string())))
            .col_expr(
                rule::Column::ObserverId,
                Expr::value(observer_id.map(str::to_string)),
            )
            .col_expr(rule::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(rule::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn update_traffic(&self, id: RuleId, sample: TrafficSample) -> Result<bool, StoreError> {
        let result = rule::Entity::update_many()
            .col_expr(rule::Column::InputBytes, Expr::value(sample.input_bytes))
            .col_expr(rule::Column::OutputBytes, Expr::value(sample.output_bytes))
            .col_expr(
                rule::Column::TotalBytes,
                Expr::value(sample.input_bytes.saturating_add(sample.output_bytes)),
            )
            .col_expr(rule::Column::TotalRequests, Expr::value(sample.requests))
            .filter(rule::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl TunnelStore for SeaStore {
    async fn insert(&self, new: &NewTunnel) -> Result<Tunnel, StoreError> {
        let now = Utc::now();
        let model = tunnel::ActiveModel {
            name: Set(new.name.clone()),
            entry_node_id: Set(new.entry_node_id),
            exit_node_id: Set(new.exit_node_id),
            protocol: Set(new.protocol),
            relay_port: Set(i32::from(new.relay_port)),
            status: Set(RunStatus::Stopped),
            service_id: Set(None),
            chain_id: Set(None),
            relay_addr: Set(None),
            remark: Set(new.remark.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        tunnel_from_model(model)
    }

    async fn update(
        &self,
        id: TunnelId,
        changes: &TunnelChanges,
    ) -> Result<Option<Tunnel>, StoreError> {
        let result = tunnel::Entity::update_many()
            .col_expr(tunnel::Column::Name, Expr::value(changes.name.clone()))
            .col_expr(tunnel::Column::Protocol, Expr::value(changes.protocol))
            .col_expr(
                tunnel::Column::RelayPort,
                Expr::value(i32::from(changes.relay_port)),
            )
            .col_expr(tunnel::Column::Remark, Expr::value(changes.remark.clone()))
            .col_expr(tunnel::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(tunnel::Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        TunnelStore::get(self, id).await
    }

    async fn delete(&self, id: TunnelId) -> Result<bool, StoreError> {
        let result = tunnel::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    async fn get(&self, id: TunnelId) -> Result<Option<Tunnel>, StoreError> {
        tunnel::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(tunnel_from_model)
            .transpose()
    }

    async fn list(&self, filter: &TunnelFilter, page: Page) -> Result<Paged<Tunnel>, StoreError> {
        let mut query = tunnel::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(tunnel::Column::Status.eq(status));
        }
        if let Some(node_id) = filter.node_id {
            query = query.filter(
                Condition::any()
                    .add(tunnel::Column::EntryNodeId.eq(node_id))
                    .add(tunnel::Column::ExitNodeId.eq(node_id)),
            );
        }
        if let Some(keyword) = keyword(&filter.keyword) {
            query = query.filter(tunnel::Column::Name.contains(keyword));
        }

        let paginator = query
            .order_by_desc(tunnel::Column::Id)
            .paginate(&self.db, page.page_size);
        let total = paginator.num_items().await?;
        let items = paginator
            .fetch_page(page.page - 1)
            .await?
            .into_iter()
            .map(tunnel_from_model)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Paged {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn by_exit_node(&self, node_id: NodeId) -> Result<Vec<Tunnel>, StoreError> {
        tunnel::Entity::find()
            .filter(tunnel::Column::ExitNodeId.eq(node_id))
            .order_by_asc(tunnel::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(tunnel_from_model)
            .collect()
    }

    async fn count(&self, status: Option<RunStatus>) -> Result<u64, StoreError> {
        let mut query = tunnel::Entity::find();
        if let Some(status) = status {
            query = query.filter(tunnel::Column::Status.eq(status));
        }
        Ok(query.count(&self.db).await?)
    }

    async fn count_by_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        Ok(tunnel::Entity::find()
            .filter(
                Condition::any()
                    .add(tunnel::Column::EntryNodeId.eq(node_id))
                    .add(tunnel::Column::ExitNodeId.eq(node_id)),
            )
            .count(&self.db)
            .await?)
    }

    async fn set_status(&self, id: TunnelId, status: RunStatus) -> Result<(), StoreError> {
        tunnel::Entity::update_many()
            .col_expr(tunnel::Column::Status, Expr::value(status))
            .col_expr(tunnel::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(tunnel::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn set_status_if(
        &self,
        id: TunnelId,
        expected: RunStatus,
        status: RunStatus,
    ) -> Result<bool, StoreError> {
        let result = tunnel::Entity::update_many()
            .col_expr(tunnel::Column::Status, Expr::value(status))
            .col_expr(tunnel::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(tunnel::Column::Id.eq(id))
            .filter(tunnel::Column::Status.eq(expected))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn stop_running_on_node(&self, node_id: NodeId) -> Result<u64, StoreError> {
        let result = tunnel::Entity::update_many()
            .col_expr(tunnel::Column::Status, Expr::value(RunStatus::Stopped))
            .col_expr(tunnel::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(
                Condition::any()
                    .add(tunnel::Column::EntryNodeId.eq(node_id))
                    .add(tunnel::Column::ExitNodeId.eq(node_id)),
            )
            .filter(tunnel::Column::Status.eq(RunStatus::Running))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn set_relay_endpoint(&self, id: TunnelId, relay_addr: &str) -> Result<(), StoreError> {
        tunnel::Entity::update_many()
            .col_expr(
                tunnel::Column::RelayAddr,
                Expr::value(Some(relay_addr.to_string())),
            )
            .col_expr(tunnel::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(tunnel::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn record_started(
        &self,
        id: TunnelId,
        service_id: &str,
        chain_id: &str,
    ) -> Result<(), StoreError> {
        tunnel::Entity::update_many()
            .col_expr(tunnel::Column::Status, Expr::value(RunStatus::Running))
            .col_expr(
                tunnel::Column::ServiceId,
                Expr::value(Some(service_id.to_string())),
            )
            .col_expr(
                tunnel::Column::ChainId,
                Expr::value(Some(chain_id.to_string())),
            )
            .col_expr(tunnel::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(tunnel::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for SeaStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let model = system_setting::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await?;
        Ok(model.map(|m| m.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let model = system_setting::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            updated_at: Set(Utc::now()),
        };
        system_setting::Entity::insert(model)
            .on_conflict(
                OnConflict::column(system_setting::Column::Key)
                    .update_columns([
                        system_setting::Column::Value,
                        system_setting::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
