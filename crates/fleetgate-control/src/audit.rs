//! Operation audit trail
//!
//! Recording is fire-and-forget: a sink never blocks the operation that
//! produced the entry and never fails it. [`DbAuditSink::flush`] waits for
//! pending writes at shutdown.

use chrono::Utc;
use fleetgate_db::entities::operation_log;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::fmt;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::error::ResourceKind;

/// Who triggered an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin_ip: None,
            user_agent: None,
        }
    }

    /// Actor for operations started by the control plane itself
    pub fn system() -> Self {
        Self::new("system")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Start,
    Stop,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Start => "start",
            AuditAction::Stop => "stop",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub actor: String,
    pub action: AuditAction,
    pub resource_type: ResourceKind,
    pub resource_id: Option<i32>,
    pub description: String,
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEntry {
    pub fn new(
        actor: &Actor,
        action: AuditAction,
        resource_type: ResourceKind,
        resource_id: i32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.name.clone(),
            action,
            resource_type,
            resource_id: Some(resource_id),
            description: description.into(),
            origin_ip: actor.origin_ip.clone(),
            user_agent: actor.user_agent.clone(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Writes entries to the `operation_logs` table on tracked tasks
pub struct DbAuditSink {
    db: DatabaseConnection,
    writes: TaskTracker,
}

impl DbAuditSink {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            writes: TaskTracker::new(),
        }
    }

    /// Wait until every entry recorded so far has been written
    pub async fn flush(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }
}

impl AuditSink for DbAuditSink {
    fn record(&self, entry: AuditEntry) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No runtime available, dropping audit entry: {} {} {:?}",
                entry.action, entry.resource_type, entry.resource_id
            );
            return;
        };

        let db = self.db.clone();
        self.writes.spawn_on(
            async move {
                let model = operation_log::ActiveModel {
                    actor: Set(entry.actor),
                    action: Set(entry.action.as_str().to_string()),
                    resource_type: Set(entry.resource_type.as_str().to_string()),
                    resource_id: Set(entry.resource_id),
                    description: Set(entry.description),
                    origin_ip: Set(entry.origin_ip),
                    user_agent: Set(entry.user_agent),
                    created_at: Set(Utc::now()),
                    ..Default::default()
                };
                if let Err(e) = model.insert(&db).await {
                    warn!("Failed to write audit entry: {}", e);
                }
            },
            &runtime,
        );
    }
}

/// Logs entries instead of persisting them
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        info!(
            actor = %entry.actor,
            action = %entry.action,
            resource = %entry.resource_type,
            resource_id = ?entry.resource_id,
            "{}",
            entry.description
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{EntityTrait, PaginatorTrait};

    #[tokio::test]
    async fn test_flush_waits_for_pending_writes() {
        let db = fleetgate_db::connect("sqlite::memory:").await.unwrap();
        fleetgate_db::migrate(&db).await.unwrap();
        let sink = DbAuditSink::new(db.clone());

        let actor = Actor::new("admin");
        for id in 1..=3 {
            sink.record(AuditEntry::new(
                &actor,
                AuditAction::Start,
                ResourceKind::Rule,
                id,
                "started rule",
            ));
        }
        sink.flush().await;
        assert_eq!(operation_log::Entity::find().count(&db).await.unwrap(), 3);

        // Still usable after a flush
        sink.record(AuditEntry::new(
            &actor,
            AuditAction::Stop,
            ResourceKind::Rule,
            1,
            "stopped rule",
        ));
        sink.flush().await;
        assert_eq!(operation_log::Entity::find().count(&db).await.unwrap(), 4);
    }
}
