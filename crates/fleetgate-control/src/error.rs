//! Error taxonomy of the control plane

use fleetgate_gateway::RemoteError;
use sea_orm::{DbErr, SqlErr};
use std::fmt;
use thiserror::Error;

use crate::model::{NodeId, NodeStatus, RuleId, TunnelId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Node,
    Rule,
    Tunnel,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Node => "node",
            ResourceKind::Rule => "rule",
            ResourceKind::Tunnel => "tunnel",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(DbErr),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// A foreign key refused the write: the row is still referenced, or
    /// references a row that no longer exists
    #[error("referenced record: {0}")]
    Referenced(String),

    #[error("corrupt {kind} {id}: {reason}")]
    Corrupt {
        kind: ResourceKind,
        id: i32,
        reason: String,
    },
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => StoreError::Duplicate(detail),
            Some(SqlErr::ForeignKeyConstraintViolation(detail)) => StoreError::Referenced(detail),
            _ => StoreError::Db(err),
        }
    }
}

/// Operations refused because of the current state of the fleet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    #[error("port {port} is already in use on node {node_id}")]
    PortInUse { node_id: NodeId, port: u16 },

    #[error("node name '{0}' is already taken")]
    NodeNameTaken(String),

    #[error("node {0} is still referenced by rules")]
    NodeHasRules(NodeId),

    #[error("node {0} is still referenced by tunnels")]
    NodeHasTunnels(NodeId),

    #[error("tunnel {0} is still referenced by rules")]
    TunnelInUse(TunnelId),

    #[error("rule {0} is running, stop it first")]
    RuleRunning(RuleId),

    #[error("tunnel {0} is running, stop it first")]
    TunnelRunning(TunnelId),

    #[error("node {node_id} is {status}")]
    NodeUnavailable { node_id: NodeId, status: NodeStatus },
}

/// Coarse classification used by callers to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Conflict,
    Remote,
    Internal,
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: i32 },

    #[error(transparent)]
    Conflict(#[from] Conflict),

    #[error("tunnel {0} has no chain available")]
    TunnelChainUnavailable(TunnelId),

    #[error("panel url is not configured, cannot create traffic observer")]
    PanelUrlMissing,

    #[error("failed to create observer {name}: {source}")]
    ObserverFailed {
        name: String,
        #[source]
        source: RemoteError,
    },

    #[error("failed to start {kind} {id}: {source}")]
    StartFailed {
        kind: ResourceKind,
        id: i32,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ControlError {
    pub fn validation(message: impl Into<String>) -> Self {
        ControlError::Validation(message.into())
    }

    pub fn not_found(kind: ResourceKind, id: i32) -> Self {
        ControlError::NotFound { kind, id }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ControlError::Validation(_) => ErrorClass::Validation,
            ControlError::NotFound { .. } => ErrorClass::NotFound,
            ControlError::Conflict(_)
            | ControlError::TunnelChainUnavailable(_)
            | ControlError::PanelUrlMissing => ErrorClass::Conflict,
            ControlError::ObserverFailed { .. }
            | ControlError::StartFailed { .. }
            | ControlError::Remote(_) => ErrorClass::Remote,
            ControlError::Store(_) => ErrorClass::Internal,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::Validation(_) => "VALIDATION_FAILED",
            ControlError::NotFound { kind, .. } => match kind {
                ResourceKind::Node => "NODE_NOT_FOUND",
                ResourceKind::Rule => "RULE_NOT_FOUND",
                ResourceKind::Tunnel => "TUNNEL_NOT_FOUND",
            },
            ControlError::Conflict(conflict) => match conflict {
                Conflict::PortInUse { .. } => "PORT_IN_USE",
                Conflict::NodeNameTaken(_) => "NODE_NAME_TAKEN",
                Conflict::NodeHasRules(_) => "NODE_HAS_RULES",
                Conflict::NodeHasTunnels(_) => "NODE_HAS_TUNNELS",
                Conflict::TunnelInUse(_) => "TUNNEL_IN_USE",
                Conflict::RuleRunning(_) => "RULE_RUNNING",
                Conflict::TunnelRunning(_) => "TUNNEL_RUNNING",
                Conflict::NodeUnavailable { .. } => "NODE_UNAVAILABLE",
            },
            ControlError::TunnelChainUnavailable(_) => "TUNNEL_CHAIN_UNAVAILABLE",
            ControlError::PanelUrlMissing => "PANEL_URL_MISSING",
            ControlError::ObserverFailed { .. } => "OBSERVER_CREATE_FAILED",
            ControlError::StartFailed { kind, .. } => match kind {
                ResourceKind::Node => "REMOTE_OPERATION_FAILED",
                ResourceKind::Rule => "RULE_START_FAILED",
                ResourceKind::Tunnel => "TUNNEL_START_FAILED",
            },
            ControlError::Remote(_) => "REMOTE_OPERATION_FAILED",
            ControlError::Store(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_gateway::{FailureCause, Operation};

    #[test]
    fn test_classes() {
        assert_eq!(
            ControlError::validation("bad port").class(),
            ErrorClass::Validation
        );
        assert_eq!(
            ControlError::not_found(ResourceKind::Rule, 3).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            ControlError::from(Conflict::TunnelInUse(1)).class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            ControlError::TunnelChainUnavailable(1).class(),
            ErrorClass::Conflict
        );

        let remote = RemoteError::new(
            Operation::Create,
            "service rule-1",
            FailureCause::Transport("refused".into()),
        );
        let err = ControlError::StartFailed {
            kind: ResourceKind::Rule,
            id: 1,
            source: remote,
        };
        assert_eq!(err.class(), ErrorClass::Remote);
        assert_eq!(err.code(), "RULE_START_FAILED");
    }

    #[test]
    fn test_not_found_message() {
        let err = ControlError::not_found(ResourceKind::Tunnel, 42);
        assert_eq!(err.to_string(), "tunnel 42 not found");
        assert_eq!(err.code(), "TUNNEL_NOT_FOUND");
    }
}
