//! Best-effort remote cleanup bookkeeping
//!
//! Cleanup calls made while undoing a partial start, or while tearing a
//! resource down, never decide the outcome of the operation. Their results
//! travel next to it instead so callers and tests can see what was tried.

use fleetgate_gateway::{NodeApi, RemoteError};
use tracing::{debug, warn};

use crate::error::ControlError;
use crate::model::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    DeleteService(String),
    DeleteChain(String),
    DeleteObserver(String),
}

impl CleanupAction {
    pub fn name(&self) -> &str {
        match self {
            CleanupAction::DeleteService(name)
            | CleanupAction::DeleteChain(name)
            | CleanupAction::DeleteObserver(name) => name,
        }
    }
}

#[derive(Debug)]
pub struct CleanupAttempt {
    pub node_id: NodeId,
    pub action: CleanupAction,
    pub outcome: Result<(), RemoteError>,
}

impl CleanupAttempt {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Cleanup attempts collected during one operation
#[derive(Debug, Default)]
pub struct Compensation {
    attempts: Vec<CleanupAttempt>,
}

impl Compensation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a cleanup call and record its outcome; failures are only logged
    pub async fn run(&mut self, node_id: NodeId, api: &dyn NodeApi, action: CleanupAction) {
        let outcome = match &action {
            CleanupAction::DeleteService(name) => api.delete_service(name).await,
            CleanupAction::DeleteChain(name) => api.delete_chain(name).await,
            CleanupAction::DeleteObserver(name) => api.delete_observer(name).await,
        };

        match &outcome {
            Ok(()) => debug!(node_id, "Cleanup {:?} done", action),
            Err(e) => warn!(node_id, "Cleanup {:?} failed: {}", action, e),
        }

        self.attempts.push(CleanupAttempt {
            node_id,
            action,
            outcome,
        });
    }

    /// Like [`run`](Self::run), for cleanup the caller cannot proceed without
    pub async fn run_required(
        &mut self,
        node_id: NodeId,
        api: &dyn NodeApi,
        action: CleanupAction,
    ) -> Result<(), RemoteError> {
        self.run(node_id, api, action).await;
        self.attempts
            .last()
            .map_or(Ok(()), |attempt| attempt.outcome.clone())
    }

    pub fn attempts(&self) -> &[CleanupAttempt] {
        &self.attempts
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Whether `action` was attempted, regardless of its outcome
    pub fn attempted(&self, action: &CleanupAction) -> bool {
        self.attempts.iter().any(|a| &a.action == action)
    }
}

/// Outcome of a start or stop with the cleanup it performed
#[derive(Debug)]
pub struct Transition<T> {
    pub result: Result<T, ControlError>,
    pub compensation: Compensation,
}

impl<T> Transition<T> {
    pub fn new(result: Result<T, ControlError>, compensation: Compensation) -> Self {
        Self {
            result,
            compensation,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, ControlError> {
        self.result
    }
}
