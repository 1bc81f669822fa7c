//! Remote operation failures

use std::fmt;
use thiserror::Error;

/// Which gateway operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Probe,
    FetchConfig,
    SaveConfig,
    Lookup,
    Create,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Probe => "probe",
            Operation::FetchConfig => "fetch-config",
            Operation::SaveConfig => "save-config",
            Operation::Lookup => "lookup",
            Operation::Create => "create",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Named resource collections of the node config API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Services,
    Chains,
    Observers,
    Limiters,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Services => "services",
            Collection::Chains => "chains",
            Collection::Observers => "observers",
            Collection::Limiters => "limiters",
        }
    }

    /// Singular noun used in resource labels
    pub fn kind(&self) -> &'static str {
        match self {
            Collection::Services => "service",
            Collection::Chains => "chain",
            Collection::Observers => "observer",
            Collection::Limiters => "limiter",
        }
    }
}

/// Underlying reason of a remote failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

/// A remote node rejected a call or could not be reached
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("remote {operation} of {resource} failed: {cause}")]
pub struct RemoteError {
    pub operation: Operation,
    /// Resource label, e.g. `service rule-7` or `config`
    pub resource: String,
    #[source]
    pub cause: FailureCause,
}

impl RemoteError {
    pub fn new(operation: Operation, resource: impl Into<String>, cause: FailureCause) -> Self {
        Self {
            operation,
            resource: resource.into(),
            cause,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self.cause, FailureCause::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_operation_and_resource() {
        let err = RemoteError::new(
            Operation::Create,
            "chain tunnel-4-chain",
            FailureCause::Status {
                code: 400,
                body: "bad hop".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "remote create of chain tunnel-4-chain failed: unexpected status 400: bad hop"
        );
        assert!(!err.is_transport());
    }
}
