//! Runtime knobs of the control plane

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What to do when a rule's traffic observer cannot be provisioned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ObserverPolicy {
    /// Missing panel URL or failed observer creation fails the rule start
    #[default]
    Required,
    /// Start the rule without traffic stats and log a warning
    BestEffort,
}

impl FromStr for ObserverPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(ObserverPolicy::Required),
            "best-effort" | "best_effort" | "besteffort" => Ok(ObserverPolicy::BestEffort),
            other => Err(format!(
                "invalid observer policy '{}', expected 'required' or 'best-effort'",
                other
            )),
        }
    }
}

impl fmt::Display for ObserverPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserverPolicy::Required => f.write_str("required"),
            ObserverPolicy::BestEffort => f.write_str("best-effort"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Interval between health probe cycles
    pub probe_interval: Duration,
    /// Interval between reconciliation cycles
    pub sync_interval: Duration,
    /// Upper bound for a single remote call
    pub remote_timeout: Duration,
    pub observer_policy: ObserverPolicy,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            sync_interval: Duration::from_secs(5),
            remote_timeout: Duration::from_secs(5),
            observer_policy: ObserverPolicy::Required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_observer_policy() {
        assert_eq!("required".parse(), Ok(ObserverPolicy::Required));
        assert_eq!("Best-Effort".parse(), Ok(ObserverPolicy::BestEffort));
        assert!("sometimes".parse::<ObserverPolicy>().is_err());
    }
}
