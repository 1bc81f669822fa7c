//! Wire types of the node config API
//!
//! Field names follow the node's JSON (camelCase). Optional parts are omitted
//! when serialising so descriptors stay minimal, and every collection tolerates
//! `null` when deserialising a node's live configuration.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Free-form metadata block attached to services and listeners
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<HandlerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<ListenerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarder: Option<ForwarderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub climiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rlimiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observer: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    /// Runtime status, only present in configs read back from a node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceStatus>,
}

impl ServiceConfig {
    /// Observed runtime state; a service without status counts as stopped
    pub fn state(&self) -> ServiceState {
        self.status
            .as_ref()
            .map(|status| ServiceState::from_remote(&status.state))
            .unwrap_or(ServiceState::Stopped)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// One of `ready`, `running`, `failed`, `closed`
    #[serde(default)]
    pub state: String,
}

/// Remote service state collapsed onto the local status vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Running,
    Error,
    Stopped,
}

impl ServiceState {
    pub fn from_remote(state: &str) -> Self {
        match state {
            "ready" | "running" => ServiceState::Running,
            "failed" => ServiceState::Error,
            _ => ServiceState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default)]
    pub nodes: Vec<ForwarderNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderNode {
    pub name: String,
    pub addr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strategy: String,
    #[serde(default)]
    pub max_fails: u32,
    #[serde(default, with = "go_duration")]
    pub fail_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hops: Vec<HopConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeConfig>,
}

/// A node inside a chain hop (not a fleet node)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<ConnectorConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialer: Option<DialerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialerConfig {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PluginConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// `http` or `grpc`
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timeout: String,
}

/// Traffic rate limiter
///
/// Limit lines look like `$ 100MB 100MB` (service), `$$ 10MB` (per connection)
/// or `192.168.1.1 1MB 5MB` (per source address).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub limits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PluginConfig>,
}

/// A node's complete live configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub services: Vec<ServiceConfig>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub chains: Vec<ChainConfig>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub observers: Vec<ObserverConfig>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub limiters: Vec<LimiterConfig>,
}

impl RemoteConfig {
    /// Map from service name to its observed state
    pub fn service_states(&self) -> HashMap<String, ServiceState> {
        self.services
            .iter()
            .map(|service| (service.name.clone(), service.state()))
            .collect()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|service| service.name == name)
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Durations as the node encodes them: integer nanoseconds on write,
/// integer nanoseconds or strings like `30s`/`500ms`/`1m` on read
mod go_duration {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Nanos(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Nanos(nanos) => Ok(Duration::from_nanos(nanos)),
            Raw::Text(text) => parse(&text).ok_or_else(|| {
                de::Error::custom(format!("invalid duration: {:?}", text))
            }),
        }
    }

    pub(super) fn parse(text: &str) -> Option<Duration> {
        let text = text.trim();
        let split = text.find(|c: char| !c.is_ascii_digit())?;
        let (number, unit) = text.split_at(split);
        let number: u64 = number.parse().ok()?;
        let duration = match unit {
            "ns" => Duration::from_nanos(number),
            "us" | "µs" => Duration::from_micros(number),
            "ms" => Duration::from_millis(number),
            "s" => Duration::from_secs(number),
            "m" => Duration::from_secs(number.checked_mul(60)?),
            "h" => Duration::from_secs(number.checked_mul(3600)?),
            _ => return None,
        };
        Some(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_state_mapping() {
        assert_eq!(ServiceState::from_remote("ready"), ServiceState::Running);
        assert_eq!(ServiceState::from_remote("running"), ServiceState::Running);
        assert_eq!(ServiceState::from_remote("failed"), ServiceState::Error);
        assert_eq!(ServiceState::from_remote("closed"), ServiceState::Stopped);
        assert_eq!(ServiceState::from_remote(""), ServiceState::Stopped);
    }

    #[test]
    fn test_remote_config_tolerates_null_collections() {
        let config: RemoteConfig = serde_json::from_value(json!({
            "services": null,
            "chains": [{"name": "tunnel-1-chain"}],
            "api": {"addr": ":18080"}
        }))
        .unwrap();

        assert!(config.services.is_empty());
        assert_eq!(config.chains.len(), 1);
        assert!(config.observers.is_empty());
        assert!(config.limiters.is_empty());
    }

    #[test]
    fn test_service_states_default_to_stopped_without_status() {
        let config: RemoteConfig = serde_json::from_value(json!({
            "services": [
                {"name": "rule-1", "addr": ":8080", "status": {"state": "running"}},
                {"name": "rule-2", "addr": ":8081", "status": {"state": "failed"}},
                {"name": "rule-3", "addr": ":8082"}
            ]
        }))
        .unwrap();

        let states = config.service_states();
        assert_eq!(states["rule-1"], ServiceState::Running);
        assert_eq!(states["rule-2"], ServiceState::Error);
        assert_eq!(states["rule-3"], ServiceState::Stopped);
        assert!(!states.contains_key("rule-4"));
    }

    #[test]
    fn test_selector_fail_timeout_wire_format() {
        let selector = SelectorConfig {
            strategy: "round".to_string(),
            max_fails: 3,
            fail_timeout: Duration::from_secs(30),
        };
        let value = serde_json::to_value(&selector).unwrap();
        assert_eq!(
            value,
            json!({"strategy": "round", "maxFails": 3, "failTimeout": 30_000_000_000u64})
        );

        let parsed: SelectorConfig =
            serde_json::from_value(json!({"strategy": "fifo", "failTimeout": "10s"})).unwrap();
        assert_eq!(parsed.fail_timeout, Duration::from_secs(10));
        assert_eq!(parsed.max_fails, 0);
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(go_duration::parse("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(go_duration::parse("2m"), Some(Duration::from_secs(120)));
        assert_eq!(go_duration::parse("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(go_duration::parse("30"), None);
        assert_eq!(go_duration::parse("abc"), None);
    }
}
