//! Descriptor builders and the deterministic remote naming scheme

use serde_json::json;
use std::time::Duration;

use crate::config::{
    ChainConfig, ConnectorConfig, DialerConfig, ForwarderConfig, ForwarderNode, HandlerConfig,
    HopConfig, ListenerConfig, Metadata, NodeConfig, ObserverConfig, PluginConfig,
    SelectorConfig, ServiceConfig,
};

pub const DEFAULT_STRATEGY: &str = "round";
pub const SELECTOR_MAX_FAILS: u32 = 3;
pub const SELECTOR_FAIL_TIMEOUT: Duration = Duration::from_secs(30);
pub const OBSERVER_REPORT_PATH: &str = "/api/v1/observer/report";
pub const OBSERVER_PERIOD: &str = "5s";
const OBSERVER_TIMEOUT: &str = "10s";
const UDP_TTL: &str = "180s";
const UDP_READ_BUFFER: u32 = 16 * 1024;

pub fn rule_service_name(rule_id: i32) -> String {
    format!("rule-{}", rule_id)
}

pub fn relay_service_name(tunnel_id: i32) -> String {
    format!("tunnel-{}-relay", tunnel_id)
}

pub fn chain_name(tunnel_id: i32) -> String {
    format!("tunnel-{}-chain", tunnel_id)
}

pub fn observer_name(node_name: &str, rule_id: i32) -> String {
    format!("observer-{}-{}", node_name, rule_id)
}

/// Inputs for a forwarding service
#[derive(Debug, Clone)]
pub struct ForwardSpec<'a> {
    pub name: &'a str,
    /// `tcp` or `udp`
    pub protocol: &'a str,
    pub listen_port: u16,
    pub targets: &'a [String],
    pub strategy: Option<&'a str>,
    /// Chain to route through, for rules bound to a tunnel
    pub chain: Option<&'a str>,
}

/// Multi-target load-balanced forwarding service
///
/// Strategy falls back to round-robin when unset or when there is only one
/// target to pick from.
pub fn forward_service(spec: &ForwardSpec<'_>) -> ServiceConfig {
    let strategy = match spec.strategy {
        Some(strategy) if !strategy.is_empty() && spec.targets.len() > 1 => strategy,
        _ => DEFAULT_STRATEGY,
    };

    let nodes = spec
        .targets
        .iter()
        .enumerate()
        .map(|(i, target)| ForwarderNode {
            name: format!("target-{}", i),
            addr: target.clone(),
        })
        .collect();

    ServiceConfig {
        name: spec.name.to_string(),
        addr: format!(":{}", spec.listen_port),
        handler: Some(HandlerConfig {
            kind: spec.protocol.to_string(),
            chain: spec.chain.map(str::to_string),
            auth: None,
        }),
        listener: Some(listener(spec.protocol)),
        forwarder: Some(ForwarderConfig {
            nodes,
            selector: Some(SelectorConfig {
                strategy: strategy.to_string(),
                max_fails: SELECTOR_MAX_FAILS,
                fail_timeout: SELECTOR_FAIL_TIMEOUT,
            }),
        }),
        ..Default::default()
    }
}

/// Relay listener on a tunnel's exit node
pub fn relay_service(tunnel_id: i32, protocol: &str, relay_port: u16) -> ServiceConfig {
    ServiceConfig {
        name: relay_service_name(tunnel_id),
        addr: format!(":{}", relay_port),
        handler: Some(HandlerConfig {
            kind: "relay".to_string(),
            chain: None,
            auth: None,
        }),
        listener: Some(ListenerConfig {
            kind: protocol.to_string(),
            metadata: Metadata::new(),
        }),
        ..Default::default()
    }
}

/// Single-hop chain on a tunnel's entry node pointing at the exit relay
pub fn relay_chain(
    tunnel_id: i32,
    protocol: &str,
    exit_address: &str,
    relay_port: u16,
) -> ChainConfig {
    ChainConfig {
        name: chain_name(tunnel_id),
        hops: vec![HopConfig {
            name: "hop-0".to_string(),
            nodes: vec![NodeConfig {
                name: "exit-relay".to_string(),
                addr: relay_endpoint(exit_address, relay_port),
                connector: Some(ConnectorConfig {
                    kind: "relay".to_string(),
                    auth: None,
                }),
                dialer: Some(DialerConfig {
                    kind: protocol.to_string(),
                }),
            }],
        }],
    }
}

/// `host:port` with IPv6 literals bracketed
pub fn relay_endpoint(address: &str, port: u16) -> String {
    let address = address.trim();
    if address.contains(':') && !address.starts_with('[') {
        format!("[{}]:{}", address, port)
    } else {
        format!("{}:{}", address, port)
    }
}

/// HTTP observer that reports stats back to this control plane
pub fn report_observer(name: &str, panel_url: &str) -> ObserverConfig {
    ObserverConfig {
        name: name.to_string(),
        plugin: Some(PluginConfig {
            kind: "http".to_string(),
            addr: format!("{}{}", panel_url.trim_end_matches('/'), OBSERVER_REPORT_PATH),
            timeout: OBSERVER_TIMEOUT.to_string(),
        }),
    }
}

impl ServiceConfig {
    /// Wire an observer with periodic stats reporting and counter reset
    pub fn with_observer(mut self, observer: &str) -> Self {
        self.observer = Some(observer.to_string());
        self.metadata.insert("enableStats".to_string(), json!(true));
        self.metadata
            .insert("observer.period".to_string(), json!(OBSERVER_PERIOD));
        self.metadata
            .insert("observer.resetTraffic".to_string(), json!(true));
        self
    }
}

fn listener(protocol: &str) -> ListenerConfig {
    let mut metadata = Metadata::new();
    if protocol == "udp" {
        metadata.insert("keepAlive".to_string(), json!(true));
        metadata.insert("ttl".to_string(), json!(UDP_TTL));
        metadata.insert("readBufferSize".to_string(), json!(UDP_READ_BUFFER));
    }
    ListenerConfig {
        kind: protocol.to_string(),
        metadata,
    }
}
