//! Remote node gateway
//!
//! Typed client for the REST configuration API exposed by every proxy node in
//! the fleet. The gateway turns desired configuration objects (services,
//! chains, observers, limiters) into idempotent create/delete calls, fetches
//! a node's full live configuration and runs the liveness probe used by the
//! health prober.
//!
//! Orchestration code talks to nodes exclusively through the [`NodeApi`] and
//! [`NodeConnector`] traits so that a scripted fleet can stand in for real
//! nodes in tests.

pub mod builder;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;

pub use builder::{
    chain_name, forward_service, observer_name, relay_chain, relay_endpoint, relay_service,
    relay_service_name, report_observer, rule_service_name, ForwardSpec, OBSERVER_REPORT_PATH,
};
pub use client::{HttpConnector, NodeClient};
pub use config::{
    AuthConfig, ChainConfig, ConnectorConfig, DialerConfig, ForwarderConfig, ForwarderNode,
    HandlerConfig, HopConfig, LimiterConfig, ListenerConfig, Metadata, NodeConfig,
    ObserverConfig, PluginConfig, RemoteConfig, SelectorConfig, ServiceConfig, ServiceState,
    ServiceStatus,
};
pub use endpoint::NodeEndpoint;
pub use error::{Collection, FailureCause, Operation, RemoteError};

use async_trait::async_trait;
use std::sync::Arc;

/// Control-plane operations available on a single node
///
/// Every named-resource operation is idempotent: creating an existing
/// resource and deleting an absent one both succeed without a mutation.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Lightweight liveness probe against the config API
    async fn probe(&self) -> Result<(), RemoteError>;

    /// Fetch the node's complete live configuration
    async fn fetch_config(&self) -> Result<RemoteConfig, RemoteError>;

    /// Ask the node to persist its running configuration
    async fn save_config(&self) -> Result<(), RemoteError>;

    async fn create_service(&self, service: &ServiceConfig) -> Result<(), RemoteError>;
    async fn delete_service(&self, name: &str) -> Result<(), RemoteError>;

    async fn create_chain(&self, chain: &ChainConfig) -> Result<(), RemoteError>;
    async fn delete_chain(&self, name: &str) -> Result<(), RemoteError>;

    async fn create_observer(&self, observer: &ObserverConfig) -> Result<(), RemoteError>;
    async fn delete_observer(&self, name: &str) -> Result<(), RemoteError>;

    async fn create_limiter(&self, limiter: &LimiterConfig) -> Result<(), RemoteError>;
    async fn delete_limiter(&self, name: &str) -> Result<(), RemoteError>;
}

/// Produces a [`NodeApi`] handle for a node endpoint
pub trait NodeConnector: Send + Sync {
    fn connect(&self, endpoint: &NodeEndpoint) -> Arc<dyn NodeApi>;
}
