//! REST API for the fleetgate control plane
//!
//! Exposes node, rule and tunnel management plus the observer report
//! endpoint nodes push traffic stats to. Served with axum, documented with
//! utoipa and browsable through Swagger UI.

pub mod extract;
pub mod handlers;
pub mod models;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use fleetgate_control::Fleet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across handlers
pub struct AppState {
    pub fleet: Fleet,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Fleetgate API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Control plane API for a fleet of proxy nodes: forwarding rules, relay tunnels, health and traffic",
        contact(
            name = "Fleetgate Team",
            email = "team@fleetgate.dev"
        )
    ),
    paths(
        handlers::health_check,
        handlers::observer_report,
        handlers::list_nodes,
        handlers::create_node,
        handlers::get_node,
        handlers::update_node,
        handlers::delete_node,
        handlers::get_node_config,
        handlers::node_stats,
        handlers::list_rules,
        handlers::create_rule,
        handlers::get_rule,
        handlers::update_rule,
        handlers::delete_rule,
        handlers::start_rule,
        handlers::stop_rule,
        handlers::rule_stats,
        handlers::list_tunnels,
        handlers::create_tunnel,
        handlers::get_tunnel,
        handlers::update_tunnel,
        handlers::delete_tunnel,
        handlers::start_tunnel,
        handlers::stop_tunnel,
        handlers::tunnel_stats,
        handlers::dashboard_stats,
        handlers::get_system_config,
        handlers::update_system_config,
    ),
    components(
        schemas(
            models::HealthResponse,
            models::ErrorResponse,
            models::CleanupReport,
            models::NodeResponse,
            models::NodeRequest,
            models::NodeList,
            models::RuleResponse,
            models::CreateRuleRequest,
            models::UpdateRuleRequest,
            models::RuleList,
            models::TunnelResponse,
            models::CreateTunnelRequest,
            models::UpdateTunnelRequest,
            models::TunnelList,
            models::NodeStatsResponse,
            models::RuleStatsResponse,
            models::TunnelStatsResponse,
            models::DashboardResponse,
            models::ObserverAck,
            models::SystemConfig,
            models::UpdateSystemConfigRequest,
        )
    ),
    tags(
        (name = "nodes", description = "Proxy node registry"),
        (name = "rules", description = "Forwarding rules"),
        (name = "tunnels", description = "Relay tunnels between nodes"),
        (name = "observer", description = "Traffic reports pushed by nodes"),
        (name = "system", description = "Health, dashboard and settings"),
    )
)]
pub struct ApiDoc;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Address to bind the API server
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub enable_cors: bool,
    /// Allowed CORS origins, any origin when `None`
    pub cors_origins: Option<Vec<String>>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3080)),
            enable_cors: true,
            cors_origins: None,
        }
    }
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, fleet: Fleet) -> Self {
        Self {
            config,
            state: Arc::new(AppState { fleet }),
        }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let api_doc = ApiDoc::openapi();

        let api_router = Router::new()
            .route("/api/health", get(handlers::health_check))
            // Pushed by node observers, see the observer plugin descriptor
            .route("/api/v1/observer/report", post(handlers::observer_report))
            .route(
                "/api/v1/nodes",
                get(handlers::list_nodes).post(handlers::create_node),
            )
            .route("/api/v1/nodes/stats", get(handlers::node_stats))
            .route(
                "/api/v1/nodes/{id}",
                get(handlers::get_node)
                    .put(handlers::update_node)
                    .delete(handlers::delete_node),
            )
            .route("/api/v1/nodes/{id}/config", get(handlers::get_node_config))
            .route(
                "/api/v1/rules",
                get(handlers::list_rules).post(handlers::create_rule),
            )
            .route("/api/v1/rules/stats", get(handlers::rule_stats))
            .route(
                "/api/v1/rules/{id}",
                get(handlers::get_rule)
                    .put(handlers::update_rule)
                    .delete(handlers::delete_rule),
            )
            .route("/api/v1/rules/{id}/start", post(handlers::start_rule))
            .route("/api/v1/rules/{id}/stop", post(handlers::stop_rule))
            .route(
                "/api/v1/tunnels",
                get(handlers::list_tunnels).post(handlers::create_tunnel),
            )
            .route("/api/v1/tunnels/stats", get(handlers::tunnel_stats))
            .route(
                "/api/v1/tunnels/{id}",
                get(handlers::get_tunnel)
                    .put(handlers::update_tunnel)
                    .delete(handlers::delete_tunnel),
            )
            .route("/api/v1/tunnels/{id}/start", post(handlers::start_tunnel))
            .route("/api/v1/tunnels/{id}/stop", post(handlers::stop_tunnel))
            .route("/api/v1/dashboard/stats", get(handlers::dashboard_stats))
            .route(
                "/api/v1/system/config",
                get(handlers::get_system_config).put(handlers::update_system_config),
            )
            .with_state(self.state.clone());

        // SwaggerUi serves the OpenAPI document at /api/openapi.json
        let mut router = Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", api_doc))
            .merge(api_router)
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(self.cors_layer());
        }

        router
    }

    fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::HeaderName::from_static(extract::ACTOR_HEADER),
            ]);

        match &self.config.cors_origins {
            Some(origins) => {
                let origins: Vec<HeaderValue> = origins
                    .iter()
                    .filter_map(|origin| match origin.parse() {
                        Ok(value) => Some(value),
                        Err(_) => {
                            warn!("Ignoring invalid CORS origin '{}'", origin);
                            None
                        }
                    })
                    .collect();
                layer.allow_origin(origins)
            }
            None => layer.allow_origin(tower_http::cors::Any),
        }
    }

    /// Serve until `shutdown` resolves, then finish in-flight requests
    pub async fn serve<F>(self, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Starting API server on {}", local_addr);
        info!("OpenAPI spec: http://{}/api/openapi.json", local_addr);
        info!("Swagger UI: http://{}/swagger-ui", local_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        info!("API server stopped");
        Ok(())
    }

    /// Serve until the process is terminated
    pub async fn start(self) -> Result<(), anyhow::Error> {
        self.serve(std::future::pending()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        let doc = ApiDoc::openapi();
        let json = doc.to_json().unwrap();
        assert!(json.contains("/api/v1/rules/{id}/start"));
        assert!(json.contains("/api/v1/observer/report"));
    }

    #[test]
    fn test_default_bind_addr() {
        let config = ApiServerConfig::default();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:3080");
        assert!(config.enable_cors);
    }
}
