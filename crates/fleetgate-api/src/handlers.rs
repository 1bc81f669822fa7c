use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use fleetgate_control::model::{
    NodeFilter, NodeStatus, Page, RuleFilter, RuleKind, RunStatus, TunnelFilter,
};
use fleetgate_control::{Compensation, ControlError, ErrorClass, ObserverReport};
use fleetgate_db::entities::system_setting::PANEL_URL;
use fleetgate_gateway::RemoteConfig;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::extract::RequestActor;
use crate::models::*;
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Validation => StatusCode::BAD_REQUEST,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Conflict => StatusCode::CONFLICT,
        ErrorClass::Remote => StatusCode::BAD_GATEWAY,
        ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: ControlError) -> ApiError {
    let status = status_for(err.class());
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
            cleanup: Vec::new(),
        }),
    )
}

/// Error of a start/stop, carrying the cleanup it performed
fn transition_error(err: ControlError, compensation: &Compensation) -> ApiError {
    let (status, Json(mut body)) = api_error(err);
    body.cleanup = compensation.attempts().iter().map(Into::into).collect();
    (status, Json(body))
}

fn page_of(query: &ListQuery) -> Page {
    Page::new(query.page, query.page_size)
}

fn keyword_of(query: &ListQuery) -> Option<String> {
    query
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

fn parse_node_status(value: &str) -> Result<NodeStatus, ControlError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "online" => Ok(NodeStatus::Online),
        "offline" => Ok(NodeStatus::Offline),
        "error" => Ok(NodeStatus::Error),
        other => Err(ControlError::validation(format!(
            "unknown node status '{}'",
            other
        ))),
    }
}

fn parse_run_status(value: &str) -> Result<RunStatus, ControlError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "running" => Ok(RunStatus::Running),
        "stopped" => Ok(RunStatus::Stopped),
        "error" => Ok(RunStatus::Error),
        other => Err(ControlError::validation(format!("unknown status '{}'", other))),
    }
}

fn parse_rule_kind(value: &str) -> Result<RuleKind, ControlError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "forward" => Ok(RuleKind::Forward),
        "tunnel" => Ok(RuleKind::Tunnel),
        other => Err(ControlError::validation(format!(
            "unknown rule type '{}'",
            other
        ))),
    }
}

/// Absolute http(s) URL with trailing slashes removed
pub(crate) fn normalize_panel_url(raw: &str) -> Result<String, ControlError> {
    let url = raw.trim().trim_end_matches('/');
    let host = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| ControlError::validation("panel_url must start with http:// or https://"))?;
    if host.is_empty() || host.starts_with('/') || host.contains(char::is_whitespace) {
        return Err(ControlError::validation(format!(
            "panel_url '{}' has no valid host",
            raw.trim()
        )));
    }
    Ok(url.to_string())
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Receive traffic stats pushed by a node observer
#[utoipa::path(
    post,
    path = "/api/v1/observer/report",
    request_body(content = Object, description = "Observer events: { events: [{ kind, service, type, stats }] }"),
    responses(
        (status = 200, description = "Report accepted", body = ObserverAck)
    ),
    tag = "observer"
)]
pub async fn observer_report(
    State(state): State<Arc<AppState>>,
    Json(report): Json<ObserverReport>,
) -> Json<ObserverAck> {
    let summary = state.fleet.ingestor().ingest(&report).await;
    debug!(
        applied = summary.applied,
        skipped = summary.skipped,
        failed = summary.failed,
        "Observer report ingested"
    );
    Json(summary.into())
}

// ============================================================================
// Nodes
// ============================================================================

/// List nodes
#[utoipa::path(
    get,
    path = "/api/v1/nodes",
    params(ListQuery),
    responses(
        (status = 200, description = "Page of nodes", body = NodeList),
        (status = 400, description = "Invalid filter", body = ErrorResponse)
    ),
    tag = "nodes"
)]
pub async fn list_nodes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<NodeList> {
    let filter = NodeFilter {
        status: query
            .status
            .as_deref()
            .map(parse_node_status)
            .transpose()
            .map_err(api_error)?,
        keyword: keyword_of(&query),
    };

    let page = state
        .fleet
        .nodes()
        .list(&filter, page_of(&query))
        .await
        .map_err(api_error)?;
    Ok(Json(page.into()))
}

/// Register a node
#[utoipa::path(
    post,
    path = "/api/v1/nodes",
    request_body = NodeRequest,
    responses(
        (status = 201, description = "Node registered", body = NodeResponse),
        (status = 400, description = "Invalid node", body = ErrorResponse),
        (status = 409, description = "Name already taken", body = ErrorResponse)
    ),
    tag = "nodes"
)]
pub async fn create_node(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Json(req): Json<NodeRequest>,
) -> Result<(StatusCode, Json<NodeResponse>), ApiError> {
    let node = state
        .fleet
        .nodes()
        .create(req.into(), &actor)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(node.into())))
}

/// Get a node
#[utoipa::path(
    get,
    path = "/api/v1/nodes/{id}",
    params(("id" = i32, Path, description = "Node ID")),
    responses(
        (status = 200, description = "Node", body = NodeResponse),
        (status = 404, description = "Node not found", body = ErrorResponse)
    ),
    tag = "nodes"
)]
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> ApiResult<NodeResponse> {
    let node = state.fleet.nodes().get(id).await.map_err(api_error)?;
    Ok(Json(node.into()))
}

/// Replace a node's settings
#[utoipa::path(
    put,
    path = "/api/v1/nodes/{id}",
    params(("id" = i32, Path, description = "Node ID")),
    request_body = NodeRequest,
    responses(
        (status = 200, description = "Node updated", body = NodeResponse),
        (status = 400, description = "Invalid node", body = ErrorResponse),
        (status = 404, description = "Node not found", body = ErrorResponse),
        (status = 409, description = "Name already taken", body = ErrorResponse)
    ),
    tag = "nodes"
)]
pub async fn update_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    RequestActor(actor): RequestActor,
    Json(req): Json<NodeRequest>,
) -> ApiResult<NodeResponse> {
    let node = state
        .fleet
        .nodes()
        .update(id, req.into(), &actor)
        .await
        .map_err(api_error)?;
    Ok(Json(node.into()))
}

/// Remove a node no rule or tunnel references
#[utoipa::path(
    delete,
    path = "/api/v1/nodes/{id}",
    params(("id" = i32, Path, description = "Node ID")),
    responses(
        (status = 204, description = "Node removed"),
        (status = 404, description = "Node not found", body = ErrorResponse),
        (status = 409, description = "Node still referenced", body = ErrorResponse)
    ),
    tag = "nodes"
)]
pub async fn delete_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    RequestActor(actor): RequestActor,
) -> Result<StatusCode, ApiError> {
    state
        .fleet
        .nodes()
        .delete(id, &actor)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Live configuration reported by the node
#[utoipa::path(
    get,
    path = "/api/v1/nodes/{id}/config",
    params(("id" = i32, Path, description = "Node ID")),
    responses(
        (status = 200, description = "Services, chains, observers and limiters", body = Object),
        (status = 404, description = "Node not found", body = ErrorResponse),
        (status = 409, description = "Node has no usable address", body = ErrorResponse),
        (status = 502, description = "Node unreachable", body = ErrorResponse)
    ),
    tag = "nodes"
)]
pub async fn get_node_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> ApiResult<RemoteConfig> {
    let config = state
        .fleet
        .nodes()
        .fetch_config(id)
        .await
        .map_err(api_error)?;
    Ok(Json(config))
}

/// Node counts by status
#[utoipa::path(
    get,
    path = "/api/v1/nodes/stats",
    responses((status = 200, description = "Node counts", body = NodeStatsResponse)),
    tag = "nodes"
)]
pub async fn node_stats(State(state): State<Arc<AppState>>) -> ApiResult<NodeStatsResponse> {
    let stats = state.fleet.stats().nodes().await.map_err(api_error)?;
    Ok(Json(stats.into()))
}

// ============================================================================
// Rules
// ============================================================================

/// List rules
#[utoipa::path(
    get,
    path = "/api/v1/rules",
    params(ListQuery),
    responses(
        (status = 200, description = "Page of rules", body = RuleList),
        (status = 400, description = "Invalid filter", body = ErrorResponse)
    ),
    tag = "rules"
)]
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<RuleList> {
    let filter = RuleFilter {
        status: query
            .status
            .as_deref()
            .map(parse_run_status)
            .transpose()
            .map_err(api_error)?,
        kind: query
            .kind
            .as_deref()
            .map(parse_rule_kind)
            .transpose()
            .map_err(api_error)?,
        node_id: query.node_id,
        tunnel_id: query.tunnel_id,
        keyword: keyword_of(&query),
    };

    let page = state
        .fleet
        .rules()
        .list(&filter, page_of(&query))
        .await
        .map_err(api_error)?;
    Ok(Json(page.into()))
}

/// Create a rule
#[utoipa::path(
    post,
    path = "/api/v1/rules",
    request_body = CreateRuleRequest,
    responses(
        (status = 201, description = "Rule created, stopped", body = RuleResponse),
        (status = 400, description = "Invalid rule", body = ErrorResponse),
        (status = 404, description = "Node or tunnel not found", body = ErrorResponse),
        (status = 409, description = "Port already in use", body = ErrorResponse)
    ),
    tag = "rules"
)]
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Json(req): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<RuleResponse>), ApiError> {
    let rule = state
        .fleet
        .rules()
        .create(req.into(), &actor)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(rule.into())))
}

/// Get a rule
#[utoipa::path(
    get,
    path = "/api/v1/rules/{id}",
    params(("id" = i32, Path, description = "Rule ID")),
    responses(
        (status = 200, description = "Rule", body = RuleResponse),
        (status = 404, description = "Rule not found", body = ErrorResponse)
    ),
    tag = "rules"
)]
pub async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> ApiResult<RuleResponse> {
    let rule = state.fleet.rules().get(id).await.map_err(api_error)?;
    Ok(Json(rule.into()))
}

/// Modify a stopped rule
#[utoipa::path(
    put,
    path = "/api/v1/rules/{id}",
    params(("id" = i32, Path, description = "Rule ID")),
    request_body = UpdateRuleRequest,
    responses(
        (status = 200, description = "Rule updated", body = RuleResponse),
        (status = 400, description = "Invalid rule", body = ErrorResponse),
        (status = 404, description = "Rule not found", body = ErrorResponse),
        (status = 409, description = "Rule running or port in use", body = ErrorResponse)
    ),
    tag = "rules"
)]
pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    RequestActor(actor): RequestActor,
    Json(req): Json<UpdateRuleRequest>,
) -> ApiResult<RuleResponse> {
    let rule = state
        .fleet
        .rules()
        .update(id, req.into(), &actor)
        .await
        .map_err(api_error)?;
    Ok(Json(rule.into()))
}

/// Delete a rule, stopping it first when needed
#[utoipa::path(
    delete,
    path = "/api/v1/rules/{id}",
    params(("id" = i32, Path, description = "Rule ID")),
    responses(
        (status = 204, description = "Rule deleted"),
        (status = 404, description = "Rule not found", body = ErrorResponse)
    ),
    tag = "rules"
)]
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    RequestActor(actor): RequestActor,
) -> Result<StatusCode, ApiError> {
    state
        .fleet
        .rules()
        .delete(id, &actor)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Provision a rule on its entry node
#[utoipa::path(
    post,
    path = "/api/v1/rules/{id}/start",
    params(("id" = i32, Path, description = "Rule ID")),
    responses(
        (status = 200, description = "Rule running", body = RuleResponse),
        (status = 404, description = "Rule not found", body = ErrorResponse),
        (status = 409, description = "Node offline, tunnel unavailable or panel url missing", body = ErrorResponse),
        (status = 502, description = "Remote provisioning failed", body = ErrorResponse)
    ),
    tag = "rules"
)]
pub async fn start_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    RequestActor(actor): RequestActor,
) -> ApiResult<RuleResponse> {
    info!(rule_id = id, actor = %actor.name, "Starting rule");
    let transition = state.fleet.rules().start(id, &actor).await;
    match transition.result {
        Ok(rule) => Ok(Json(rule.into())),
        Err(e) => Err(transition_error(e, &transition.compensation)),
    }
}

/// Remove a rule's service from its node
#[utoipa::path(
    post,
    path = "/api/v1/rules/{id}/stop",
    params(("id" = i32, Path, description = "Rule ID")),
    responses(
        (status = 200, description = "Rule stopped", body = RuleResponse),
        (status = 404, description = "Rule not found", body = ErrorResponse)
    ),
    tag = "rules"
)]
pub async fn stop_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    RequestActor(actor): RequestActor,
) -> ApiResult<RuleResponse> {
    info!(rule_id = id, actor = %actor.name, "Stopping rule");
    let transition = state.fleet.rules().stop(id, &actor).await;
    for attempt in transition.compensation.attempts() {
        if !attempt.succeeded() {
            warn!(rule_id = id, node_id = attempt.node_id, "Leftover {:?}", attempt.action);
        }
    }
    match transition.result {
        Ok(rule) => Ok(Json(rule.into())),
        Err(e) => Err(transition_error(e, &transition.compensation)),
    }
}

/// Rule counts by status and type
#[utoipa::path(
    get,
    path = "/api/v1/rules/stats",
    responses((status = 200, description = "Rule counts", body = RuleStatsResponse)),
    tag = "rules"
)]
pub async fn rule_stats(State(state): State<Arc<AppState>>) -> ApiResult<RuleStatsResponse> {
    let stats = state.fleet.stats().rules().await.map_err(api_error)?;
    Ok(Json(stats.into()))
}

// ============================================================================
// Tunnels
// ============================================================================

/// List tunnels
#[utoipa::path(
    get,
    path = "/api/v1/tunnels",
    params(ListQuery),
    responses(
        (status = 200, description = "Page of tunnels", body = TunnelList),
        (status = 400, description = "Invalid filter", body = ErrorResponse)
    ),
    tag = "tunnels"
)]
pub async fn list_tunnels(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<TunnelList> {
    let filter = TunnelFilter {
        status: query
            .status
            .as_deref()
            .map(parse_run_status)
            .transpose()
            .map_err(api_error)?,
        node_id: query.node_id,
        keyword: keyword_of(&query),
    };

    let page = state
        .fleet
        .tunnels()
        .list(&filter, page_of(&query))
        .await
        .map_err(api_error)?;
    Ok(Json(page.into()))
}

/// Create a tunnel
#[utoipa::path(
    post,
    path = "/api/v1/tunnels",
    request_body = CreateTunnelRequest,
    responses(
        (status = 201, description = "Tunnel created, stopped", body = TunnelResponse),
        (status = 400, description = "Invalid tunnel", body = ErrorResponse),
        (status = 404, description = "Node not found", body = ErrorResponse)
    ),
    tag = "tunnels"
)]
pub async fn create_tunnel(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Json(req): Json<CreateTunnelRequest>,
) -> Result<(StatusCode, Json<TunnelResponse>), ApiError> {
    let tunnel = state
        .fleet
        .tunnels()
        .create(req.into(), &actor)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(tunnel.into())))
}

/// Get a tunnel
#[utoipa::path(
    get,
    path = "/api/v1/tunnels/{id}",
    params(("id" = i32, Path, description = "Tunnel ID")),
    responses(
        (status = 200, description = "Tunnel", body = TunnelResponse),
        (status = 404, description = "Tunnel not found", body = ErrorResponse)
    ),
    tag = "tunnels"
)]
pub async fn get_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> ApiResult<TunnelResponse> {
    let tunnel = state.fleet.tunnels().get(id).await.map_err(api_error)?;
    Ok(Json(tunnel.into()))
}

/// Modify a stopped tunnel
#[utoipa::path(
    put,
    path = "/api/v1/tunnels/{id}",
    params(("id" = i32, Path, description = "Tunnel ID")),
    request_body = UpdateTunnelRequest,
    responses(
        (status = 200, description = "Tunnel updated", body = TunnelResponse),
        (status = 400, description = "Invalid tunnel", body = ErrorResponse),
        (status = 404, description = "Tunnel not found", body = ErrorResponse),
        (status = 409, description = "Tunnel running", body = ErrorResponse)
    ),
    tag = "tunnels"
)]
pub async fn update_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    RequestActor(actor): RequestActor,
    Json(req): Json<UpdateTunnelRequest>,
) -> ApiResult<TunnelResponse> {
    let tunnel = state
        .fleet
        .tunnels()
        .update(id, req.into(), &actor)
        .await
        .map_err(api_error)?;
    Ok(Json(tunnel.into()))
}

/// Delete a tunnel no rule references
#[utoipa::path(
    delete,
    path = "/api/v1/tunnels/{id}",
    params(("id" = i32, Path, description = "Tunnel ID")),
    responses(
        (status = 204, description = "Tunnel deleted"),
        (status = 404, description = "Tunnel not found", body = ErrorResponse),
        (status = 409, description = "Tunnel still referenced by rules", body = ErrorResponse)
    ),
    tag = "tunnels"
)]
pub async fn delete_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    RequestActor(actor): RequestActor,
) -> Result<StatusCode, ApiError> {
    state
        .fleet
        .tunnels()
        .delete(id, &actor)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Provision relay and chain of a tunnel
#[utoipa::path(
    post,
    path = "/api/v1/tunnels/{id}/start",
    params(("id" = i32, Path, description = "Tunnel ID")),
    responses(
        (status = 200, description = "Tunnel running", body = TunnelResponse),
        (status = 404, description = "Tunnel not found", body = ErrorResponse),
        (status = 409, description = "Entry or exit node offline", body = ErrorResponse),
        (status = 502, description = "Remote provisioning failed", body = ErrorResponse)
    ),
    tag = "tunnels"
)]
pub async fn start_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    RequestActor(actor): RequestActor,
) -> ApiResult<TunnelResponse> {
    info!(tunnel_id = id, actor = %actor.name, "Starting tunnel");
    let transition = state.fleet.tunnels().start(id, &actor).await;
    match transition.result {
        Ok(tunnel) => Ok(Json(tunnel.into())),
        Err(e) => Err(transition_error(e, &transition.compensation)),
    }
}

/// Tear a tunnel down
#[utoipa::path(
    post,
    path = "/api/v1/tunnels/{id}/stop",
    params(("id" = i32, Path, description = "Tunnel ID")),
    responses(
        (status = 200, description = "Tunnel stopped", body = TunnelResponse),
        (status = 404, description = "Tunnel not found", body = ErrorResponse)
    ),
    tag = "tunnels"
)]
pub async fn stop_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    RequestActor(actor): RequestActor,
) -> ApiResult<TunnelResponse> {
    info!(tunnel_id = id, actor = %actor.name, "Stopping tunnel");
    let transition = state.fleet.tunnels().stop(id, &actor).await;
    match transition.result {
        Ok(tunnel) => Ok(Json(tunnel.into())),
        Err(e) => Err(transition_error(e, &transition.compensation)),
    }
}

/// Tunnel counts by status
#[utoipa::path(
    get,
    path = "/api/v1/tunnels/stats",
    responses((status = 200, description = "Tunnel counts", body = TunnelStatsResponse)),
    tag = "tunnels"
)]
pub async fn tunnel_stats(State(state): State<Arc<AppState>>) -> ApiResult<TunnelStatsResponse> {
    let stats = state.fleet.stats().tunnels().await.map_err(api_error)?;
    Ok(Json(stats.into()))
}

// ============================================================================
// Dashboard and settings
// ============================================================================

/// Aggregated counts for the dashboard
#[utoipa::path(
    get,
    path = "/api/v1/dashboard/stats",
    responses((status = 200, description = "Fleet overview", body = DashboardResponse)),
    tag = "system"
)]
pub async fn dashboard_stats(State(state): State<Arc<AppState>>) -> ApiResult<DashboardResponse> {
    let stats = state.fleet.stats().dashboard().await.map_err(api_error)?;
    Ok(Json(stats.into()))
}

/// Current system settings
#[utoipa::path(
    get,
    path = "/api/v1/system/config",
    responses((status = 200, description = "System settings", body = SystemConfig)),
    tag = "system"
)]
pub async fn get_system_config(State(state): State<Arc<AppState>>) -> ApiResult<SystemConfig> {
    let panel_url = state
        .fleet
        .stores
        .settings
        .get(PANEL_URL)
        .await
        .map_err(|e| api_error(e.into()))?;
    Ok(Json(SystemConfig { panel_url }))
}

/// Change the panel URL nodes report traffic to
#[utoipa::path(
    put,
    path = "/api/v1/system/config",
    request_body = UpdateSystemConfigRequest,
    responses(
        (status = 200, description = "Settings saved", body = SystemConfig),
        (status = 400, description = "Invalid panel url", body = ErrorResponse)
    ),
    tag = "system"
)]
pub async fn update_system_config(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Json(req): Json<UpdateSystemConfigRequest>,
) -> ApiResult<SystemConfig> {
    let panel_url = normalize_panel_url(&req.panel_url).map_err(api_error)?;
    state
        .fleet
        .stores
        .settings
        .set(PANEL_URL, &panel_url)
        .await
        .map_err(|e| api_error(e.into()))?;

    info!(actor = %actor.name, "Panel url set to {}", panel_url);
    Ok(Json(SystemConfig {
        panel_url: Some(panel_url),
    }))
}
