//! Gateway tests against an in-process mock of the node config API

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use fleetgate_gateway::{
    forward_service, relay_chain, report_observer, FailureCause, ForwardSpec, HttpConnector,
    LimiterConfig, NodeApi, NodeClient, NodeConnector, NodeEndpoint, Operation, ServiceState,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockNode {
    /// (collection, name) -> stored object
    resources: Mutex<BTreeMap<(String, String), Value>>,
    /// "METHOD path" of every request received
    calls: Mutex<Vec<String>>,
    auth_headers: Mutex<Vec<Option<String>>>,
    /// Collections whose POST answers 500
    failing_creates: Mutex<Vec<String>>,
    /// Collections whose lookups answer 500
    failing_lookups: Mutex<Vec<String>>,
    /// Collections whose missing entries answer 404 instead of null data
    not_found_style: Mutex<Vec<String>>,
}

impl MockNode {
    fn record(&self, line: String, headers: &HeaderMap) {
        self.calls.lock().unwrap().push(line);
        self.auth_headers.lock().unwrap().push(
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        );
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn insert(&self, collection: &str, value: Value) {
        let name = value["name"].as_str().unwrap().to_string();
        self.resources
            .lock()
            .unwrap()
            .insert((collection.to_string(), name), value);
    }
}

async fn full_config(State(node): State<Arc<MockNode>>, headers: HeaderMap) -> Json<Value> {
    node.record("GET /config".to_string(), &headers);
    let resources = node.resources.lock().unwrap();
    let mut config: HashMap<&str, Vec<Value>> = HashMap::new();
    for ((collection, _), value) in resources.iter() {
        config.entry(collection.as_str()).or_default().push(value.clone());
    }
    Json(json!({
        "services": config.get("services"),
        "chains": config.get("chains"),
        "observers": config.get("observers"),
        "limiters": config.get("limiters"),
    }))
}

async fn save_config(
    State(node): State<Arc<MockNode>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    let format = query.get("format").cloned().unwrap_or_default();
    node.record(format!("POST /config?format={}", format), &headers);
    Json(json!({"msg": "OK"}))
}

async fn create_resource(
    State(node): State<Arc<MockNode>>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    node.record(format!("POST /config/{}", collection), &headers);
    if node.failing_creates.lock().unwrap().contains(&collection) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"msg": "boom"})),
        );
    }
    node.insert(&collection, body);
    (StatusCode::OK, Json(json!({"msg": "OK"})))
}

async fn get_resource(
    State(node): State<Arc<MockNode>>,
    Path((collection, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    node.record(format!("GET /config/{}/{}", collection, name), &headers);
    if node.failing_lookups.lock().unwrap().contains(&collection) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"msg": "lookup broken"})),
        );
    }
    let found = node
        .resources
        .lock()
        .unwrap()
        .get(&(collection.clone(), name))
        .cloned();
    match found {
        Some(value) => (StatusCode::OK, Json(json!({"data": value}))),
        None if node.not_found_style.lock().unwrap().contains(&collection) => {
            (StatusCode::NOT_FOUND, Json(json!({"msg": "not found"})))
        }
        None => (StatusCode::OK, Json(json!({"data": null}))),
    }
}

async fn delete_resource(
    State(node): State<Arc<MockNode>>,
    Path((collection, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> StatusCode {
    node.record(format!("DELETE /config/{}/{}", collection, name), &headers);
    node.resources.lock().unwrap().remove(&(collection, name));
    StatusCode::OK
}

/// Spawn a mock node and return its state plus the endpoint pointing at it
async fn spawn_mock_node() -> (Arc<MockNode>, NodeEndpoint) {
    let node = Arc::new(MockNode::default());
    let app = Router::new()
        .route("/api/config", get(full_config).post(save_config))
        .route("/api/config/{collection}", post(create_resource))
        .route(
            "/api/config/{collection}/{name}",
            get(get_resource).delete(delete_resource),
        )
        .with_state(node.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (node, NodeEndpoint::new("127.0.0.1", addr.port()))
}

fn client(endpoint: &NodeEndpoint) -> NodeClient {
    NodeClient::new(endpoint, Duration::from_secs(5)).unwrap()
}

fn sample_service(name: &str) -> fleetgate_gateway::ServiceConfig {
    let targets = vec!["10.0.0.2:80".to_string(), "10.0.0.3:80".to_string()];
    forward_service(&ForwardSpec {
        name,
        protocol: "tcp",
        listen_port: 8080,
        targets: &targets,
        strategy: Some("round"),
        chain: None,
    })
}

#[tokio::test]
async fn test_probe_reachable_node() {
    let (node, endpoint) = spawn_mock_node().await;
    client(&endpoint).probe().await.expect("probe should succeed");
    assert_eq!(node.calls(), vec!["GET /config".to_string()]);
}

#[tokio::test]
async fn test_probe_unreachable_node_is_transport_error() {
    // Bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = client(&NodeEndpoint::new("127.0.0.1", port))
        .probe()
        .await
        .unwrap_err();
    assert_eq!(err.operation, Operation::Probe);
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_create_service_is_idempotent() {
    let (node, endpoint) = spawn_mock_node().await;
    let client = client(&endpoint);
    let service = sample_service("rule-1");

    client.create_service(&service).await.unwrap();
    client.create_service(&service).await.unwrap();

    assert_eq!(node.count("POST /config/services"), 1);
    assert_eq!(node.count("GET /config/services/rule-1"), 2);

    let stored = node
        .resources
        .lock()
        .unwrap()
        .get(&("services".to_string(), "rule-1".to_string()))
        .cloned()
        .unwrap();
    assert_eq!(stored["addr"], json!(":8080"));
    assert_eq!(stored["forwarder"]["nodes"][1]["name"], json!("target-1"));
    assert_eq!(
        stored["forwarder"]["selector"]["failTimeout"],
        json!(30_000_000_000u64)
    );
}

#[tokio::test]
async fn test_delete_absent_resource_skips_call() {
    let (node, endpoint) = spawn_mock_node().await;
    let client = client(&endpoint);

    client.delete_chain("tunnel-9-chain").await.unwrap();

    assert_eq!(node.count("DELETE"), 0);
    assert_eq!(node.count("GET /config/chains/tunnel-9-chain"), 1);
}

#[tokio::test]
async fn test_delete_present_resource() {
    let (node, endpoint) = spawn_mock_node().await;
    let client = client(&endpoint);

    client
        .create_chain(&relay_chain(9, "tcp", "203.0.113.5", 9000))
        .await
        .unwrap();
    client.delete_chain("tunnel-9-chain").await.unwrap();

    assert_eq!(node.count("DELETE /config/chains/tunnel-9-chain"), 1);
    assert!(node.resources.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_not_found_status_counts_as_absent() {
    let (node, endpoint) = spawn_mock_node().await;
    node.not_found_style
        .lock()
        .unwrap()
        .push("limiters".to_string());
    let client = client(&endpoint);

    let limiter = LimiterConfig {
        name: "limit-1".to_string(),
        limits: vec!["$ 100MB 100MB".to_string()],
        plugin: None,
    };
    client.create_limiter(&limiter).await.unwrap();
    assert_eq!(node.count("POST /config/limiters"), 1);

    client.delete_limiter("limit-1").await.unwrap();
    client.delete_limiter("limit-1").await.unwrap();
    assert_eq!(node.count("DELETE /config/limiters/limit-1"), 1);
}

#[tokio::test]
async fn test_failed_create_surfaces_status_and_resource() {
    let (node, endpoint) = spawn_mock_node().await;
    node.failing_creates
        .lock()
        .unwrap()
        .push("chains".to_string());

    let err = client(&endpoint)
        .create_chain(&relay_chain(4, "tcp", "203.0.113.5", 9000))
        .await
        .unwrap_err();

    assert_eq!(err.operation, Operation::Create);
    assert_eq!(err.resource, "chain tunnel-4-chain");
    match err.cause {
        FailureCause::Status { code, ref body } => {
            assert_eq!(code, 500);
            assert!(body.contains("boom"));
        }
        other => panic!("unexpected cause: {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_lookup_is_not_treated_as_absent() {
    let (node, endpoint) = spawn_mock_node().await;
    node.failing_lookups
        .lock()
        .unwrap()
        .push("services".to_string());

    let err = client(&endpoint).delete_service("rule-3").await.unwrap_err();

    assert_eq!(err.operation, Operation::Lookup);
    assert_eq!(node.count("DELETE"), 0);
}

#[tokio::test]
async fn test_fetch_config_and_service_states() {
    let (node, endpoint) = spawn_mock_node().await;
    node.insert(
        "services",
        json!({"name": "rule-1", "addr": ":8080", "status": {"state": "running"}}),
    );
    node.insert(
        "services",
        json!({"name": "tunnel-2-relay", "addr": ":9000", "status": {"state": "failed"}}),
    );
    node.insert(
        "observers",
        serde_json::to_value(report_observer("observer-a-1", "http://panel")).unwrap(),
    );

    let config = client(&endpoint).fetch_config().await.unwrap();

    assert_eq!(config.services.len(), 2);
    assert!(config.chains.is_empty());
    assert_eq!(config.observers.len(), 1);
    let states = config.service_states();
    assert_eq!(states["rule-1"], ServiceState::Running);
    assert_eq!(states["tunnel-2-relay"], ServiceState::Error);
}

#[tokio::test]
async fn test_save_config_requests_yaml() {
    let (node, endpoint) = spawn_mock_node().await;
    client(&endpoint).save_config().await.unwrap();
    assert_eq!(node.calls(), vec!["POST /config?format=yaml".to_string()]);
}

#[tokio::test]
async fn test_basic_auth_sent_through_connector() {
    let (node, endpoint) = spawn_mock_node().await;
    let endpoint =
        endpoint.with_credentials(Some("admin".to_string()), Some("secret".to_string()));

    let connector = HttpConnector::new(Duration::from_secs(5)).unwrap();
    connector.connect(&endpoint).probe().await.unwrap();

    let headers = node.auth_headers.lock().unwrap().clone();
    // base64("admin:secret")
    assert_eq!(headers, vec![Some("Basic YWRtaW46c2VjcmV0".to_string())]);
}

#[tokio::test]
async fn test_no_auth_header_without_password() {
    let (node, endpoint) = spawn_mock_node().await;
    let endpoint = endpoint.with_credentials(Some("admin".to_string()), None);

    client(&endpoint).probe().await.unwrap();

    assert_eq!(node.auth_headers.lock().unwrap().clone(), vec![None]);
}
