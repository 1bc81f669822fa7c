//! Integration tests for fleetgate-db
//!
//! Runs the schema against a real SQLite in-memory database

use chrono::Utc;
use fleetgate_db::{
    connect,
    entities::{
        node, rule, system_setting, tunnel, NodeStatus, Protocol, RuleKind, RunStatus, Strategy,
    },
    migrate,
};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, Set,
};

/// Helper to create a test database
async fn setup_test_db() -> sea_orm::DatabaseConnection {
    let db = connect("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory database");

    migrate(&db).await.expect("Failed to run migrations");

    db
}

async fn insert_node(db: &sea_orm::DatabaseConnection, name: &str) -> node::Model {
    let now = Utc::now();
    node::ActiveModel {
        name: Set(name.to_string()),
        address: Set("10.0.0.1".to_string()),
        port: Set(18080),
        username: Set(None),
        password: Set(None),
        status: Set(NodeStatus::Offline),
        total_bytes: Set(0),
        input_bytes: Set(0),
        output_bytes: Set(0),
        last_check_at: Set(None),
        remark: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to insert node")
}

fn forward_rule(node_id: i32, port: i32) -> rule::ActiveModel {
    let now = Utc::now();
    rule::ActiveModel {
        name: Set(format!("rule on {}", port)),
        rule_type: Set(RuleKind::Forward),
        node_id: Set(Some(node_id)),
        tunnel_id: Set(None),
        entry_node_id: Set(node_id),
        protocol: Set(Protocol::Tcp),
        listen_port: Set(port),
        targets: Set(r#"["10.0.0.2:80"]"#.to_string()),
        strategy: Set(Strategy::Round),
        enable_tls: Set(false),
        status: Set(RunStatus::Stopped),
        service_id: Set(None),
        observer_id: Set(None),
        input_bytes: Set(0),
        output_bytes: Set(0),
        total_bytes: Set(0),
        total_requests: Set(0),
        remark: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_database_connection() {
    let db = connect("sqlite::memory:").await.expect("Failed to connect");

    let backend = db.get_database_backend();
    assert!(matches!(backend, sea_orm::DatabaseBackend::Sqlite));
}

#[tokio::test]
async fn test_migrations_run_twice() {
    let db = setup_test_db().await;

    let result = migrate(&db).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_node_round_trips_status_enum() {
    let db = setup_test_db().await;
    let inserted = insert_node(&db, "edge-1").await;

    let mut active: node::ActiveModel = inserted.into();
    active.status = Set(NodeStatus::Online);
    active.last_check_at = Set(Some(Utc::now()));
    active.update(&db).await.expect("Failed to update");

    let online = node::Entity::find()
        .filter(node::Column::Status.eq(NodeStatus::Online))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(online, 1);
}

#[tokio::test]
async fn test_node_name_is_unique() {
    let db = setup_test_db().await;
    insert_node(&db, "edge-1").await;

    let now = Utc::now();
    let duplicate = node::ActiveModel {
        name: Set("edge-1".to_string()),
        address: Set("10.0.0.9".to_string()),
        port: Set(18080),
        username: Set(None),
        password: Set(None),
        status: Set(NodeStatus::Offline),
        total_bytes: Set(0),
        input_bytes: Set(0),
        output_bytes: Set(0),
        last_check_at: Set(None),
        remark: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&db)
    .await;

    assert!(duplicate.is_err());
}

#[tokio::test]
async fn test_listen_port_unique_per_entry_node() {
    let db = setup_test_db().await;
    let a = insert_node(&db, "edge-a").await;
    let b = insert_node(&db, "edge-b").await;

    forward_rule(a.id, 8080).insert(&db).await.expect("first rule");
    // Same port on another node is fine
    forward_rule(b.id, 8080).insert(&db).await.expect("other node");

    let clash = forward_rule(a.id, 8080).insert(&db).await;
    assert!(clash.is_err());
}

#[tokio::test]
async fn test_node_with_rules_cannot_be_deleted() {
    let db = setup_test_db().await;
    let a = insert_node(&db, "edge-a").await;
    let rule = forward_rule(a.id, 8080).insert(&db).await.expect("rule");

    let refused = node::Entity::delete_by_id(a.id).exec(&db).await;
    assert!(refused.is_err());

    // A rule cannot point at a node that does not exist
    assert!(forward_rule(a.id + 100, 8081).insert(&db).await.is_err());

    rule::Entity::delete_by_id(rule.id).exec(&db).await.unwrap();
    let removed = node::Entity::delete_by_id(a.id).exec(&db).await.unwrap();
    assert_eq!(removed.rows_affected, 1);
}

#[tokio::test]
async fn test_tunnel_insert_and_targeted_update() {
    let db = setup_test_db().await;
    let a = insert_node(&db, "entry").await;
    let b = insert_node(&db, "exit").await;

    let now = Utc::now();
    let inserted = tunnel::ActiveModel {
        name: Set("a-to-b".to_string()),
        entry_node_id: Set(a.id),
        exit_node_id: Set(b.id),
        protocol: Set(Protocol::Tcp),
        relay_port: Set(9000),
        status: Set(RunStatus::Stopped),
        service_id: Set(None),
        chain_id: Set(None),
        relay_addr: Set(None),
        remark: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&db)
    .await
    .expect("Failed to insert tunnel");

    let result = tunnel::Entity::update_many()
        .col_expr(tunnel::Column::Status, Expr::value(RunStatus::Running))
        .filter(tunnel::Column::Id.eq(inserted.id))
        .filter(tunnel::Column::Status.eq(RunStatus::Stopped))
        .exec(&db)
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 1);

    let found = tunnel::Entity::find_by_id(inserted.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.status, RunStatus::Running);
    assert_eq!(found.relay_port, 9000);
}

#[tokio::test]
async fn test_system_setting_by_key() {
    let db = setup_test_db().await;

    system_setting::ActiveModel {
        key: Set(system_setting::PANEL_URL.to_string()),
        value: Set("https://panel.example.com".to_string()),
        updated_at: Set(Utc::now()),
    }
    .insert(&db)
    .await
    .expect("Failed to insert setting");

    let found = system_setting::Entity::find_by_id(system_setting::PANEL_URL)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.value, "https://panel.example.com");
}
