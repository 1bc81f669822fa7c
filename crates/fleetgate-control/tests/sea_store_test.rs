//! sea-orm store against an in-memory SQLite database

mod common;

use chrono::Utc;
use common::FakeFleet;
use fleetgate_control::model::{
    NewNode, NewRule, NewTunnel, NodeFilter, NodeStatus, Page, Protocol, RuleChanges, RuleEntry,
    RuleFilter, RuleKind, RunStatus, Strategy, TrafficSample, TunnelFilter,
};
use fleetgate_control::{
    Actor, ControlConfig, Fleet, StoreError, Stores, TracingAuditSink,
};
use fleetgate_db::entities::system_setting::PANEL_URL;
use std::sync::Arc;

async fn stores() -> Stores {
    let db = fleetgate_db::connect("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory database");
    fleetgate_db::migrate(&db)
        .await
        .expect("Failed to run migrations");
    Stores::sea(db)
}

fn new_node(name: &str, address: &str) -> NewNode {
    NewNode {
        name: name.to_string(),
        address: address.to_string(),
        port: 18080,
        username: Some("admin".to_string()),
        password: Some("secret".to_string()),
        remark: None,
    }
}

fn new_rule(node_id: i32, port: u16) -> NewRule {
    NewRule {
        name: format!("rule-{}", port),
        entry: RuleEntry::Forward { node_id },
        entry_node_id: node_id,
        protocol: Protocol::Udp,
        listen_port: port,
        targets: vec!["10.1.0.1:53".to_string(), "10.1.0.2:53".to_string()],
        strategy: Strategy::Hash,
        enable_tls: false,
        remark: Some("dns".to_string()),
    }
}

#[tokio::test]
async fn test_node_roundtrip_and_listing() {
    let stores = stores().await;
    for i in 0..3 {
        stores
            .nodes
            .insert(&new_node(&format!("edge-{}", i), &format!("10.0.0.{}", i)))
            .await
            .unwrap();
    }
    stores.nodes.insert(&new_node("core", "10.9.0.1")).await.unwrap();

    let err = stores
        .nodes
        .insert(&new_node("core", "10.9.0.2"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));

    let page = stores
        .nodes
        .list(
            &NodeFilter {
                keyword: Some("edge".to_string()),
                ..Default::default()
            },
            Page::new(Some(1), Some(2)),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].name, "edge-2");

    let node = stores.nodes.find_by_name("core").await.unwrap().unwrap();
    assert_eq!(node.status, NodeStatus::Offline);
    assert_eq!(node.password.as_deref(), Some("secret"));

    let checked_at = Utc::now();
    stores
        .nodes
        .record_probe(node.id, NodeStatus::Online, checked_at)
        .await
        .unwrap();
    let node = stores.nodes.get(node.id).await.unwrap().unwrap();
    assert_eq!(node.status, NodeStatus::Online);
    assert!(node.last_check_at.is_some());
    assert_eq!(stores.nodes.count(Some(NodeStatus::Online)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_rule_roundtrip_and_port_uniqueness() {
    let stores = stores().await;
    let node = stores.nodes.insert(&new_node("edge", "10.0.0.1")).await.unwrap();

    let rule = stores.rules.insert(&new_rule(node.id, 5353)).await.unwrap();
    assert_eq!(rule.status, RunStatus::Stopped);

    let loaded = stores.rules.get(rule.id).await.unwrap().unwrap();
    assert_eq!(loaded.targets, vec!["10.1.0.1:53", "10.1.0.2:53"]);
    assert_eq!(loaded.strategy, Strategy::Hash);
    assert_eq!(loaded.entry, RuleEntry::Forward { node_id: node.id });

    let err = stores
        .rules
        .insert(&new_rule(node.id, 5353))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
    assert!(stores.rules.port_in_use(node.id, 5353, None).await.unwrap());
    assert!(!stores
        .rules
        .port_in_use(node.id, 5353, Some(rule.id))
        .await
        .unwrap());

    let updated = stores
        .rules
        .update(
            rule.id,
            &RuleChanges {
                name: "dns".to_string(),
                protocol: Protocol::Tcp,
                listen_port: 5354,
                targets: vec!["10.1.0.3:53".to_string()],
                strategy: Strategy::Fifo,
                enable_tls: true,
                remark: None,
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.listen_port, 5354);
    assert_eq!(updated.targets, vec!["10.1.0.3:53"]);
    assert!(updated.enable_tls);

    let page = stores
        .rules
        .list(
            &RuleFilter {
                kind: Some(RuleKind::Forward),
                node_id: Some(node.id),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_status_updates() {
    let stores = stores().await;
    let a = stores.nodes.insert(&new_node("a", "10.0.0.1")).await.unwrap();
    let b = stores.nodes.insert(&new_node("b", "10.0.0.2")).await.unwrap();
    let rule = stores.rules.insert(&new_rule(a.id, 5353)).await.unwrap();
    let tunnel = stores
        .tunnels
        .insert(&NewTunnel {
            name: "t1".to_string(),
            entry_node_id: a.id,
            exit_node_id: b.id,
            protocol: Protocol::Tcp,
            relay_port: 9000,
            remark: None,
        })
        .await
        .unwrap();

    assert!(!stores
        .rules
        .set_status_if(rule.id, RunStatus::Running, RunStatus::Error)
        .await
        .unwrap());
    stores
        .rules
        .record_started(rule.id, "rule-1", Some("observer-a-1"))
        .await
        .unwrap();
    stores
        .tunnels
        .record_started(tunnel.id, "tunnel-1-relay", "tunnel-1-chain")
        .await
        .unwrap();

    let rule = stores.rules.get(rule.id).await.unwrap().unwrap();
    assert_eq!(rule.status, RunStatus::Running);
    assert_eq!(rule.observer_id.as_deref(), Some("observer-a-1"));

    // Exit node going away stops the tunnel but not rules on the entry node
    assert_eq!(stores.rules.stop_running_on_node(b.id).await.unwrap(), 0);
    assert_eq!(stores.tunnels.stop_running_on_node(b.id).await.unwrap(), 1);
    assert_eq!(stores.rules.stop_running_on_node(a.id).await.unwrap(), 1);

    let tunnel = stores.tunnels.get(tunnel.id).await.unwrap().unwrap();
    assert_eq!(tunnel.status, RunStatus::Stopped);
    assert_eq!(tunnel.chain_id.as_deref(), Some("tunnel-1-chain"));

    let page = stores
        .tunnels
        .list(
            &TunnelFilter {
                node_id: Some(b.id),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(stores.tunnels.count_by_node(a.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_referenced_rows_cannot_be_deleted() {
    let stores = stores().await;
    let a = stores.nodes.insert(&new_node("a", "10.0.0.1")).await.unwrap();
    let b = stores.nodes.insert(&new_node("b", "10.0.0.2")).await.unwrap();
    let tunnel = stores
        .tunnels
        .insert(&NewTunnel {
            name: "t1".to_string(),
            entry_node_id: a.id,
            exit_node_id: b.id,
            protocol: Protocol::Tcp,
            relay_port: 9000,
            remark: None,
        })
        .await
        .unwrap();
    let rule = stores
        .rules
        .insert(&NewRule {
            entry: RuleEntry::Tunnel {
                tunnel_id: tunnel.id,
            },
            ..new_rule(a.id, 8080)
        })
        .await
        .unwrap();

    let err = stores.tunnels.delete(tunnel.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Referenced(_)));
    let err = stores.nodes.delete(b.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Referenced(_)));
    let err = stores.rules.insert(&new_rule(999, 8081)).await.unwrap_err();
    assert!(matches!(err, StoreError::Referenced(_)));

    assert!(stores.rules.delete(rule.id).await.unwrap());
    assert!(stores.tunnels.delete(tunnel.id).await.unwrap());
    assert!(stores.nodes.delete(b.id).await.unwrap());
}

#[tokio::test]
async fn test_traffic_and_settings() {
    let stores = stores().await;
    let node = stores.nodes.insert(&new_node("edge", "10.0.0.1")).await.unwrap();
    let rule = stores.rules.insert(&new_rule(node.id, 5353)).await.unwrap();

    let sample = TrafficSample {
        input_bytes: 100,
        output_bytes: 50,
        requests: 7,
    };
    assert!(stores.rules.update_traffic(rule.id, sample).await.unwrap());
    assert!(!stores.rules.update_traffic(999, sample).await.unwrap());

    let rule = stores.rules.get(rule.id).await.unwrap().unwrap();
    assert_eq!(rule.traffic.total_bytes, 150);
    assert_eq!(rule.traffic.total_requests, 7);

    assert_eq!(stores.settings.get(PANEL_URL).await.unwrap(), None);
    stores
        .settings
        .set(PANEL_URL, "http://panel.local")
        .await
        .unwrap();
    stores
        .settings
        .set(PANEL_URL, "https://panel.example.com")
        .await
        .unwrap();
    assert_eq!(
        stores.settings.get(PANEL_URL).await.unwrap().as_deref(),
        Some("https://panel.example.com")
    );
}

#[tokio::test]
async fn test_orchestration_over_sea_store() {
    let stores = stores().await;
    let remote = Arc::new(FakeFleet::default());
    let fleet = Fleet::new(
        stores.clone(),
        remote.clone(),
        Arc::new(TracingAuditSink),
        ControlConfig::default(),
    );
    let actor = Actor::new("tester");
    stores
        .settings
        .set(PANEL_URL, "http://panel.local")
        .await
        .unwrap();

    let node = stores.nodes.insert(&new_node("edge", "10.0.0.1")).await.unwrap();
    fleet.prober().run_cycle().await;
    assert_eq!(
        stores.nodes.get(node.id).await.unwrap().unwrap().status,
        NodeStatus::Online
    );

    let rule = fleet
        .rules()
        .create(common::forward_draft("web", node.id, 8080, &["10.1.0.1:80"]), &actor)
        .await
        .unwrap();
    let rule = fleet.rules().start(rule.id, &actor).await.into_result().unwrap();
    assert_eq!(rule.service_id.as_deref(), Some("rule-1"));

    remote.node("10.0.0.1").set_state("rule-1", "failed");
    let report = fleet.reconciler().run_cycle().await;
    assert_eq!(report.rules_changed, 1);
    assert_eq!(
        fleet.rules().get(rule.id).await.unwrap().status,
        RunStatus::Error
    );
}
