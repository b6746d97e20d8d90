//! End-to-end tests through the HTTP router
//!
//! Each test builds an agent around a fake appliance, sends requests with
//! `tower::ServiceExt::oneshot` and checks both the response and what was
//! committed.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use vyagent_common::BootstrapConfig;
use vyagent_config::ConfigPath;
use vyagent_test::{fake_sysfs, requests, two_nic_appliance, FakeDevice, MockRunner, ScriptVerifier};
use vyagentd::{build_registry, router, AgentContext, ConfigGuard};

struct Appliance {
    device: Arc<FakeDevice>,
    router: Router,
    _sysfs: TempDir,
    _lock_dir: TempDir,
}

fn appliance(config: String) -> Appliance {
    let device = Arc::new(FakeDevice::new(config));
    appliance_with(device)
}

fn appliance_with(device: Arc<FakeDevice>) -> Appliance {
    let runner = Arc::new(
        MockRunner::new()
            .with_nic_address("eth1", "172.16.0.1/24")
            .respond("show ip route", "S>* 10.1.0.0/24 [1/0] unreachable (blackhole)"),
    );
    let sysfs = fake_sysfs(&[("eth0", "52:54:00:00:00:01"), ("eth1", "52:54:00:00:00:02")]);
    let lock_dir = tempfile::tempdir().unwrap();
    let guard = ConfigGuard::new(lock_dir.path().join("vyos.lock"));

    let agent = AgentContext::new(BootstrapConfig::default(), runner)
        .with_source(device.clone())
        .with_applier(device.clone())
        .with_guard(guard.clone())
        .with_sys_net_root(sysfs.path());
    let registry = Arc::new(build_registry(&guard));

    Appliance {
        device,
        router: router(registry, Arc::new(agent)),
        _sysfs: sysfs,
        _lock_dir: lock_dir,
    }
}

async fn post(router: &Router, path: &str, body: impl Into<String>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn p(text: &str) -> ConfigPath {
    ConfigPath::parse(text).unwrap()
}

#[tokio::test]
async fn test_remove_dns_server() {
    let config = two_nic_appliance()
        .with_name_server("8.8.8.8")
        .with_name_server("1.1.1.1")
        .build();
    let app = appliance(config);

    let (status, _) = post(&app.router, "/removedns", requests::dns(&["8.8.8.8"], &[]).to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let txs = app.device.transactions();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].lines(), vec!["delete service dns forwarding name-server 8.8.8.8"]);
    let tree = app.device.tree();
    assert!(!tree.has(&p("service dns forwarding name-server 8.8.8.8")));
    assert!(tree.has(&p("service dns forwarding name-server 1.1.1.1")));
}

#[tokio::test]
async fn test_add_blackhole_route() {
    let app = appliance(two_nic_appliance().build());

    let (status, _) = post(
        &app.router,
        "/addroutes",
        requests::routes(&[("10.1.0.0/24", "", 1)]).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let txs = app.device.transactions();
    ScriptVerifier::for_transaction(&txs[0])
        .assert_line("set protocols static route 10.1.0.0/24 blackhole distance 1")
        .unwrap()
        .assert_count("set ", 1)
        .unwrap();
    assert!(app
        .device
        .tree()
        .has(&p("protocols static route 10.1.0.0/24 blackhole distance 1")));
}

#[tokio::test]
async fn test_set_dns_end_to_end() {
    let app = appliance(two_nic_appliance().build());

    let body = requests::dns(&["8.8.8.8", "1.1.1.1"], &["52:54:00:00:00:02"]);
    let (status, _) = post(&app.router, "/setdns", body.to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let txs = app.device.transactions();
    ScriptVerifier::for_transaction(&txs[0])
        .assert_order(
            "set service dns forwarding name-server 8.8.8.8",
            "set service dns forwarding name-server 1.1.1.1",
        )
        .unwrap()
        .assert_line("set service dns forwarding listen-address 172.16.0.1")
        .unwrap()
        .assert_line("set interfaces ethernet eth1 firewall local name eth1.local")
        .unwrap();
}

#[tokio::test]
async fn test_malformed_json_is_rejected_without_commit() {
    let app = appliance(two_nic_appliance().build());

    let (status, body) = post(&app.router, "/setdns", r#"{"dns": ["#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!(400));

    let (status, _) = post(&app.router, "/addroutes", r#"{"routes": "10.1.0.0/24"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(app.device.commit_count(), 0);
}

#[tokio::test]
async fn test_empty_body_is_an_empty_command() {
    let app = appliance(two_nic_appliance().build());

    let (status, body) = post(&app.router, "/addroutes", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
    assert_eq!(app.device.commit_count(), 0);
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let app = appliance(two_nic_appliance().build());
    let (status, body) = post(&app.router, "/reboot", "{}").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!(404));
}

#[tokio::test]
async fn test_commit_failure_is_500() {
    let device = Arc::new(FakeDevice::new(two_nic_appliance().build()));
    device.fail_commits(1, "Commit failed");
    let app = appliance_with(device);

    let (status, body) = post(
        &app.router,
        "/addroutes",
        requests::routes(&[("10.1.0.0/24", "", 1)]).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["message"].as_str().unwrap().contains("Commit failed"));
    assert!(!app.device.tree().has(&p("protocols static route 10.1.0.0/24")));
}

#[tokio::test]
async fn test_get_routes() {
    let app = appliance(two_nic_appliance().build());
    let (status, body) = post(&app.router, "/getroutes", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "rawRoutes": "S>* 10.1.0.0/24 [1/0] unreachable (blackhole)" })
    );
}

#[tokio::test]
async fn test_sync_routes_replaces_managed_routes() {
    let config = two_nic_appliance()
        .with_route("0.0.0.0/0", "10.0.0.1", 1)
        .with_blackhole("10.1.0.0/24", 1)
        .build();
    let app = appliance(config);

    let (status, _) = post(
        &app.router,
        "/syncroutes",
        requests::routes(&[("10.2.0.0/16", "172.16.0.254", 10)]).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let tree = app.device.tree();
    assert!(tree.has(&p("protocols static route 0.0.0.0/0 next-hop 10.0.0.1")));
    assert!(!tree.has(&p("protocols static route 10.1.0.0/24")));
    assert!(tree.has(&p("protocols static route 10.2.0.0/16 next-hop 172.16.0.254 distance 10")));
}

#[tokio::test]
async fn test_concurrent_dns_and_route_requests_do_not_interleave() {
    let device = Arc::new(
        FakeDevice::new(two_nic_appliance().build()).with_commit_delay(Duration::from_millis(20)),
    );
    let app = appliance_with(device);

    let dns_body = requests::dns(&["8.8.8.8"], &["52:54:00:00:00:02"]).to_string();
    let route_body = requests::routes(&[("10.1.0.0/24", "", 1)]).to_string();
    let (dns, route) = tokio::join!(
        post(&app.router, "/setdns", dns_body),
        post(&app.router, "/addroutes", route_body),
    );
    assert_eq!(dns.0, StatusCode::OK);
    assert_eq!(route.0, StatusCode::OK);

    assert_eq!(app.device.max_concurrency(), 1);
    let txs = app.device.transactions();
    assert_eq!(txs.len(), 2);
    for tx in &txs {
        let lines = tx.lines();
        let dns_lines = lines.iter().filter(|l| !l.contains("protocols static")).count();
        assert!(
            dns_lines == 0 || dns_lines == lines.len(),
            "transaction mixes features: {lines:?}"
        );
    }

    let tree = app.device.tree();
    assert!(tree.has(&p("service dns forwarding name-server 8.8.8.8")));
    assert!(tree.has(&p("protocols static route 10.1.0.0/24 blackhole distance 1")));
}
