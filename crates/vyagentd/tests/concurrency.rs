//! Serialization of configuration transactions
//!
//! Many guarded requests at once must commit one after another, each on
//! top of the previous commit.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use vyagent_common::BootstrapConfig;
use vyagent_config::ConfigPath;
use vyagent_test::{requests, two_nic_appliance, FakeDevice, MockRunner};
use vyagentd::{build_registry, AgentContext, ConfigGuard};

const REQUESTS: usize = 8;

fn agent(device: &Arc<FakeDevice>, guard: &ConfigGuard) -> Arc<AgentContext> {
    Arc::new(
        AgentContext::new(BootstrapConfig::default(), Arc::new(MockRunner::new()))
            .with_source(device.clone())
            .with_applier(device.clone())
            .with_guard(guard.clone()),
    )
}

fn route_body(i: usize) -> Vec<u8> {
    requests::routes(&[(&format!("10.{}.0.0/16", i), "", 1)])
        .to_string()
        .into_bytes()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_guarded_requests_commit_sequentially() {
    let lock_dir = tempfile::tempdir().unwrap();
    let guard = ConfigGuard::new(lock_dir.path().join("vyos.lock"));
    let device = Arc::new(
        FakeDevice::new(two_nic_appliance().build()).with_commit_delay(Duration::from_millis(10)),
    );
    let agent = agent(&device, &guard);
    let registry = Arc::new(build_registry(&guard));

    let tasks: Vec<_> = (0..REQUESTS)
        .map(|i| {
            let registry = registry.clone();
            let agent = agent.clone();
            tokio::spawn(async move { registry.dispatch(agent, "/addroutes", &route_body(i)).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().status, StatusCode::OK);
    }

    assert_eq!(device.commit_count(), REQUESTS);
    assert_eq!(device.max_concurrency(), 1);

    // every transaction carries exactly its own route, and none was lost
    for tx in device.transactions() {
        assert_eq!(tx.lines().len(), 1);
    }
    let tree = device.tree();
    for i in 0..REQUESTS {
        let path = ConfigPath::parse(&format!("protocols static route 10.{}.0.0/16 blackhole", i)).unwrap();
        assert!(tree.has(&path), "route {i} missing");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_read_only_requests_are_not_serialized() {
    let lock_dir = tempfile::tempdir().unwrap();
    let guard = ConfigGuard::new(lock_dir.path().join("vyos.lock"));
    let device = Arc::new(FakeDevice::new(two_nic_appliance().build()));
    let agent = agent(&device, &guard);
    let registry = Arc::new(build_registry(&guard));

    // a held guard blocks guarded handlers but not /getroutes
    let held = guard.clone();
    let (release, released) = tokio::sync::oneshot::channel::<()>();
    let holder = tokio::spawn(async move {
        held.run(async {
            let _ = released.await;
        })
        .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let resp = tokio::time::timeout(
        Duration::from_secs(1),
        registry.dispatch(agent.clone(), "/getroutes", b""),
    )
    .await
    .unwrap();
    assert_eq!(resp.status, StatusCode::OK);

    let pending = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.dispatch(agent, "/addroutes", &route_body(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());
    assert_eq!(device.commit_count(), 0);

    release.send(()).unwrap();
    holder.await.unwrap();
    let resp = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(device.commit_count(), 1);
}
