//! Health checking against live HTTP endpoints
//!
//! Each instance points at its own wiremock server.

use std::sync::Arc;
use std::time::Duration;

use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use agentic_reasoning_core::config::DiscoveryConfig;
use agentic_reasoning_core::performance::{
    HealthChecker, HttpHealthCheck, InstanceHealth, LoadBalancer, LoadBalancingStrategy,
    ServiceInstance, ServiceRegistry,
};

async fn backend(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

fn config() -> DiscoveryConfig {
    DiscoveryConfig {
        heartbeat_timeout_ms: 60_000,
        health_check_interval_ms: 20,
    }
}

#[tokio::test]
async fn test_check_once_marks_instances_by_status() {
    let up = backend(200).await;
    let down = backend(503).await;

    let registry = Arc::new(ServiceRegistry::new(&config()));
    registry.register(ServiceInstance::new("up", up.uri())).unwrap();
    registry.register(ServiceInstance::new("down", down.uri())).unwrap();

    let check = Arc::new(HttpHealthCheck::new("/health", Duration::from_secs(2)).unwrap());
    let checker = HealthChecker::new(Arc::clone(&registry), check, &config());
    let report = checker.check_once().await;

    assert_eq!(report.healthy, 1);
    assert_eq!(report.unhealthy, 1);
    assert!(report.evicted.is_empty());
    assert_eq!(registry.get("up").unwrap().health, InstanceHealth::Healthy);
    assert_eq!(registry.get("down").unwrap().health, InstanceHealth::Unhealthy);

    // Only the healthy backend is routable.
    let balancer = LoadBalancer::new(Arc::clone(&registry), 3);
    for _ in 0..4 {
        let chosen = balancer
            .select_instance(LoadBalancingStrategy::RoundRobin)
            .unwrap();
        assert_eq!(chosen.id, "up");
    }
}

#[tokio::test]
async fn test_unreachable_instance_is_unhealthy() {
    let registry = Arc::new(ServiceRegistry::new(&config()));
    // Nothing listens on port 9 of the loopback in the test environment.
    registry
        .register(ServiceInstance::new("gone", "http://127.0.0.1:9"))
        .unwrap();

    let check = Arc::new(HttpHealthCheck::new("/health", Duration::from_millis(500)).unwrap());
    let report = HealthChecker::new(Arc::clone(&registry), check, &config())
        .check_once()
        .await;

    assert_eq!(report.unhealthy, 1);
    assert_eq!(registry.get("gone").unwrap().health, InstanceHealth::Unhealthy);
}

#[tokio::test]
async fn test_spawned_checker_stops_on_shutdown() {
    let up = backend(200).await;
    let registry = Arc::new(ServiceRegistry::new(&config()));
    registry.register(ServiceInstance::new("up", up.uri())).unwrap();

    let check = Arc::new(HttpHealthCheck::new("/health", Duration::from_secs(2)).unwrap());
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = HealthChecker::new(Arc::clone(&registry), check, &config()).spawn(rx);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.get("up").unwrap().health, InstanceHealth::Healthy);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("checker did not stop")
        .unwrap();
}
