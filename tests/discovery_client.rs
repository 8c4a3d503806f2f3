//! `HttpDiscovery` against a mock registry.

use std::time::Duration;
use axum::http::StatusCode;
use serde_json::json;

use service_router::config::DiscoveryConfig;
use service_router::discovery::{Discovery, DiscoveryError, HttpDiscovery, ServiceKey};

mod common;
use common::start_mock_registry;

fn key() -> ServiceKey {
    ServiceKey::parse("app.example.com").unwrap()
}

async fn discovery_for(status: StatusCode, body: serde_json::Value, delay: Duration) -> HttpDiscovery {
    let addr = start_mock_registry(status, body, delay).await;
    HttpDiscovery::new(&DiscoveryConfig {
        endpoint: format!("http://{}", addr),
        timeout_ms: 300,
    })
    .unwrap()
}

#[tokio::test]
async fn test_resolves_healthy_instances() {
    let discovery = discovery_for(
        StatusCode::OK,
        json!({ "instances": [
            { "id": "i1", "address": "10.0.0.1:3000" },
            { "id": "i2", "address": "http://10.0.0.2:3000" },
            { "id": "i3" }
        ]}),
        Duration::ZERO,
    )
    .await;

    let instances = discovery.resolve(&key()).await.unwrap();
    let ids: Vec<&str> = instances.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["i1", "i2"]);
    assert!(instances.iter().all(|i| i.last_known_healthy));
}

#[tokio::test]
async fn test_empty_answer_is_unavailable() {
    let discovery = discovery_for(StatusCode::OK, json!({ "instances": [] }), Duration::ZERO).await;
    let err = discovery.resolve(&key()).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Unavailable { .. }));
}

#[tokio::test]
async fn test_malformed_answer_is_unavailable() {
    let discovery = discovery_for(StatusCode::OK, json!({ "hosts": "nope" }), Duration::ZERO).await;
    assert!(discovery.resolve(&key()).await.is_err());
}

#[tokio::test]
async fn test_error_status_is_unavailable() {
    let discovery = discovery_for(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "database down" }),
        Duration::ZERO,
    )
    .await;
    let err = discovery.resolve(&key()).await.unwrap_err();
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_slow_registry_times_out() {
    let discovery = discovery_for(
        StatusCode::OK,
        json!({ "instances": [{ "id": "i1", "address": "10.0.0.1:3000" }] }),
        Duration::from_secs(2),
    )
    .await;
    let err = discovery.resolve(&key()).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_unreachable_registry_is_unavailable() {
    let addr = common::dead_address().await;
    let discovery = HttpDiscovery::new(&DiscoveryConfig {
        endpoint: format!("http://{}", addr),
        timeout_ms: 300,
    })
    .unwrap();
    assert!(discovery.resolve(&key()).await.is_err());
}
