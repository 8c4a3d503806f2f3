//! End-to-end routing tests: a real listener, mock backends, scripted discovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use reqwest::StatusCode;
use serde_json::{json, Value};

use service_router::discovery::{BackendInstance, InstanceId};
use service_router::resilience::CircuitState;

mod common;
use common::{client, dead_address, start_mock_backend, start_programmable_backend, start_router, test_config, ScriptedDiscovery};

const HOST: &str = "app.example.com";

async fn route(url: &str) -> reqwest::Response {
    client()
        .post(url)
        .json(&json!({ "hostname": HOST }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_round_robin_across_instances() {
    let a = start_mock_backend("A").await;
    let b = start_mock_backend("B").await;
    let c = start_mock_backend("C").await;
    let discovery = ScriptedDiscovery::up(vec![
        BackendInstance::new("a", a.to_string()),
        BackendInstance::new("b", b.to_string()),
        BackendInstance::new("c", c.to_string()),
    ]);
    let router = start_router(test_config(), discovery).await;

    let mut bodies = Vec::new();
    for _ in 0..6 {
        let res = route(&router.url("/route")).await;
        assert_eq!(res.status(), StatusCode::OK);
        bodies.push(res.text().await.unwrap());
    }
    assert_eq!(bodies, vec!["A", "B", "C", "A", "B", "C"]);

    router.shutdown.trigger();
}

#[tokio::test]
async fn test_breaker_opens_on_transport_errors() {
    let dead = dead_address().await;
    let live = start_mock_backend("live").await;
    let discovery = ScriptedDiscovery::up(vec![
        BackendInstance::new("dead", dead.to_string()),
        BackendInstance::new("live", live.to_string()),
    ]);
    let router = start_router(test_config(), discovery).await;

    let mut statuses = Vec::new();
    for _ in 0..6 {
        statuses.push(route(&router.url("/route")).await.status());
    }
    // dead, live, dead, live, dead (opens), live
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::BAD_GATEWAY).count(), 3);
    assert_eq!(router.registry.breakers.state(&InstanceId::new("dead")), CircuitState::Open);

    for _ in 0..5 {
        let res = route(&router.url("/route")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.text().await.unwrap(), "live");
    }

    router.shutdown.trigger();
}

#[tokio::test]
async fn test_forwarding_failure_body() {
    let dead = dead_address().await;
    let discovery = ScriptedDiscovery::up(vec![BackendInstance::new("dead", dead.to_string())]);
    let router = start_router(test_config(), discovery).await;

    let res = route(&router.url("/route")).await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "ForwardingFailure");
    assert_eq!(body["reason"], "Transport");

    router.shutdown.trigger();
}

#[tokio::test]
async fn test_server_errors_pass_through_and_can_trip_breaker() {
    let failing = Arc::new(AtomicBool::new(true));
    let flag = failing.clone();
    let flaky = start_programmable_backend(move |_| {
        let flag = flag.clone();
        async move {
            if flag.load(Ordering::SeqCst) {
                (500, "boom".to_string())
            } else {
                (200, "recovered".to_string())
            }
        }
    })
    .await;
    let steady = start_mock_backend("steady").await;

    let mut config = test_config();
    config.breaker.count_server_errors = true;
    config.breaker.reset_timeout_secs = 1;
    let discovery = ScriptedDiscovery::up(vec![
        BackendInstance::new("flaky", flaky.to_string()),
        BackendInstance::new("steady", steady.to_string()),
    ]);
    let router = start_router(config, discovery).await;
    let flaky_id = InstanceId::new("flaky");

    for _ in 0..6 {
        let res = route(&router.url("/route")).await;
        if res.status() == StatusCode::INTERNAL_SERVER_ERROR {
            // The backend's own response, not a router error body.
            assert_eq!(res.text().await.unwrap(), "boom");
        }
    }
    assert_eq!(router.registry.breakers.state(&flaky_id), CircuitState::Open);

    // Recover the backend and wait out the cooldown: one probe closes the breaker.
    failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let mut bodies = Vec::new();
    for _ in 0..2 {
        let res = route(&router.url("/route")).await;
        assert_eq!(res.status(), StatusCode::OK);
        bodies.push(res.text().await.unwrap());
    }
    assert!(bodies.iter().any(|b| b == "recovered"));
    assert_eq!(router.registry.breakers.state(&flaky_id), CircuitState::Closed);

    router.shutdown.trigger();
}

#[tokio::test]
async fn test_discovery_outage_uses_fallback_then_fails_fast() {
    let a = start_mock_backend("A").await;
    let discovery = ScriptedDiscovery::up(vec![BackendInstance::new("a", a.to_string())]);
    let mut config = test_config();
    config.fallback_cache.ttl_secs = 1;
    let router = start_router(config, discovery.clone()).await;

    // Populate the cache with a live resolution.
    let res = route(&router.url("/route")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("x-routed-fallback-age-ms").is_none());

    discovery.fail();

    let res = route(&router.url("/route")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("x-routed-fallback-age-ms").is_some());
    assert_eq!(res.text().await.unwrap(), "A");

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let res = route(&router.url("/route")).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "error": "ServiceUnavailable", "reason": "CacheMiss" }));

    router.shutdown.trigger();
}

#[tokio::test]
async fn test_all_instances_open_is_no_eligible_instance() {
    let dead = dead_address().await;
    let discovery = ScriptedDiscovery::up(vec![BackendInstance::new("dead", dead.to_string())]);
    let router = start_router(test_config(), discovery).await;

    for _ in 0..3 {
        assert_eq!(route(&router.url("/route")).await.status(), StatusCode::BAD_GATEWAY);
    }

    let res = route(&router.url("/route")).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["reason"], "NoEligibleInstance");

    router.shutdown.trigger();
}

#[tokio::test]
async fn test_route_forwards_method_and_path() {
    let echo = start_programmable_backend(|request| async move {
        let request_line = request.lines().next().unwrap_or_default().to_string();
        (200, request_line)
    })
    .await;
    let discovery = ScriptedDiscovery::up(vec![BackendInstance::new("echo", echo.to_string())]);
    let router = start_router(test_config(), discovery).await;

    let res = client()
        .post(router.url("/route"))
        .json(&json!({ "hostname": HOST, "path": "/v1/orders" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("x-request-id").is_some());
    assert_eq!(res.headers().get("x-routed-instance").unwrap(), "echo");
    assert_eq!(res.text().await.unwrap(), "POST /v1/orders HTTP/1.1");

    router.shutdown.trigger();
}

#[tokio::test]
async fn test_host_header_proxying_keeps_path_and_request_id() {
    let echo = start_programmable_backend(|request| async move {
        let request_id = request
            .lines()
            .find_map(|l| l.strip_prefix("x-request-id: "))
            .unwrap_or("missing")
            .to_string();
        let request_line = request.lines().next().unwrap_or_default().to_string();
        (200, format!("{}|{}", request_line, request_id))
    })
    .await;
    let discovery = ScriptedDiscovery::up(vec![BackendInstance::new("echo", echo.to_string())]);
    let router = start_router(test_config(), discovery).await;

    let res = client()
        .get(router.url("/items?page=2"))
        .header("host", HOST)
        .header("x-request-id", "req-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-request-id").unwrap(), "req-123");
    assert_eq!(res.text().await.unwrap(), "GET /items?page=2 HTTP/1.1|req-123");

    router.shutdown.trigger();
}

#[tokio::test]
async fn test_router_liveness_and_client_errors() {
    let mut config = test_config();
    config.forwarding.max_body_bytes = 16;
    let router = start_router(config, ScriptedDiscovery::down()).await;

    let res = client().get(router.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client()
        .post(router.url("/route"))
        .body("x".repeat(64))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    // Discovery has never answered: nothing cached.
    let res = route(&router.url("/route")).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["reason"], "CacheMiss");

    router.shutdown.trigger();
}

#[tokio::test]
async fn test_abandoned_request_counts_against_breaker() {
    let slow = start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "late".to_string())
    })
    .await;
    let discovery = ScriptedDiscovery::up(vec![BackendInstance::new("slow", slow.to_string())]);
    let mut config = test_config();
    config.forwarding.timeout_secs = 10;
    config.forwarding.request_deadline_secs = 10;
    let router = start_router(config, discovery).await;

    let impatient = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let result = impatient
        .post(router.url("/route"))
        .json(&json!({ "hostname": HOST }))
        .send()
        .await;
    assert!(result.unwrap_err().is_timeout());

    // The router notices the hang-up asynchronously.
    let slow_id = InstanceId::new("slow");
    let mut failures = 0;
    for _ in 0..40 {
        failures = router.registry.breakers.consecutive_failures(&slow_id);
        if failures > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(failures, 1);

    router.shutdown.trigger();
}

#[tokio::test]
async fn test_request_deadline_answers_with_json_timeout() {
    let slow = start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "late".to_string())
    })
    .await;
    let discovery = ScriptedDiscovery::up(vec![BackendInstance::new("slow", slow.to_string())]);
    let mut config = test_config();
    config.forwarding.request_deadline_secs = 1;
    let router = start_router(config, discovery).await;

    let res = route(&router.url("/route")).await;
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "ForwardingFailure");
    assert_eq!(body["reason"], "Timeout");
    assert_eq!(router.registry.breakers.consecutive_failures(&InstanceId::new("slow")), 1);

    router.shutdown.trigger();
}
