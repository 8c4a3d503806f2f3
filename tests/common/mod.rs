//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use service_router::config::RouterConfig;
use service_router::discovery::{BackendInstance, Discovery, DiscoveryError, ServiceKey};
use service_router::http::HttpServer;
use service_router::lifecycle::Shutdown;
use service_router::routing::RoutingRegistry;

/// Read one HTTP/1.1 request (head plus `Content-Length` body) off the socket.
async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let content_length = head
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < head_end + 4 + content_length {
                let n = socket.read(&mut chunk).await.ok()?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return Some(String::from_utf8_lossy(&buf).to_string());
        }
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a mock backend that answers every request with `200` and `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_request| async move { (200, body.to_string()) }).await
}

/// Start a programmable mock backend; the closure sees the raw request text.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(request).await;
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Discovery whose answer the test controls; `None` means the registry is down.
#[derive(Clone, Default)]
pub struct ScriptedDiscovery {
    instances: Arc<Mutex<Option<Vec<BackendInstance>>>>,
}

impl ScriptedDiscovery {
    pub fn up(instances: Vec<BackendInstance>) -> Self {
        let discovery = Self::default();
        discovery.set(instances);
        discovery
    }

    pub fn down() -> Self {
        Self::default()
    }

    pub fn set(&self, instances: Vec<BackendInstance>) {
        *self.instances.lock().unwrap() = Some(instances);
    }

    pub fn fail(&self) {
        *self.instances.lock().unwrap() = None;
    }
}

#[async_trait]
impl Discovery for ScriptedDiscovery {
    async fn resolve(&self, service: &ServiceKey) -> Result<Vec<BackendInstance>, DiscoveryError> {
        self.instances
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DiscoveryError::unavailable(service, "scripted outage"))
    }
}

/// Test configuration: health probes off, short timeouts.
pub fn test_config() -> RouterConfig {
    let mut config = RouterConfig::default();
    config.health_check.enabled = false;
    config.forwarding.timeout_secs = 2;
    config.forwarding.request_deadline_secs = 5;
    config
}

/// A running router bound to an ephemeral port.
pub struct TestRouter {
    pub addr: SocketAddr,
    pub registry: Arc<RoutingRegistry>,
    pub shutdown: Shutdown,
}

impl TestRouter {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn start_router(config: RouterConfig, discovery: ScriptedDiscovery) -> TestRouter {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::with_discovery(config, Arc::new(discovery));
    let registry = server.registry();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, rx).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestRouter {
        addr,
        registry,
        shutdown,
    }
}

/// A fresh connection per request so round robin is observed per request.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Mock registry serving `GET /services/healthy` with a fixed status and body.
pub async fn start_mock_registry(status: StatusCode, body: serde_json::Value, delay: Duration) -> SocketAddr {
    let app = Router::new().route(
        "/services/healthy",
        get(move |Query(params): Query<HashMap<String, String>>| {
            let body = body.clone();
            async move {
                tokio::time::sleep(delay).await;
                if !params.contains_key("app_hostname") {
                    return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "app_hostname required"})));
                }
                (status, Json(body))
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
