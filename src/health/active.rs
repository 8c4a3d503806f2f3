//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every known instance's health endpoint
//! - Update probe health state in the instance table
//! - Optionally feed probe failures into the instance's breaker
//! - Sweep stale instances, breakers and cache entries on each tick

use std::sync::Arc;
use std::time::{Duration, Instant};
use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::discovery::InstanceId;
use crate::load_balancer::backend::ProbeTarget;
use crate::observability::metrics;
use crate::routing::forward::instance_uri;
use crate::routing::RoutingRegistry;

pub struct HealthMonitor {
    registry: Arc<RoutingRegistry>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<RoutingRegistry>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .build(HttpConnector::new());

        Self {
            registry,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            feeds_breaker = self.config.probe_failures_trip_breaker,
            "Health monitor starting"
        );

        let interval = Duration::from_secs(self.config.interval_secs);
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every known instance concurrently and apply the results.
    pub async fn check_all(&self) {
        let targets = self.registry.instances.probe_targets();
        if targets.is_empty() {
            return;
        }

        let mut probes = JoinSet::new();
        for target in targets {
            let client = self.client.clone();
            let path = self.config.path.clone();
            let timeout = Duration::from_secs(self.config.timeout_secs);
            probes.spawn(async move {
                let healthy = probe(&client, &target, &path, timeout).await;
                (target.id, healthy)
            });
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((id, healthy)) => self.apply(&id, healthy),
                Err(e) => tracing::error!(error = %e, "Health probe task failed"),
            }
        }
    }

    fn apply(&self, id: &InstanceId, healthy: bool) {
        if let Some(previous) = self.registry.instances.set_health(id, healthy) {
            if healthy {
                tracing::info!(instance = %id, previous = ?previous, "Instance passed health probe");
            } else {
                tracing::warn!(instance = %id, previous = ?previous, "Instance failed health probe");
            }
        }

        if !healthy && self.config.probe_failures_trip_breaker {
            self.registry.breakers.record_failure(id);
        }
    }

    fn sweep(&self) {
        let report = self
            .registry
            .sweep_at(Instant::now(), Duration::from_secs(self.config.stale_after_secs));
        if report.instances + report.breakers + report.cache_entries > 0 {
            tracing::debug!(
                instances = report.instances,
                breakers = report.breakers,
                cache_entries = report.cache_entries,
                "Swept stale routing state"
            );
        }
        // Aggregate only: swept instances must not leave series behind.
        metrics::record_instance_health(self.registry.instances.health_counts());
    }
}

async fn probe(
    client: &Client<HttpConnector, Body>,
    target: &ProbeTarget,
    path: &str,
    timeout: Duration,
) -> bool {
    let uri = match instance_uri(&target.address, path) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(instance = %target.id, error = %e, "Health check failed: bad address");
            return false;
        }
    };

    let request = match Request::builder()
        .method("GET")
        .uri(uri)
        .header("user-agent", "service-router-health-check")
        .body(Body::empty()) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Failed to build health check request: {}", e);
                return false;
            }
        };

    match time::timeout(timeout, client.request(request)).await {
        Ok(Ok(response)) => {
            let success = response.status().is_success();
            if !success {
                tracing::debug!(instance = %target.id, status = %response.status(), "Health check failed: non-success status");
            }
            success
        }
        Ok(Err(e)) => {
            tracing::debug!(instance = %target.id, error = %e, "Health check failed: connection error");
            false
        }
        Err(_) => {
            tracing::debug!(instance = %target.id, "Health check failed: timeout");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use crate::discovery::{BackendInstance, ServiceKey};
    use crate::load_balancer::HealthState;
    use crate::resilience::CircuitState;

    async fn fixed_status_backend(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status_line);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        addr.to_string()
    }

    fn monitor(feeds_breaker: bool) -> HealthMonitor {
        let registry = Arc::new(RoutingRegistry::new(1, Duration::from_secs(15), Duration::from_secs(10)));
        let config = HealthCheckConfig {
            timeout_secs: 2,
            probe_failures_trip_breaker: feeds_breaker,
            ..HealthCheckConfig::default()
        };
        HealthMonitor::new(registry, config)
    }

    #[tokio::test]
    async fn test_probe_results_update_health() {
        let up = fixed_status_backend("200 OK").await;
        let down = fixed_status_backend("503 Service Unavailable").await;

        let monitor = monitor(false);
        let service = ServiceKey::parse("app.example.com").unwrap();
        monitor.registry.instances.observe_at(
            &service,
            &[BackendInstance::new("up", up), BackendInstance::new("down", down)],
            Instant::now(),
        );

        monitor.check_all().await;

        assert_eq!(monitor.registry.instances.health(&InstanceId::new("up")), HealthState::Healthy);
        assert_eq!(monitor.registry.instances.health(&InstanceId::new("down")), HealthState::Unhealthy);
        // Informational by default: the breaker is untouched.
        assert!(monitor.registry.breakers.is_empty());
    }

    #[tokio::test]
    async fn test_probe_failures_can_trip_breaker() {
        let down = fixed_status_backend("500 Internal Server Error").await;

        let monitor = monitor(true);
        let service = ServiceKey::parse("app.example.com").unwrap();
        monitor.registry.instances.observe_at(&service, &[BackendInstance::new("down", down)], Instant::now());

        monitor.check_all().await;

        assert_eq!(monitor.registry.breakers.state(&InstanceId::new("down")), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let monitor = monitor(false);
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(monitor.run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
