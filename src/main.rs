use std::path::PathBuf;
use clap::Parser;
use tokio::net::TcpListener;

use service_router::admin::{setup_admin_router, AdminState};
use service_router::config::load_config;
use service_router::http::HttpServer;
use service_router::lifecycle::{wait_for_termination, Shutdown};
use service_router::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "service-router")]
#[command(about = "Hostname-based service router with breaker-aware load balancing", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "ROUTER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    logging::init(&config.observability.log_level);

    tracing::info!("service-router v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        discovery = %config.discovery.endpoint,
        failure_threshold = config.breaker.failure_threshold,
        reset_timeout_secs = config.breaker.reset_timeout_secs,
        cache_ttl_secs = config.fallback_cache.ttl_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config.clone())?;

    let admin = if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let app = setup_admin_router(AdminState::new(server.registry(), &config.admin.api_key));
        let signalled = shutdown.signalled();
        Some(tokio::spawn(async move {
            axum::serve(admin_listener, app)
                .with_graceful_shutdown(signalled)
                .await
        }))
    } else {
        None
    };

    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    wait_for_termination().await;
    tracing::info!("Shutdown signal received");
    shutdown.trigger();

    server_task.await??;
    if let Some(admin) = admin {
        admin.await??;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
