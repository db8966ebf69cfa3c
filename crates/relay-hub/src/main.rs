//! Relay Hub
//!
//! Real-time master/client message relay over WebSockets.
//!
//! # Servers
//!
//! - WebSocket listener for masters and clients (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (text or JSON)
//! 3. Initialize Prometheus metrics recorder
//! 4. Spawn the hub actor
//! 5. Start health HTTP server
//! 6. Bind and start the WebSocket listener, then mark ready
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_hub::actors::{HubActorHandle, HubMetrics, HubSettings};
use relay_hub::config::{Config, LogFormat};
use relay_hub::observability::{health_router, init_metrics_recorder, metrics_router, HealthState};
use relay_hub::transport::{relay_router, AppState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long the hub gets to close sessions after cancellation.
const HUB_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration is loaded before tracing so the log format can be chosen.
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "relay_hub=debug,tower_http=debug".into());
    let text_layer =
        (config.log_format == LogFormat::Text).then(tracing_subscriber::fmt::layer);
    let json_layer =
        (config.log_format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json());
    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .init();

    info!("Starting Relay Hub");
    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        outbound_capacity = config.outbound_capacity,
        hub_mailbox_capacity = config.hub_mailbox_capacity,
        max_frame_bytes = config.max_frame_bytes,
        presence_notices = config.presence_notices,
        client_greeting = config.client_greeting.is_some(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    info!("Initializing hub actor...");
    let hub_metrics = HubMetrics::new();
    let (hub, hub_task) = HubActorHandle::spawn(HubSettings::from_config(&config), hub_metrics);
    info!("Hub actor initialized");

    let health_state = Arc::new(HealthState::for_hub(&hub));

    // Child of the hub token, so hub cancellation stops every server
    let shutdown_token = hub.child_token();

    // Health server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router(prometheus_handle));

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // WebSocket listener
    let ws_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind WebSocket listener");
        format!("Failed to bind WebSocket listener to {ws_addr}: {e}")
    })?;

    let app = relay_router(AppState::new(hub.clone(), &config));
    let ws_shutdown_token = shutdown_token.child_token();
    let ws_server = tokio::spawn(async move {
        info!(addr = %ws_addr, "WebSocket listener starting");
        let server = axum::serve(ws_listener, app).with_graceful_shutdown(async move {
            ws_shutdown_token.cancelled().await;
            info!("WebSocket listener shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "WebSocket listener failed");
        }
    });

    health_state.mark_accepting();
    info!("Relay Hub running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.mark_draining();

    // Cancelling the hub closes every outbound queue, which ends the
    // session tasks; the servers stop via their child tokens.
    hub.cancel();

    match tokio::time::timeout(HUB_SHUTDOWN_TIMEOUT, hub_task).await {
        Ok(Ok(())) => info!("Hub actor stopped"),
        Ok(Err(e)) => warn!(error = %e, "Hub actor task failed"),
        Err(_) => warn!(
            timeout_secs = HUB_SHUTDOWN_TIMEOUT.as_secs(),
            "Hub actor did not stop in time"
        ),
    }

    if tokio::time::timeout(HUB_SHUTDOWN_TIMEOUT, ws_server)
        .await
        .is_err()
    {
        warn!("WebSocket listener did not drain in time");
    }

    info!("Relay Hub shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the service
/// cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
