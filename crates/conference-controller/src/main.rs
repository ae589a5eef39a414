//! Conference Controller
//!
//! Scheduled video-conferencing sessions with WebSocket signaling.
//!
//! # Servers
//!
//! - HTTP server for the RPC surface and `/v1/sessions/:id/ws` (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (JSON when `CC_LOG_JSON=true`)
//! 3. Initialize Prometheus metrics recorder
//! 4. Build application state (registry, recordings, session controller)
//! 5. Start health server, then the recording watchdog
//! 6. Start the API server and mark ready
//! 7. Wait for shutdown signal, then drain

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use common::clock::SystemClock;
use conference_controller::calendar::LoggingInvitationSender;
use conference_controller::config::Config;
use conference_controller::observability::{health_router, init_metrics_recorder, HealthState};
use conference_controller::recording::{start_recording_watchdog, InMemoryObjectStore};
use conference_controller::routes::{build_routes, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for session actors to close their connections.
const ACTOR_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Time allowed for in-flight recording uploads to settle.
const RECORDING_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing format comes from config, so a config error goes to stderr
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_json);

    info!("Starting Conference Controller");

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        default_max_participants = config.default_max_participants,
        join_window_minutes = config.join_window_minutes,
        recording_sla_minutes = config.recording_sla_minutes,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!(e)
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(SystemClock),
        Arc::new(InMemoryObjectStore::new()),
        Arc::new(LoggingInvitationSender),
    ));
    info!("Actor system initialized");

    // Servers stop on this token; actors have their own root token
    let shutdown_token = CancellationToken::new();

    // Health server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .with_context(|| format!("Invalid health bind address: {}", config.health_bind_address))?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {health_addr}"))?;

    let health_shutdown_token = shutdown_token.child_token();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Recording watchdog
    let watchdog_token = CancellationToken::new();
    let watchdog_task = tokio::spawn(start_recording_watchdog(
        state.recordings.clone(),
        config.watchdog_interval(),
        watchdog_token.clone(),
    ));

    // API server
    let api_addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.bind_address))?;
    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("Failed to bind API server to {api_addr}"))?;

    let app = build_routes(Arc::clone(&state));
    let api_shutdown_token = shutdown_token.child_token();
    let api_task = tokio::spawn(async move {
        info!(addr = %api_addr, "API server starting");
        let server = axum::serve(api_listener, app).with_graceful_shutdown(async move {
            api_shutdown_token.cancelled().await;
            info!("API server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "API server failed");
        }
    });

    health_state.set_ready();
    info!("Conference Controller running - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Not ready immediately so load balancers stop routing new sessions
    health_state.begin_drain();

    // Closing sessions first lets WebSocket handlers return so the API
    // server's graceful shutdown can complete.
    if let Err(e) = state.controller.shutdown(ACTOR_SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Actor system shutdown error");
    }

    shutdown_token.cancel();
    if let Err(e) = api_task.await {
        warn!(error = %e, "API server task join failed");
    }

    if !state.recordings.drain(RECORDING_DRAIN_TIMEOUT).await {
        warn!(
            timeout_secs = RECORDING_DRAIN_TIMEOUT.as_secs(),
            "Recording uploads still in flight at shutdown"
        );
    }

    watchdog_token.cancel();
    if let Err(e) = watchdog_task.await {
        warn!(error = %e, "Recording watchdog task join failed");
    }
    if let Err(e) = health_task.await {
        warn!(error = %e, "Health server task join failed");
    }

    info!("Conference Controller shutdown complete");
    Ok(())
}

/// Install the global subscriber. `json` switches to JSON lines.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "conference_controller=debug,cc=info,tower_http=debug".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
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
