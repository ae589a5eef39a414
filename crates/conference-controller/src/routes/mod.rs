//! HTTP routes for the Conference Controller.
//!
//! Defines the Axum router and application state.

use crate::actors::{ActorMetrics, SessionControllerHandle, SessionDeps, SessionSettings};
use crate::audit::AuditLog;
use crate::calendar::InvitationSender;
use crate::config::Config;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::quality::TelemetryStore;
use crate::recording::{ObjectStore, RecordingOrchestrator, RecordingSettings};
use crate::registry::{RegistrySettings, SessionRegistry};
use crate::signaling;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use common::clock::Clock;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Request timeout for RPC routes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    /// Supervisor for live session actors.
    pub controller: SessionControllerHandle,
    pub recordings: RecordingOrchestrator,
    pub telemetry: Arc<TelemetryStore>,
    pub audit: Arc<AuditLog>,
    pub invitations: Arc<dyn InvitationSender>,
    pub metrics: Arc<ActorMetrics>,
}

impl AppState {
    /// Wire every service from `config`.
    ///
    /// Spawns the session controller, so it must run inside a Tokio runtime.
    #[must_use]
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ObjectStore>,
        invitations: Arc<dyn InvitationSender>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            RegistrySettings::from(&config),
            Arc::clone(&clock),
        ));
        let recordings =
            RecordingOrchestrator::new(RecordingSettings::from(&config), Arc::clone(&clock), store);
        let telemetry = Arc::new(TelemetryStore::new());
        let audit = Arc::new(AuditLog::new(clock));
        let metrics = ActorMetrics::new();

        let controller = SessionControllerHandle::new(SessionDeps {
            registry: Arc::clone(&registry),
            recordings: recordings.clone(),
            telemetry: Arc::clone(&telemetry),
            audit: Arc::clone(&audit),
            metrics: Arc::clone(&metrics),
            settings: SessionSettings::from(&config),
        });

        Self {
            config,
            registry,
            controller,
            recordings,
            telemetry,
            audit,
            invitations,
            metrics,
        }
    }
}

/// Build the application routes.
///
/// - `/v1/sessions/...` and `/v1/recordings/...` - JSON RPC
/// - `/v1/sessions/:id/ws` - WebSocket signaling (no request timeout)
/// - TraceLayer for request logging
/// - HTTP metrics middleware (outermost)
///
/// Health and `/metrics` are served separately on the health bind address.
pub fn build_routes(state: Arc<AppState>) -> Router {
    let rpc_routes = Router::new()
        .route(
            "/v1/sessions",
            post(handlers::schedule_session).get(handlers::list_sessions),
        )
        .route(
            "/v1/sessions/:id",
            get(handlers::get_session).patch(handlers::update_session),
        )
        .route("/v1/sessions/:id/cancel", post(handlers::cancel_session))
        .route("/v1/sessions/:id/join", post(handlers::join_session))
        .route("/v1/sessions/:id/leave", post(handlers::leave_session))
        .route("/v1/sessions/:id/status", get(handlers::get_session_status))
        .route(
            "/v1/sessions/:id/participants",
            get(handlers::list_participants),
        )
        .route(
            "/v1/sessions/:id/participants/:pid/mute",
            post(handlers::mute_participant),
        )
        .route(
            "/v1/sessions/:id/participants/:pid/unmute",
            post(handlers::unmute_participant),
        )
        .route(
            "/v1/sessions/:id/participants/:pid/kick",
            post(handlers::kick_participant),
        )
        .route(
            "/v1/sessions/:id/screen-share/start",
            post(handlers::start_screen_share),
        )
        .route(
            "/v1/sessions/:id/screen-share/stop",
            post(handlers::stop_screen_share),
        )
        .route(
            "/v1/sessions/:id/recordings",
            post(handlers::start_recording),
        )
        .route(
            "/v1/sessions/:id/recordings/stop",
            post(handlers::stop_recording),
        )
        .route("/v1/recordings", get(handlers::list_recordings))
        .route("/v1/recordings/:rid", get(handlers::get_recording))
        .route(
            "/v1/sessions/:id/quality",
            post(handlers::update_video_quality),
        )
        .route(
            "/v1/sessions/:id/quality/stats",
            get(handlers::get_video_quality_stats),
        )
        .route(
            "/v1/sessions/:id/invitations",
            post(handlers::send_calendar_invitation),
        )
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state.clone());

    // Long-lived upgrades stay outside the request timeout.
    let ws_routes = Router::new()
        .route("/v1/sessions/:id/ws", get(signaling::ws_handler))
        .with_state(state);

    rpc_routes
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}
