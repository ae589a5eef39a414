//! Session handlers.
//!
//! - `POST /v1/sessions` - Schedule a session
//! - `GET /v1/sessions` - List sessions
//! - `GET /v1/sessions/{id}` - Get a session
//! - `PATCH /v1/sessions/{id}` - Update a SCHEDULED session
//! - `POST /v1/sessions/{id}/cancel` - Cancel a session
//! - `POST /v1/sessions/{id}/join` - Admit a participant
//! - `POST /v1/sessions/{id}/leave` - Close a participant's row
//! - `GET /v1/sessions/{id}/status` - Join gate and recording snapshot

use super::{failed, parse_body, parse_query};
use crate::calendar;
use crate::errors::CcError;
use crate::models::api::{
    CancelSessionRequest, JoinSessionRequest, JoinSessionResponse, LeaveSessionRequest,
    LeaveSessionResponse, ListSessionsQuery, ScheduleSessionRequest, ScheduleSessionResponse,
    SessionStatusResponse, UpdateSessionRequest,
};
use crate::models::{Page, Session};
use crate::routes::AppState;
use crate::signaling::LeaveReason;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use common::types::SessionId;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Handler for `POST /v1/sessions`.
///
/// Returns 201 with the session and its calendar ICS.
#[instrument(skip_all, name = "cc.handlers.schedule_session")]
pub async fn schedule_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<ScheduleSessionResponse>), CcError> {
    let request: ScheduleSessionRequest =
        parse_body(&body).map_err(|e| failed("schedule_session", e))?;
    let session = state
        .registry
        .schedule(request)
        .await
        .map_err(|e| failed("schedule_session", e))?;
    let calendar_ics = calendar::session_ics(&session);

    info!(
        target: "cc.handlers.sessions",
        session_id = %session.id,
        start_time = %session.start_time,
        "Session scheduled"
    );
    Ok((
        StatusCode::CREATED,
        Json(ScheduleSessionResponse {
            session,
            calendar_ics,
        }),
    ))
}

/// Handler for `GET /v1/sessions/{id}`.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<Session>, CcError> {
    state
        .registry
        .get(session_id)
        .await
        .map(Json)
        .map_err(|e| failed("get_session", e))
}

/// Handler for `PATCH /v1/sessions/{id}`.
#[instrument(skip_all, name = "cc.handlers.update_session", fields(session_id = %session_id))]
pub async fn update_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<Json<Session>, CcError> {
    let request: UpdateSessionRequest =
        parse_body(&body).map_err(|e| failed("update_session", e))?;
    state
        .registry
        .update(session_id, request)
        .await
        .map(Json)
        .map_err(|e| failed("update_session", e))
}

/// Handler for `POST /v1/sessions/{id}/cancel`.
///
/// Closes every active participant, tells the live session actor (if any) and
/// stops an open recording.
#[instrument(skip_all, name = "cc.handlers.cancel_session", fields(session_id = %session_id))]
pub async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<Json<Session>, CcError> {
    let request: CancelSessionRequest =
        parse_body(&body).map_err(|e| failed("cancel_session", e))?;
    let cancellation = state
        .registry
        .cancel(session_id, request.requester_id, request.reason)
        .await
        .map_err(|e| failed("cancel_session", e))?;

    if let Ok(Some(actor)) = state.controller.get(session_id).await {
        if let Err(e) = actor.cancelled().await {
            debug!(target: "cc.handlers.sessions", error = %e, "Session actor already gone");
        }
    }

    let cancelled_at = cancellation
        .session
        .cancelled_at
        .unwrap_or_else(|| state.registry.clock().now());
    state.recordings.stop(session_id, cancelled_at).await;

    info!(
        target: "cc.handlers.sessions",
        session_id = %session_id,
        closed = cancellation.closed.len(),
        "Session cancelled"
    );
    Ok(Json(cancellation.session))
}

/// Handler for `GET /v1/sessions`.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListSessionsQuery>, QueryRejection>,
) -> Result<Json<Page<Session>>, CcError> {
    let query = parse_query(query).map_err(|e| failed("list_sessions", e))?;
    Ok(Json(state.registry.list(&query).await))
}

/// Handler for `POST /v1/sessions/{id}/join`.
///
/// Admission runs through the session actor so it is serialized with
/// WebSocket joins for the same session.
#[instrument(skip_all, name = "cc.handlers.join_session", fields(session_id = %session_id))]
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<Json<JoinSessionResponse>, CcError> {
    let request: JoinSessionRequest = parse_body(&body).map_err(|e| failed("join_session", e))?;
    let user_id = request.user_id;

    let admission = async {
        let actor = state.controller.get_or_spawn(session_id).await?;
        actor
            .admit(request.user_id, request.display_name, request.role)
            .await
    }
    .await
    .map_err(|e| failed("join_session", e))?;

    Ok(Json(JoinSessionResponse {
        ws_url: format!("/v1/sessions/{session_id}/ws?user_id={user_id}"),
        ice_servers: state.config.ice_servers.clone(),
        session_status: admission.session.status,
        participant: admission.participant,
    }))
}

/// Handler for `POST /v1/sessions/{id}/leave`.
///
/// Idempotent. When no actor is live (terminal session) the registry row is
/// closed directly.
#[instrument(skip_all, name = "cc.handlers.leave_session", fields(session_id = %session_id))]
pub async fn leave_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<Json<LeaveSessionResponse>, CcError> {
    let request: LeaveSessionRequest = parse_body(&body).map_err(|e| failed("leave_session", e))?;

    let session = state
        .registry
        .get(session_id)
        .await
        .map_err(|e| failed("leave_session", e))?;

    let outcome = if session.status.is_terminal() {
        state.registry.leave(session_id, request.participant_id).await
    } else {
        async {
            let actor = state.controller.get_or_spawn(session_id).await?;
            actor.leave(request.participant_id, LeaveReason::Left).await
        }
        .await
    }
    .map_err(|e| failed("leave_session", e))?;

    Ok(Json(LeaveSessionResponse {
        participant: outcome.participant,
        remaining_participants: outcome.remaining_active,
        session_status: outcome.session_status,
    }))
}

/// Handler for `GET /v1/sessions/{id}/status`.
pub async fn get_session_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionStatusResponse>, CcError> {
    let is_recording = state.recordings.is_recording(session_id).await;
    state
        .registry
        .status(session_id, is_recording)
        .await
        .map(Json)
        .map_err(|e| failed("get_session_status", e))
}
