//! Recording handlers.
//!
//! - `POST /v1/sessions/{id}/recordings` - Start recording an ACTIVE session
//!   (decided by the session actor)
//! - `POST /v1/sessions/{id}/recordings/stop` - Stop and hand off to processing
//! - `GET /v1/recordings/{rid}`
//! - `GET /v1/recordings?session_id&page&page_size`

use super::{failed, parse_body, parse_query};
use crate::actors::SessionActorHandle;
use crate::errors::CcError;
use crate::models::api::{
    ListRecordingsQuery, RecordingResponse, StartRecordingRequest, StopRecordingRequest,
};
use crate::models::{Page, Recording, Session, SessionStatus};
use crate::recording::StartOptions;
use crate::routes::AppState;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use common::types::{RecordingId, SessionId, UserId};
use std::sync::Arc;
use tracing::{info, instrument};

fn require_instructor(session: &Session, requester_id: UserId) -> Result<(), CcError> {
    if session.instructor_id == requester_id {
        Ok(())
    } else {
        Err(CcError::NotAuthorized(
            "Only the session instructor can control recording".to_string(),
        ))
    }
}

fn not_recordable(session: &Session) -> CcError {
    CcError::InvalidTransition {
        from: session.status.as_str().to_string(),
        event: "record".to_string(),
    }
}

fn nothing_open(session: &Session) -> CcError {
    CcError::RecordingNotFound(format!("no open recording for session {}", session.id))
}

/// The live actor for a session that can still record.
///
/// A session without one is checked here, so a SCHEDULED or terminal session
/// is answered with `inactive` instead of getting a fresh actor.
async fn recording_actor(
    state: &AppState,
    session_id: SessionId,
    requester_id: UserId,
    inactive: fn(&Session) -> CcError,
) -> Result<SessionActorHandle, CcError> {
    if let Some(actor) = state.controller.get(session_id).await? {
        return Ok(actor);
    }
    let session = state.registry.get(session_id).await?;
    require_instructor(&session, requester_id)?;
    if session.status != SessionStatus::Active {
        return Err(inactive(&session));
    }
    state.controller.get_or_spawn(session_id).await
}

/// An actor that exited between lookup and call reports a closed channel.
/// Answer with the session's lifecycle state instead.
async fn settle(
    state: &AppState,
    session_id: SessionId,
    result: Result<Recording, CcError>,
    inactive: fn(&Session) -> CcError,
) -> Result<Recording, CcError> {
    match result {
        Err(CcError::Internal(reason)) => {
            let session = state.registry.get(session_id).await?;
            if session.status.is_terminal() {
                Err(inactive(&session))
            } else {
                Err(CcError::Internal(reason))
            }
        }
        other => other,
    }
}

/// Handler for `POST /v1/sessions/{id}/recordings`.
///
/// The start is decided inside the session actor, which re-reads the session
/// so a recording never opens on a session that completed or was cancelled.
#[instrument(skip_all, name = "cc.handlers.start_recording", fields(session_id = %session_id))]
pub async fn start_recording(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<(StatusCode, Json<RecordingResponse>), CcError> {
    let result = async {
        let request: StartRecordingRequest = parse_body(&body)?;
        let actor =
            recording_actor(&state, session_id, request.requester_id, not_recordable).await?;
        let result = actor
            .start_recording(
                request.requester_id,
                StartOptions {
                    quality: request.quality,
                    include_audio: request.include_audio,
                    include_screen_share: request.include_screen_share,
                },
            )
            .await;
        settle(&state, session_id, result, not_recordable).await
    }
    .await
    .map_err(|e| failed("start_recording", e))?;

    Ok((StatusCode::CREATED, Json(result.into())))
}

/// Handler for `POST /v1/sessions/{id}/recordings/stop`.
///
/// The response carries the PROCESSING recording and its `available_at`.
#[instrument(skip_all, name = "cc.handlers.stop_recording", fields(session_id = %session_id))]
pub async fn stop_recording(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<Json<RecordingResponse>, CcError> {
    let result = async {
        let request: StopRecordingRequest = parse_body(&body)?;
        let actor =
            recording_actor(&state, session_id, request.requester_id, nothing_open).await?;
        let result = actor.stop_recording(request.requester_id).await;
        settle(&state, session_id, result, nothing_open).await
    }
    .await
    .map_err(|e| failed("stop_recording", e))?;

    info!(
        target: "cc.handlers.recordings",
        session_id = %session_id,
        recording_id = %result.id,
        "Recording stopped on request"
    );
    Ok(Json(result.into()))
}

/// Handler for `GET /v1/recordings/{rid}`.
pub async fn get_recording(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<RecordingId>,
) -> Result<Json<RecordingResponse>, CcError> {
    state
        .recordings
        .get(recording_id)
        .await
        .map(|r| Json(r.into()))
        .map_err(|e| failed("get_recording", e))
}

/// Handler for `GET /v1/recordings`.
pub async fn list_recordings(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListRecordingsQuery>, QueryRejection>,
) -> Result<Json<Page<Recording>>, CcError> {
    let query = parse_query(query).map_err(|e| failed("list_recordings", e))?;
    Ok(Json(
        state
            .recordings
            .list(query.session_id, query.page, query.page_size)
            .await,
    ))
}
