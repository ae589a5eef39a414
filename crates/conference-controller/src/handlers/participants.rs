//! Participant handlers: moderation, roster and screen share.
//!
//! - `POST /v1/sessions/{id}/participants/{pid}/mute`
//! - `POST /v1/sessions/{id}/participants/{pid}/unmute`
//! - `POST /v1/sessions/{id}/participants/{pid}/kick`
//! - `GET /v1/sessions/{id}/participants`
//! - `POST /v1/sessions/{id}/screen-share/start`
//! - `POST /v1/sessions/{id}/screen-share/stop`

use super::{failed, parse_body, parse_query};
use crate::errors::CcError;
use crate::models::api::{
    ListParticipantsQuery, ModerationRequest, ModerationResponse, ScreenShareRequest,
    ScreenShareResponse,
};
use crate::models::Participant;
use crate::moderation::{Actor, ModerationAction};
use crate::routes::AppState;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use bytes::Bytes;
use common::types::{ParticipantId, SessionId};
use std::sync::Arc;
use tracing::instrument;

/// Resolve the requester and run one moderation action on the session actor.
async fn moderate(
    state: &AppState,
    session_id: SessionId,
    target: ParticipantId,
    action: ModerationAction,
    body: &Bytes,
) -> Result<ModerationResponse, CcError> {
    let request: ModerationRequest = parse_body(body)?;
    let session = state.registry.get(session_id).await?;
    let own_row = state
        .registry
        .active_participant_for(session_id, request.requester_id)
        .await?;
    let actor = Actor::resolve(&session, request.requester_id, own_row.map(|p| p.id));

    let session_actor = state.controller.get_or_spawn(session_id).await?;
    let participant = session_actor.moderate(actor, target, action).await?;
    Ok(ModerationResponse { participant })
}

/// Handler for `POST /v1/sessions/{id}/participants/{pid}/mute`.
#[instrument(skip_all, name = "cc.handlers.mute", fields(session_id = %session_id, target = %target))]
pub async fn mute_participant(
    State(state): State<Arc<AppState>>,
    Path((session_id, target)): Path<(SessionId, ParticipantId)>,
    body: Bytes,
) -> Result<Json<ModerationResponse>, CcError> {
    moderate(&state, session_id, target, ModerationAction::Mute, &body)
        .await
        .map(Json)
        .map_err(|e| failed("mute_participant", e))
}

/// Handler for `POST /v1/sessions/{id}/participants/{pid}/unmute`.
#[instrument(skip_all, name = "cc.handlers.unmute", fields(session_id = %session_id, target = %target))]
pub async fn unmute_participant(
    State(state): State<Arc<AppState>>,
    Path((session_id, target)): Path<(SessionId, ParticipantId)>,
    body: Bytes,
) -> Result<Json<ModerationResponse>, CcError> {
    moderate(&state, session_id, target, ModerationAction::Unmute, &body)
        .await
        .map(Json)
        .map_err(|e| failed("unmute_participant", e))
}

/// Handler for `POST /v1/sessions/{id}/participants/{pid}/kick`.
#[instrument(skip_all, name = "cc.handlers.kick", fields(session_id = %session_id, target = %target))]
pub async fn kick_participant(
    State(state): State<Arc<AppState>>,
    Path((session_id, target)): Path<(SessionId, ParticipantId)>,
    body: Bytes,
) -> Result<Json<ModerationResponse>, CcError> {
    moderate(&state, session_id, target, ModerationAction::Kick, &body)
        .await
        .map(Json)
        .map_err(|e| failed("kick_participant", e))
}

/// Handler for `GET /v1/sessions/{id}/participants`.
///
/// Active participants only unless `include_left=true`.
pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    query: Result<Query<ListParticipantsQuery>, QueryRejection>,
) -> Result<Json<Vec<Participant>>, CcError> {
    let query = parse_query(query).map_err(|e| failed("list_participants", e))?;
    state
        .registry
        .participants(session_id, query.include_left)
        .await
        .map(Json)
        .map_err(|e| failed("list_participants", e))
}

async fn screen_share(
    state: &AppState,
    session_id: SessionId,
    body: &Bytes,
    start: bool,
) -> Result<ScreenShareResponse, CcError> {
    let request: ScreenShareRequest = parse_body(body)?;
    let requester = state
        .registry
        .participant(session_id, request.participant_id)
        .await?;
    if !requester.is_active() {
        return Err(CcError::ParticipantNotFound(
            request.participant_id.to_string(),
        ));
    }
    let sharer = if start {
        request.participant_id
    } else {
        request
            .target_participant_id
            .unwrap_or(request.participant_id)
    };

    let session_actor = state.controller.get_or_spawn(session_id).await?;
    session_actor
        .screen_share(Actor::from_participant(&requester), sharer, start)
        .await
}

/// Handler for `POST /v1/sessions/{id}/screen-share/start`.
///
/// A repeated start is a no-op success.
#[instrument(skip_all, name = "cc.handlers.start_screen_share", fields(session_id = %session_id))]
pub async fn start_screen_share(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<Json<ScreenShareResponse>, CcError> {
    screen_share(&state, session_id, &body, true)
        .await
        .map(Json)
        .map_err(|e| failed("start_screen_share", e))
}

/// Handler for `POST /v1/sessions/{id}/screen-share/stop`.
#[instrument(skip_all, name = "cc.handlers.stop_screen_share", fields(session_id = %session_id))]
pub async fn stop_screen_share(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<Json<ScreenShareResponse>, CcError> {
    screen_share(&state, session_id, &body, false)
        .await
        .map(Json)
        .map_err(|e| failed("stop_screen_share", e))
}
