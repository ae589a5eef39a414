//! Handler for `POST /v1/sessions/{id}/invitations`.

use super::{failed, parse_body};
use crate::calendar;
use crate::errors::CcError;
use crate::models::api::{SendInvitationRequest, SendInvitationResponse};
use crate::models::CalendarInvitation;
use crate::routes::AppState;

use axum::extract::{Path, State};
use axum::Json;
use bytes::Bytes;
use common::types::SessionId;
use std::sync::Arc;
use tracing::{info, instrument};

/// Build the session's ICS and deliver it to each recipient.
///
/// Owner only. Terminal sessions cannot be invited to.
#[instrument(skip_all, name = "cc.handlers.send_invitation", fields(session_id = %session_id))]
pub async fn send_calendar_invitation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<Json<SendInvitationResponse>, CcError> {
    send(&state, session_id, &body)
        .await
        .map(Json)
        .map_err(|e| failed("send_calendar_invitation", e))
}

async fn send(
    state: &AppState,
    session_id: SessionId,
    body: &Bytes,
) -> Result<SendInvitationResponse, CcError> {
    let request: SendInvitationRequest = parse_body(body)?;
    let session = state.registry.get(session_id).await?;
    if session.instructor_id != request.requester_id {
        return Err(CcError::NotAuthorized(
            "Only the session instructor can send invitations".to_string(),
        ));
    }
    if session.status.is_terminal() {
        return Err(CcError::InvalidTransition {
            from: session.status.to_string(),
            event: "invite".to_string(),
        });
    }
    calendar::validate_recipients(&request.recipients)?;

    let ics = calendar::session_ics(&session);
    let sent_to = calendar::deliver(
        state.invitations.as_ref(),
        &session,
        &request.recipients,
        &ics,
        state.config.invitation_timeout(),
    )
    .await?;

    let sent_at = state.registry.clock().now();
    state
        .registry
        .record_invitation(CalendarInvitation {
            session_id,
            recipients: sent_to.clone(),
            ics: ics.clone(),
            sent_at,
        })
        .await?;

    info!(
        target: "cc.handlers.invitations",
        session_id = %session_id,
        recipients = sent_to.len(),
        "Calendar invitations sent"
    );
    Ok(SendInvitationResponse {
        session_id,
        sent_to,
        calendar_ics: ics,
        sent_at,
    })
}
