//! WebSocket signaling endpoint.
//!
//! `GET /v1/sessions/{id}/ws?user_id=..` upgrades to a WebSocket. The socket is
//! split: a [`ConnectionActor`] owns the write half and this module runs the
//! read loop. The first text frame must be `join` for the same session; after
//! that every frame is forwarded to the session actor. Binary frames carry
//! media, framed as described in [`crate::media::frame`].

use crate::actors::{ConnectionActor, ConnectionActorHandle, SessionActorHandle};
use crate::errors::CcError;
use crate::media;
use crate::routes::AppState;
use crate::signaling::protocol::{parse_client_frame, ClientMessage, LeaveReason, ServerMessage};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use common::types::{ParticipantId, SessionId, UserId};
use futures::stream::SplitStream;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How long a fresh socket may wait before sending `join`.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: UserId,
}

/// Handler for `GET /v1/sessions/{id}/ws`.
///
/// Unknown sessions are rejected before the upgrade.
#[instrument(
    skip_all,
    name = "cc.signaling.upgrade",
    fields(session_id = %session_id, user_id = %query.user_id)
)]
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(e) = state.registry.get(session_id).await {
        return e.into_response();
    }
    let user_id = query.user_id;
    ws.on_upgrade(move |socket| run_connection(state, session_id, user_id, socket))
}

async fn run_connection(
    state: Arc<AppState>,
    session_id: SessionId,
    user_id: UserId,
    socket: WebSocket,
) {
    let (sink, mut stream) = socket.split();
    let (connection, _writer) = ConnectionActor::spawn(
        session_id,
        sink,
        state.config.outbound_queue_capacity,
        state.controller.child_token(),
        Arc::clone(&state.metrics),
    );

    let Some((display_name, role)) = await_join(&mut stream, &connection, session_id).await else {
        connection.close("join required");
        return;
    };

    let attached = async {
        let session = state.controller.get_or_spawn(session_id).await?;
        let participant = session
            .connect(user_id, display_name, role, connection.clone())
            .await?;
        Ok::<_, CcError>((session, participant.id))
    }
    .await;

    let (session, participant_id) = match attached {
        Ok(attached) => attached,
        Err(e) => {
            debug!(
                target: "cc.signaling",
                session_id = %session_id,
                error = %e,
                "Join rejected"
            );
            let _ = connection.try_send(ServerMessage::error(session_id, &e));
            connection.close("join rejected");
            return;
        }
    };

    info!(
        target: "cc.signaling",
        session_id = %session_id,
        participant_id = %participant_id,
        connection_id = connection.connection_id(),
        "Participant connected"
    );

    read_loop(&mut stream, &connection, &session, participant_id).await;

    if let Err(e) = session
        .disconnected(participant_id, connection.connection_id())
        .await
    {
        debug!(target: "cc.signaling", error = %e, "Session actor already gone");
    }
    info!(
        target: "cc.signaling",
        session_id = %session_id,
        participant_id = %participant_id,
        "Participant connection ended"
    );
}

/// Wait for the opening `join` frame. Anything else is answered with an
/// error frame and the socket is closed.
async fn await_join(
    stream: &mut SplitStream<WebSocket>,
    connection: &ConnectionActorHandle,
    session_id: SessionId,
) -> Option<(String, Option<crate::models::Role>)> {
    let first = async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(Message::Binary(_))) => return None,
                Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
                Some(Ok(_)) => {}
            }
        }
    };

    let text = match tokio::time::timeout(JOIN_TIMEOUT, first).await {
        Ok(Some(text)) => text,
        Ok(None) => return None,
        Err(_) => {
            let e = CcError::Timeout("join not received".to_string());
            let _ = connection.send(ServerMessage::error(session_id, &e)).await;
            return None;
        }
    };

    let rejection = match parse_client_frame(&text) {
        Ok(ClientMessage::Join {
            session_id: frame_session,
            display_name,
            role,
        }) if frame_session == session_id => return Some((display_name, role)),
        Ok(ClientMessage::Join { .. }) => {
            CcError::InvalidArgument("Join names a different session".to_string())
        }
        Ok(other) => CcError::InvalidArgument(format!(
            "First frame must be join, got {}",
            other.kind()
        )),
        Err(e) => e,
    };
    let _ = connection
        .send(ServerMessage::error(session_id, &rejection))
        .await;
    None
}

#[instrument(
    skip_all,
    name = "cc.signaling.read",
    fields(participant_id = %participant_id)
)]
async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    connection: &ConnectionActorHandle,
    session: &SessionActorHandle,
    participant_id: ParticipantId,
) {
    let session_id = session.session_id();
    let writer_closed = connection.closed();
    tokio::pin!(writer_closed);

    loop {
        let frame = tokio::select! {
            () = &mut writer_closed => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                let message = match parse_client_frame(&text) {
                    Ok(message) if message.session_id() == session_id => message,
                    Ok(_) => {
                        let e = CcError::InvalidArgument(
                            "Frame names a different session".to_string(),
                        );
                        let _ = connection.try_send(ServerMessage::error(session_id, &e));
                        continue;
                    }
                    Err(e) => {
                        let _ = connection.try_send(ServerMessage::error(session_id, &e));
                        continue;
                    }
                };

                if matches!(message, ClientMessage::Leave { .. }) {
                    if let Err(e) = session.leave(participant_id, LeaveReason::Left).await {
                        debug!(target: "cc.signaling", error = %e, "Leave failed");
                    }
                    break;
                }
                if session.signal(participant_id, message).await.is_err() {
                    warn!(
                        target: "cc.signaling",
                        session_id = %session_id,
                        "Session actor unavailable, closing connection"
                    );
                    connection.close("session unavailable");
                    break;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                let (role, payload) = match media::frame::decode_inbound(Bytes::from(data)) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        let _ = connection.try_send(ServerMessage::error(session_id, &e));
                        continue;
                    }
                };
                if session
                    .publish_media(participant_id, role, payload)
                    .await
                    .is_err()
                {
                    warn!(
                        target: "cc.signaling",
                        session_id = %session_id,
                        "Session actor unavailable, closing connection"
                    );
                    connection.close("session unavailable");
                    break;
                }
            }
            Some(Ok(Message::Close(_)) | Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }
}
