//! Message types for actor communication.
//!
//! Request-reply uses a `oneshot` sender carried in the message.

use super::connection::ConnectionActorHandle;
use super::session::SessionActorHandle;
use crate::errors::CcError;
use crate::media::{Delivery, TrackRole};
use crate::models::api::{ScreenShareResponse, UpdateQualityResponse};
use crate::models::{Participant, Recording, Role};
use crate::moderation::{Actor, ModerationAction};
use crate::quality::QualityTier;
use crate::recording::StartOptions;
use crate::registry::{Admission, LeaveOutcome};
use crate::signaling::protocol::{ClientMessage, LeaveReason, ServerMessage};
use bytes::Bytes;
use common::types::{ParticipantId, SessionId, UserId};
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `SessionControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Handle to the live session actor, spawning one if needed.
    GetOrSpawn {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<SessionActorHandle, CcError>>,
    },

    /// Handle to the session actor if one is running.
    Get {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionActorHandle>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting sessions and cancel every child.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    pub session_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// HTTP join. Admits without attaching a connection.
    Admit {
        user_id: UserId,
        display_name: String,
        role: Option<Role>,
        respond_to: oneshot::Sender<Result<Admission, CcError>>,
    },

    /// WebSocket join. Admits (idempotently) and attaches the writer.
    Connect {
        user_id: UserId,
        display_name: String,
        role: Option<Role>,
        connection: ConnectionActorHandle,
        respond_to: oneshot::Sender<Result<Participant, CcError>>,
    },

    /// The socket for `connection_id` closed.
    Disconnected {
        participant_id: ParticipantId,
        connection_id: u64,
    },

    /// Inbound signaling frame from a connected participant.
    Signal {
        participant_id: ParticipantId,
        message: ClientMessage,
    },

    Leave {
        participant_id: ParticipantId,
        reason: LeaveReason,
        respond_to: Option<oneshot::Sender<Result<LeaveOutcome, CcError>>>,
    },

    Moderate {
        actor: Actor,
        target: ParticipantId,
        action: ModerationAction,
        respond_to: oneshot::Sender<Result<Participant, CcError>>,
    },

    ScreenShare {
        actor: Actor,
        sharer: ParticipantId,
        start: bool,
        respond_to: oneshot::Sender<Result<ScreenShareResponse, CcError>>,
    },

    SetQuality {
        participant_id: ParticipantId,
        quality: QualityTier,
        respond_to: oneshot::Sender<Result<UpdateQualityResponse, CcError>>,
    },

    /// Relay one opaque media packet to every subscriber.
    Media {
        from: ParticipantId,
        role: TrackRole,
        payload: Bytes,
        respond_to: Option<oneshot::Sender<Vec<Delivery>>>,
    },

    /// Open a recording once the session is confirmed ACTIVE.
    StartRecording {
        requester_id: UserId,
        options: StartOptions,
        respond_to: oneshot::Sender<Result<Recording, CcError>>,
    },

    StopRecording {
        requester_id: UserId,
        respond_to: oneshot::Sender<Result<Recording, CcError>>,
    },

    /// The session was cancelled in the registry. Tear down and exit.
    Cancelled {
        respond_to: oneshot::Sender<()>,
    },

    GetState {
        respond_to: oneshot::Sender<SessionActorState>,
    },
}

/// Snapshot of a session actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionActorState {
    pub session_id: SessionId,
    /// Participants with an attached connection.
    pub connected: Vec<ParticipantId>,
    /// Participants known to the media router.
    pub routed: Vec<ParticipantId>,
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Write one frame to the socket.
    Send { message: ServerMessage },
    /// Write one relayed media frame as a binary message.
    Media { frame: Bytes },
    /// Send a close frame and stop.
    Close { reason: String },
}
