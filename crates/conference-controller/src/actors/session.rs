//! `SessionActor`: one per live session.
//!
//! The actor is the single writer for everything live about its session:
//! admissions and leaves, the connection set, the [`MediaRouter`], moderation
//! and screen share. HTTP handlers and WebSocket readers both reach it through
//! [`SessionActorHandle`], so every mutation of a session is serialized here
//! before it touches the registry.
//!
//! Outbound frames are queued with `try_send`. A full queue evicts the
//! recipient with reason `slow_consumer`; the actor never waits on a client.
//!
//! When the last active participant leaves an ACTIVE session the actor
//! completes the session, stops any open recording, and exits.

use super::connection::{ConnectionActorHandle, OutboundError};
use super::messages::{SessionActorState, SessionMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::audit::{AuditKind, AuditLog};
use crate::config::Config;
use crate::errors::CcError;
use crate::media::{self, Delivery, MediaRouter, TrackRole};
use crate::models::api::{ScreenShareResponse, UpdateQualityResponse};
use crate::models::{Participant, Recording, Role, Session, SessionStatus};
use crate::moderation::{self, Actor, ModerationAction};
use crate::observability::metrics as prom;
use crate::quality::{
    start_quality_task, QualityController, QualityDecision, QualityTaskConfig, QualityTier,
    TelemetryStore,
};
use crate::recording::{RecordingOrchestrator, StartOptions};
use crate::registry::{Admission, LeaveOutcome, ScreenShareChange, SessionRegistry};
use crate::signaling::protocol::{ClientMessage, LeaveReason, ParticipantSummary, ServerMessage};

use bytes::Bytes;
use common::types::{ParticipantId, SessionId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Session mailbox capacity.
const SESSION_CHANNEL_BUFFER: usize = 500;

/// Capacity of the quality task -> actor channel.
const QUALITY_DECISION_BUFFER: usize = 32;

/// Per-session tunables taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ice_servers: Vec<String>,
    pub telemetry_interval: Duration,
    pub quality_hysteresis: u32,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            telemetry_interval: config.telemetry_interval(),
            quality_hysteresis: config.quality_hysteresis_samples,
        }
    }
}

/// Services shared by every session actor.
#[derive(Debug, Clone)]
pub struct SessionDeps {
    pub registry: Arc<SessionRegistry>,
    pub recordings: RecordingOrchestrator,
    pub telemetry: Arc<TelemetryStore>,
    pub audit: Arc<AuditLog>,
    pub metrics: Arc<ActorMetrics>,
    pub settings: SessionSettings,
}

/// Handle to a `SessionActor`.
#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: SessionId,
}

impl SessionActorHandle {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Admit a user without a connection.
    pub async fn admit(
        &self,
        user_id: UserId,
        display_name: String,
        role: Option<Role>,
    ) -> Result<Admission, CcError> {
        self.call(|respond_to| SessionMessage::Admit {
            user_id,
            display_name,
            role,
            respond_to,
        })
        .await?
    }

    /// Admit (idempotently) and attach a connection writer.
    pub async fn connect(
        &self,
        user_id: UserId,
        display_name: String,
        role: Option<Role>,
        connection: ConnectionActorHandle,
    ) -> Result<Participant, CcError> {
        self.call(|respond_to| SessionMessage::Connect {
            user_id,
            display_name,
            role,
            connection,
            respond_to,
        })
        .await?
    }

    pub async fn disconnected(
        &self,
        participant_id: ParticipantId,
        connection_id: u64,
    ) -> Result<(), CcError> {
        self.sender
            .send(SessionMessage::Disconnected {
                participant_id,
                connection_id,
            })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Forward an inbound frame. Errors are answered on the connection.
    pub async fn signal(
        &self,
        participant_id: ParticipantId,
        message: ClientMessage,
    ) -> Result<(), CcError> {
        self.sender
            .send(SessionMessage::Signal {
                participant_id,
                message,
            })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn leave(
        &self,
        participant_id: ParticipantId,
        reason: LeaveReason,
    ) -> Result<LeaveOutcome, CcError> {
        self.call(|tx| SessionMessage::Leave {
            participant_id,
            reason,
            respond_to: Some(tx),
        })
        .await?
    }

    pub async fn moderate(
        &self,
        actor: Actor,
        target: ParticipantId,
        action: ModerationAction,
    ) -> Result<Participant, CcError> {
        self.call(|respond_to| SessionMessage::Moderate {
            actor,
            target,
            action,
            respond_to,
        })
        .await?
    }

    pub async fn screen_share(
        &self,
        actor: Actor,
        sharer: ParticipantId,
        start: bool,
    ) -> Result<ScreenShareResponse, CcError> {
        self.call(|respond_to| SessionMessage::ScreenShare {
            actor,
            sharer,
            start,
            respond_to,
        })
        .await?
    }

    pub async fn set_quality(
        &self,
        participant_id: ParticipantId,
        quality: QualityTier,
    ) -> Result<UpdateQualityResponse, CcError> {
        self.call(|respond_to| SessionMessage::SetQuality {
            participant_id,
            quality,
            respond_to,
        })
        .await?
    }

    /// Relay a packet and report who it went to.
    pub async fn route_media(
        &self,
        from: ParticipantId,
        role: TrackRole,
        payload: Bytes,
    ) -> Result<Vec<Delivery>, CcError> {
        self.call(|tx| SessionMessage::Media {
            from,
            role,
            payload,
            respond_to: Some(tx),
        })
        .await
    }

    /// Relay a packet from a socket reader without waiting for the fan-out.
    pub async fn publish_media(
        &self,
        from: ParticipantId,
        role: TrackRole,
        payload: Bytes,
    ) -> Result<(), CcError> {
        self.sender
            .send(SessionMessage::Media {
                from,
                role,
                payload,
                respond_to: None,
            })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Open a recording. The actor re-checks that the session is ACTIVE.
    pub async fn start_recording(
        &self,
        requester_id: UserId,
        options: StartOptions,
    ) -> Result<Recording, CcError> {
        self.call(|respond_to| SessionMessage::StartRecording {
            requester_id,
            options,
            respond_to,
        })
        .await?
    }

    pub async fn stop_recording(&self, requester_id: UserId) -> Result<Recording, CcError> {
        self.call(|respond_to| SessionMessage::StopRecording {
            requester_id,
            respond_to,
        })
        .await?
    }

    /// Tell the actor its session was cancelled.
    pub async fn cancelled(&self) -> Result<(), CcError> {
        self.call(|respond_to| SessionMessage::Cancelled { respond_to })
            .await
    }

    pub async fn get_state(&self) -> Result<SessionActorState, CcError> {
        self.call(|respond_to| SessionMessage::GetState { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// The actor has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

struct ManagedConnection {
    connection_id: u64,
    handle: ConnectionActorHandle,
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_id: SessionId,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    deps: SessionDeps,
    /// Active rows present when the actor started.
    initial: Vec<Participant>,
    connections: HashMap<ParticipantId, ManagedConnection>,
    router: MediaRouter,
    quality: Arc<QualityController>,
    decisions_rx: mpsc::Receiver<Vec<QualityDecision>>,
    quality_cancel: CancellationToken,
    /// Recipients found unreachable while sending; removed after each message.
    evictions: Vec<(ParticipantId, LeaveReason)>,
    finished: bool,
    mailbox: MailboxMonitor,
}

impl SessionActor {
    /// Spawn the actor and its quality task.
    ///
    /// `active` is the session's current active rows.
    pub fn spawn(
        session: &Session,
        active: Vec<Participant>,
        deps: SessionDeps,
        cancel_token: CancellationToken,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (decisions_tx, decisions_rx) = mpsc::channel(QUALITY_DECISION_BUFFER);
        let session_id = session.id;

        let quality = Arc::new(QualityController::new(
            session.quality,
            deps.settings.quality_hysteresis,
        ));
        let quality_cancel = cancel_token.child_token();
        tokio::spawn(start_quality_task(
            QualityTaskConfig {
                session_id,
                interval: deps.settings.telemetry_interval,
                read_timeout: crate::quality::task::TELEMETRY_READ_TIMEOUT,
            },
            Arc::clone(&deps.telemetry),
            Arc::clone(&quality),
            decisions_tx,
            quality_cancel.clone(),
        ));

        let actor = Self {
            session_id,
            receiver,
            cancel_token: cancel_token.clone(),
            initial: active,
            connections: HashMap::new(),
            router: MediaRouter::new(),
            quality,
            decisions_rx,
            quality_cancel,
            evictions: Vec::new(),
            finished: false,
            mailbox: MailboxMonitor::new(ActorType::Session, session_id.to_string()),
            deps,
        };

        actor.deps.metrics.session_created();
        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            cancel_token,
            session_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "cc.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "cc.actor.session",
            session_id = %self.session_id,
            "SessionActor started"
        );
        self.bootstrap().await;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "cc.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    self.close_all_connections("server shutting down");
                    break;
                }

                Some(decisions) = self.decisions_rx.recv() => {
                    self.apply_quality_decisions(decisions).await;
                    self.process_evictions().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.observe(self.receiver.len());
                            self.handle_message(message).await;
                            self.process_evictions().await;
                        }
                        None => {
                            info!(
                                target: "cc.actor.session",
                                session_id = %self.session_id,
                                "SessionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }

            if self.finished {
                break;
            }
        }

        self.quality_cancel.cancel();
        self.deps.metrics.session_removed();

        info!(
            target: "cc.actor.session",
            session_id = %self.session_id,
            connections = self.connections.len(),
            messages_handled = self.mailbox.handled(),
            "SessionActor stopped"
        );
    }

    async fn bootstrap(&mut self) {
        for participant in std::mem::take(&mut self.initial) {
            self.router
                .add_participant(participant.id, participant.is_muted);
            if participant.is_screen_sharing {
                self.router.add_screen_track(participant.id);
            }
            self.quality.track(participant.id).await;
        }
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Admit {
                user_id,
                display_name,
                role,
                respond_to,
            } => {
                let result = self.handle_admit(user_id, &display_name, role).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Connect {
                user_id,
                display_name,
                role,
                connection,
                respond_to,
            } => {
                let result = self
                    .handle_connect(user_id, &display_name, role, connection)
                    .await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Disconnected {
                participant_id,
                connection_id,
            } => {
                let current = self
                    .connections
                    .get(&participant_id)
                    .is_some_and(|c| c.connection_id == connection_id);
                if current {
                    let _ = self
                        .remove_participant(participant_id, LeaveReason::Disconnected)
                        .await;
                }
            }

            SessionMessage::Signal {
                participant_id,
                message,
            } => {
                self.handle_signal(participant_id, message).await;
            }

            SessionMessage::Leave {
                participant_id,
                reason,
                respond_to,
            } => {
                let result = self.remove_participant(participant_id, reason).await;
                if let Some(tx) = respond_to {
                    let _ = tx.send(result);
                }
            }

            SessionMessage::Moderate {
                actor,
                target,
                action,
                respond_to,
            } => {
                let result = self.handle_moderate(actor, target, action).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::ScreenShare {
                actor,
                sharer,
                start,
                respond_to,
            } => {
                let result = self.handle_screen_share(actor, sharer, start).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::SetQuality {
                participant_id,
                quality,
                respond_to,
            } => {
                let result = self.handle_set_quality(participant_id, quality).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Media {
                from,
                role,
                payload,
                respond_to,
            } => {
                let deliveries = self.handle_media(from, role, &payload).await;
                if let Some(tx) = respond_to {
                    let _ = tx.send(deliveries);
                }
            }

            SessionMessage::StartRecording {
                requester_id,
                options,
                respond_to,
            } => {
                let result = self.handle_start_recording(requester_id, options).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::StopRecording {
                requester_id,
                respond_to,
            } => {
                let result = self.handle_stop_recording(requester_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Cancelled { respond_to } => {
                self.handle_cancelled();
                let _ = respond_to.send(());
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(SessionActorState {
                    session_id: self.session_id,
                    connected: self.connections.keys().copied().collect(),
                    routed: self.router.participants(),
                });
            }
        }
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn handle_admit(
        &mut self,
        user_id: UserId,
        display_name: &str,
        role: Option<Role>,
    ) -> Result<Admission, CcError> {
        let result = self
            .deps
            .registry
            .admit(self.session_id, user_id, role, display_name)
            .await;

        match &result {
            Ok(admission) => self.on_admitted(admission).await,
            Err(e) => {
                prom::record_admission(e.category().as_str());
                self.deps
                    .audit
                    .record(
                        self.session_id,
                        None,
                        AuditKind::Rejected,
                        format!("admit {user_id}: {}", e.code_str()),
                    )
                    .await;
            }
        }
        result
    }

    async fn on_admitted(&mut self, admission: &Admission) {
        let participant = &admission.participant;
        if self.router.contains(participant.id) {
            prom::record_admission("rejoined");
            return;
        }

        self.router
            .add_participant(participant.id, participant.is_muted);
        self.quality.track(participant.id).await;
        prom::record_admission("admitted");
        self.deps
            .audit
            .record(
                self.session_id,
                Some(participant.id),
                AuditKind::Admitted,
                format!("{} as {}", participant.user_id, participant.role.as_str()),
            )
            .await;

        self.broadcast(
            Some(participant.id),
            &ServerMessage::ParticipantJoined {
                session_id: self.session_id,
                participant: ParticipantSummary::from(participant),
            },
        );

        if admission.activated && admission.session.flags.auto_record {
            match self
                .deps
                .recordings
                .start(&admission.session, StartOptions::default())
                .await
            {
                Ok(recording) => info!(
                    target: "cc.actor.session",
                    session_id = %self.session_id,
                    recording_id = %recording.id,
                    "Auto-record started"
                ),
                Err(e) => warn!(
                    target: "cc.actor.session",
                    session_id = %self.session_id,
                    error = %e,
                    "Auto-record failed to start"
                ),
            }
        }
    }

    async fn handle_connect(
        &mut self,
        user_id: UserId,
        display_name: &str,
        role: Option<Role>,
        connection: ConnectionActorHandle,
    ) -> Result<Participant, CcError> {
        let admission = self.handle_admit(user_id, display_name, role).await?;
        let participant_id = admission.participant.id;

        let managed = ManagedConnection {
            connection_id: connection.connection_id(),
            handle: connection,
        };
        match self.connections.insert(participant_id, managed) {
            Some(previous) => previous.handle.close("replaced by a new connection"),
            None => self.deps.metrics.participant_connected(),
        }

        let participants = self
            .deps
            .registry
            .participants(self.session_id, false)
            .await?
            .iter()
            .map(ParticipantSummary::from)
            .collect();
        self.send_to(
            participant_id,
            ServerMessage::Joined {
                session_id: self.session_id,
                participant_id,
                participants,
                ice_servers: self.deps.settings.ice_servers.clone(),
            },
        );

        debug!(
            target: "cc.actor.session",
            session_id = %self.session_id,
            participant_id = %participant_id,
            connections = self.connections.len(),
            "Connection attached"
        );
        Ok(admission.participant)
    }

    async fn handle_signal(&mut self, participant_id: ParticipantId, message: ClientMessage) {
        if !self.connections.contains_key(&participant_id) {
            debug!(
                target: "cc.actor.session",
                participant_id = %participant_id,
                kind = message.kind(),
                "Signal from detached participant ignored"
            );
            return;
        }

        let started = Instant::now();
        let kind = message.kind();
        let session_id = self.session_id;

        if let Some(report) = message.telemetry(participant_id) {
            let now = self.deps.registry.clock().now();
            self.deps.telemetry.append(session_id, report, now).await;
            prom::record_message_latency(kind, started.elapsed());
            return;
        }

        let result = match message {
            ClientMessage::Offer { to, sdp, .. } => {
                self.relay(participant_id, to, kind, ServerMessage::Offer {
                    session_id,
                    from: participant_id,
                    to,
                    sdp,
                })
                .await
            }
            ClientMessage::Answer { to, sdp, .. } => {
                self.relay(participant_id, to, kind, ServerMessage::Answer {
                    session_id,
                    from: participant_id,
                    to,
                    sdp,
                })
                .await
            }
            ClientMessage::IceCandidate { to, candidate, .. } => {
                self.relay(participant_id, to, kind, ServerMessage::IceCandidate {
                    session_id,
                    from: participant_id,
                    to,
                    candidate,
                })
                .await
            }
            ClientMessage::Mute { target, .. } => {
                self.moderate_as(participant_id, target, ModerationAction::Mute)
                    .await
            }
            ClientMessage::Unmute { target, .. } => {
                self.moderate_as(participant_id, target, ModerationAction::Unmute)
                    .await
            }
            ClientMessage::Kick { target, .. } => {
                self.moderate_as(participant_id, target, ModerationAction::Kick)
                    .await
            }
            ClientMessage::StartScreenShare { .. } => {
                self.screen_share_as(participant_id, participant_id, true)
                    .await
            }
            ClientMessage::StopScreenShare { target, .. } => {
                self.screen_share_as(participant_id, target.unwrap_or(participant_id), false)
                    .await
            }
            ClientMessage::Ping { .. } => {
                self.send_to(participant_id, ServerMessage::Pong { session_id });
                Ok(())
            }
            ClientMessage::Leave { .. } => self
                .remove_participant(participant_id, LeaveReason::Left)
                .await
                .map(|_| ()),
            ClientMessage::Join { .. } => Err(CcError::InvalidArgument(
                "Connection has already joined".to_string(),
            )),
            ClientMessage::Stats { .. } => Ok(()),
        };

        if let Err(e) = result {
            debug!(
                target: "cc.actor.session",
                participant_id = %participant_id,
                kind,
                error = %e,
                "Signal rejected"
            );
            self.send_to(participant_id, ServerMessage::error(session_id, &e));
        }
        prom::record_message_latency(kind, started.elapsed());
    }

    /// Deliver a negotiation payload to exactly one recipient, at most once.
    async fn relay(
        &mut self,
        from: ParticipantId,
        to: ParticipantId,
        kind: &str,
        frame: ServerMessage,
    ) -> Result<(), CcError> {
        if from == to {
            return Err(CcError::InvalidArgument(
                "Cannot send negotiation to yourself".to_string(),
            ));
        }

        let delivered = self.connections.contains_key(&to) && self.send_to(to, frame);
        let (kind_label, outcome) = if delivered {
            (AuditKind::Relayed, "delivered")
        } else {
            debug!(
                target: "cc.actor.session",
                session_id = %self.session_id,
                from = %from,
                to = %to,
                kind,
                "Recipient not connected, dropping"
            );
            (AuditKind::Dropped, "dropped")
        };
        prom::record_relay(outcome);
        self.deps
            .audit
            .record(self.session_id, Some(from), kind_label, format!("{kind} to {to}"))
            .await;
        Ok(())
    }

    async fn actor_for(&self, participant_id: ParticipantId) -> Result<Actor, CcError> {
        let participant = self.active_participant(participant_id).await?;
        Ok(Actor::from_participant(&participant))
    }

    async fn moderate_as(
        &mut self,
        participant_id: ParticipantId,
        target: ParticipantId,
        action: ModerationAction,
    ) -> Result<(), CcError> {
        let actor = self.actor_for(participant_id).await?;
        self.handle_moderate(actor, target, action).await.map(|_| ())
    }

    async fn screen_share_as(
        &mut self,
        participant_id: ParticipantId,
        sharer: ParticipantId,
        start: bool,
    ) -> Result<(), CcError> {
        let actor = self.actor_for(participant_id).await?;
        self.handle_screen_share(actor, sharer, start)
            .await
            .map(|_| ())
    }

    async fn reject(&self, actor: &Actor, action: ModerationAction, target: ParticipantId, err: &CcError) {
        prom::record_moderation(action.as_str(), "rejected");
        self.deps
            .audit
            .record(
                self.session_id,
                actor.participant_id,
                AuditKind::Rejected,
                format!("{} {target} by {}: {}", action.as_str(), actor.user_id, err.code_str()),
            )
            .await;
    }

    #[instrument(skip_all, fields(action = action.as_str(), target = %target_id))]
    async fn handle_moderate(
        &mut self,
        actor: Actor,
        target_id: ParticipantId,
        action: ModerationAction,
    ) -> Result<Participant, CcError> {
        let target = self.active_participant(target_id).await?;
        if let Err(e) = moderation::authorize(&actor, &target, action) {
            self.reject(&actor, action, target_id, &e).await;
            return Err(e);
        }

        let updated = match action {
            ModerationAction::Mute | ModerationAction::Unmute => {
                let muted = action == ModerationAction::Mute;
                let participant = self
                    .deps
                    .registry
                    .set_muted(self.session_id, target_id, muted)
                    .await?;
                self.router.set_muted(target_id, muted);
                self.broadcast(
                    actor.participant_id,
                    &ServerMessage::MuteChanged {
                        session_id: self.session_id,
                        target: target_id,
                        muted,
                        by: actor.user_id,
                    },
                );
                participant
            }
            ModerationAction::Kick => {
                self.send_to(
                    target_id,
                    ServerMessage::Kicked {
                        session_id: self.session_id,
                        by: actor.user_id,
                    },
                );
                self.remove_participant(target_id, LeaveReason::Kicked)
                    .await?
                    .participant
            }
            ModerationAction::StartScreenShare | ModerationAction::StopScreenShare => {
                return Err(CcError::Internal(format!(
                    "{} routed as moderation",
                    action.as_str()
                )));
            }
        };

        prom::record_moderation(action.as_str(), "applied");
        self.deps
            .audit
            .record(
                self.session_id,
                actor.participant_id,
                AuditKind::Moderation,
                format!("{} {target_id} by {}", action.as_str(), actor.user_id),
            )
            .await;
        Ok(updated)
    }

    async fn handle_screen_share(
        &mut self,
        actor: Actor,
        sharer_id: ParticipantId,
        start: bool,
    ) -> Result<ScreenShareResponse, CcError> {
        let action = if start {
            ModerationAction::StartScreenShare
        } else {
            ModerationAction::StopScreenShare
        };
        let sharer = self.active_participant(sharer_id).await?;
        let session = self.deps.registry.get(self.session_id).await?;

        let check = if start {
            if actor.participant_id == Some(sharer_id) {
                moderation::authorize_screen_share_start(&actor, &session)
            } else {
                Err(CcError::NotAuthorized(
                    "Participants can only start their own screen share".to_string(),
                ))
            }
        } else {
            moderation::authorize_screen_share_stop(&actor, &sharer)
        };
        if let Err(e) = check {
            self.reject(&actor, action, sharer_id, &e).await;
            return Err(e);
        }

        if start {
            let change = self
                .deps
                .registry
                .start_screen_share(self.session_id, sharer_id)
                .await?;
            let track_id = self.router.add_screen_track(sharer_id);
            if change == ScreenShareChange::Started {
                if let Some(track_id) = &track_id {
                    self.broadcast(
                        Some(sharer_id),
                        &ServerMessage::ScreenShareStarted {
                            session_id: self.session_id,
                            participant_id: sharer_id,
                            track_id: track_id.clone(),
                        },
                    );
                }
                self.deps
                    .audit
                    .record(self.session_id, Some(sharer_id), AuditKind::ScreenShare, "started")
                    .await;
            }
            Ok(ScreenShareResponse {
                participant_id: sharer_id,
                is_screen_sharing: true,
                track_id,
            })
        } else {
            let change = self
                .deps
                .registry
                .stop_screen_share(self.session_id, sharer_id)
                .await?;
            if change == ScreenShareChange::Stopped {
                self.router.remove_screen_track(sharer_id);
                self.broadcast(
                    actor.participant_id,
                    &ServerMessage::ScreenShareStopped {
                        session_id: self.session_id,
                        participant_id: sharer_id,
                    },
                );
                self.deps
                    .audit
                    .record(
                        self.session_id,
                        Some(sharer_id),
                        AuditKind::ScreenShare,
                        format!("stopped by {}", actor.user_id),
                    )
                    .await;
            }
            Ok(ScreenShareResponse {
                participant_id: sharer_id,
                is_screen_sharing: false,
                track_id: None,
            })
        }
    }

    async fn handle_set_quality(
        &mut self,
        participant_id: ParticipantId,
        requested: QualityTier,
    ) -> Result<UpdateQualityResponse, CcError> {
        self.active_participant(participant_id).await?;
        self.quality.track(participant_id).await;
        let decision = self
            .quality
            .override_tier(participant_id, requested)
            .await
            .ok_or_else(|| CcError::Internal("quality state missing".to_string()))?;

        self.apply_quality_decisions(vec![decision]).await;
        Ok(UpdateQualityResponse {
            participant_id,
            quality: decision.to,
            bitrate_kbps: decision.bitrate_kbps,
        })
    }

    async fn apply_quality_decisions(&mut self, decisions: Vec<QualityDecision>) {
        for decision in decisions {
            if !self.router.contains(decision.participant_id) {
                continue;
            }
            if let Err(e) = self
                .deps
                .registry
                .set_quality(self.session_id, decision.participant_id, decision.to)
                .await
            {
                debug!(target: "cc.quality", error = %e, "Quality decision for departed participant");
                continue;
            }

            prom::record_quality_transition(decision.direction.as_str());
            self.send_to(
                decision.participant_id,
                ServerMessage::QualityChange {
                    session_id: self.session_id,
                    participant_id: decision.participant_id,
                    quality: decision.to,
                    bitrate_kbps: decision.bitrate_kbps,
                },
            );
            self.deps
                .audit
                .record(
                    self.session_id,
                    Some(decision.participant_id),
                    AuditKind::QualityChanged,
                    format!(
                        "{} {} -> {} at {} kbps",
                        decision.direction.as_str(),
                        decision.from,
                        decision.to,
                        decision.bitrate_kbps
                    ),
                )
                .await;
            info!(
                target: "cc.quality",
                session_id = %self.session_id,
                participant_id = %decision.participant_id,
                from = %decision.from,
                to = %decision.to,
                direction = decision.direction.as_str(),
                "Quality tier changed"
            );
        }
    }

    /// Push a packet to every subscriber's socket and tap it for recording.
    async fn handle_media(
        &mut self,
        from: ParticipantId,
        role: TrackRole,
        payload: &Bytes,
    ) -> Vec<Delivery> {
        let deliveries = self.router.route_packet(from, role, payload);
        if !deliveries.is_empty() {
            let frame = media::frame::encode_outbound(from, role, payload);
            for delivery in &deliveries {
                self.send_media_to(delivery.to, frame.clone());
            }
        }
        if self.router.contains(from) {
            self.deps.recordings.capture(self.session_id, payload).await;
        }
        deliveries
    }

    /// The registry is re-read here, so a session that completed or was
    /// cancelled ahead of this message is rejected.
    async fn handle_start_recording(
        &mut self,
        requester_id: UserId,
        options: StartOptions,
    ) -> Result<Recording, CcError> {
        let session = self.deps.registry.get(self.session_id).await?;
        require_recording_control(&session, requester_id)?;
        if self.finished {
            return Err(CcError::InvalidTransition {
                from: session.status.as_str().to_string(),
                event: "record".to_string(),
            });
        }
        self.deps.recordings.start(&session, options).await
    }

    async fn handle_stop_recording(&mut self, requester_id: UserId) -> Result<Recording, CcError> {
        let session = self.deps.registry.get(self.session_id).await?;
        require_recording_control(&session, requester_id)?;
        let now = self.deps.registry.clock().now();
        self.deps
            .recordings
            .stop(self.session_id, now)
            .await
            .ok_or_else(|| {
                CcError::RecordingNotFound(format!("no open recording for session {}", self.session_id))
            })
    }

    fn handle_cancelled(&mut self) {
        for (participant_id, managed) in self.connections.drain() {
            let _ = managed.handle.try_send(ServerMessage::ParticipantLeft {
                session_id: self.session_id,
                participant_id,
                reason: LeaveReason::Cancelled,
            });
            managed.handle.close("session cancelled");
            self.deps.metrics.participant_disconnected();
        }
        self.router = MediaRouter::new();
        self.finished = true;
        info!(
            target: "cc.actor.session",
            session_id = %self.session_id,
            "Session cancelled, actor exiting"
        );
    }

    /// Close the participant's row and tear down its live state.
    async fn remove_participant(
        &mut self,
        participant_id: ParticipantId,
        reason: LeaveReason,
    ) -> Result<LeaveOutcome, CcError> {
        let mut outcome = self
            .deps
            .registry
            .leave(self.session_id, participant_id)
            .await?;

        if let Some(managed) = self.connections.remove(&participant_id) {
            match reason {
                LeaveReason::Disconnected | LeaveReason::SlowConsumer => managed.handle.cancel(),
                _ => managed.handle.close(reason.as_str()),
            }
            self.deps.metrics.participant_disconnected();
        }

        if self.router.remove_participant(participant_id) {
            self.quality.forget(participant_id).await;
            prom::record_participant_removed(reason.as_str());
            self.deps
                .audit
                .record(
                    self.session_id,
                    Some(participant_id),
                    AuditKind::Left,
                    reason.as_str(),
                )
                .await;

            if outcome.closed_screen_share {
                self.broadcast(
                    None,
                    &ServerMessage::ScreenShareStopped {
                        session_id: self.session_id,
                        participant_id,
                    },
                );
            }
            self.broadcast(
                None,
                &ServerMessage::ParticipantLeft {
                    session_id: self.session_id,
                    participant_id,
                    reason,
                },
            );
            info!(
                target: "cc.actor.session",
                session_id = %self.session_id,
                participant_id = %participant_id,
                reason = reason.as_str(),
                remaining = outcome.remaining_active,
                "Participant removed"
            );
        }

        if outcome.remaining_active == 0 && outcome.session_status == SessionStatus::Active {
            self.complete_session().await;
            if self.finished {
                outcome.session_status = SessionStatus::Completed;
            }
        }
        Ok(outcome)
    }

    async fn complete_session(&mut self) {
        match self.deps.registry.complete(self.session_id).await {
            Ok(session) => {
                let completed_at = session
                    .completed_at
                    .unwrap_or_else(|| self.deps.registry.clock().now());
                if let Some(recording) = self.deps.recordings.stop(self.session_id, completed_at).await {
                    info!(
                        target: "cc.actor.session",
                        session_id = %self.session_id,
                        recording_id = %recording.id,
                        "Recording finalized on completion"
                    );
                }
                self.finished = true;
            }
            Err(e) => warn!(
                target: "cc.actor.session",
                session_id = %self.session_id,
                error = %e,
                "Failed to complete session"
            ),
        }
    }

    async fn active_participant(&self, participant_id: ParticipantId) -> Result<Participant, CcError> {
        let participant = self
            .deps
            .registry
            .participant(self.session_id, participant_id)
            .await?;
        if participant.is_active() {
            Ok(participant)
        } else {
            Err(CcError::ParticipantNotFound(participant_id.to_string()))
        }
    }

    /// Queue a frame for one participant. Returns false if it was not queued.
    fn send_to(&mut self, to: ParticipantId, message: ServerMessage) -> bool {
        let Some(managed) = self.connections.get(&to) else {
            return false;
        };
        let result = managed.handle.try_send(message);
        self.queued(to, result)
    }

    fn send_media_to(&mut self, to: ParticipantId, frame: Bytes) -> bool {
        let Some(managed) = self.connections.get(&to) else {
            return false;
        };
        let result = managed.handle.try_send_media(frame);
        self.queued(to, result)
    }

    /// Schedule an eviction for a recipient whose queue is full or gone.
    fn queued(&mut self, to: ParticipantId, result: Result<(), OutboundError>) -> bool {
        match result {
            Ok(()) => true,
            Err(OutboundError::Full) => {
                warn!(
                    target: "cc.actor.session",
                    session_id = %self.session_id,
                    participant_id = %to,
                    "Outbound queue full, evicting slow consumer"
                );
                prom::record_message_dropped(ActorType::Connection.as_str());
                self.evictions.push((to, LeaveReason::SlowConsumer));
                false
            }
            Err(OutboundError::Closed) => {
                self.evictions.push((to, LeaveReason::Disconnected));
                false
            }
        }
    }

    /// Fan a frame out to every connected participant except `except`.
    fn broadcast(&mut self, except: Option<ParticipantId>, message: &ServerMessage) {
        let recipients: Vec<ParticipantId> = self
            .connections
            .keys()
            .filter(|id| Some(**id) != except)
            .copied()
            .collect();
        for to in recipients {
            self.send_to(to, message.clone());
        }
    }

    async fn process_evictions(&mut self) {
        while let Some((participant_id, reason)) = self.evictions.pop() {
            if !self.connections.contains_key(&participant_id) {
                continue;
            }
            if let Err(e) = self.remove_participant(participant_id, reason).await {
                warn!(
                    target: "cc.actor.session",
                    participant_id = %participant_id,
                    error = %e,
                    "Eviction failed"
                );
            }
        }
    }

    fn close_all_connections(&mut self, reason: &str) {
        for (_, managed) in self.connections.drain() {
            managed.handle.close(reason);
            self.deps.metrics.participant_disconnected();
        }
    }
}

fn require_recording_control(session: &Session, requester_id: UserId) -> Result<(), CcError> {
    if session.instructor_id == requester_id {
        Ok(())
    } else {
        Err(CcError::NotAuthorized(
            "Only the session instructor can control recording".to_string(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::ConnectionMessage;
    use crate::models::api::ScheduleSessionRequest;
    use crate::models::{QualitySettings, RecordingStatus, SessionFlags};
    use crate::recording::{InMemoryObjectStore, RecordingSettings, BACKOFF_BASE, BACKOFF_MAX};
    use crate::registry::RegistrySettings;
    use chrono::{DateTime, Utc};
    use common::clock::ManualClock;

    struct Fixture {
        deps: SessionDeps,
        session: Session,
        instructor: UserId,
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-04T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn fixture(flags: SessionFlags) -> Fixture {
        let clock = Arc::new(ManualClock::new(t0()));
        let registry = Arc::new(SessionRegistry::new(
            RegistrySettings {
                join_url_base: "https://example.com/join".to_string(),
                join_window: chrono::Duration::minutes(10),
                default_max_participants: 50,
            },
            clock.clone(),
        ));
        let recordings = RecordingOrchestrator::new(
            RecordingSettings {
                bucket: "rec".to_string(),
                sla: chrono::Duration::minutes(30),
                max_attempts: 3,
                upload_timeout: Duration::from_secs(5),
                backoff_base: BACKOFF_BASE,
                backoff_max: BACKOFF_MAX,
            },
            clock.clone(),
            Arc::new(InMemoryObjectStore::new()),
        );
        let instructor = UserId::new();
        let session = registry
            .schedule(ScheduleSessionRequest {
                instructor_id: instructor,
                title: "Algorithms".to_string(),
                description: String::new(),
                start_time: t0() + chrono::Duration::minutes(5),
                duration_minutes: 60,
                max_participants: Some(10),
                flags,
                quality: QualitySettings::default(),
            })
            .await
            .unwrap();

        Fixture {
            deps: SessionDeps {
                registry,
                recordings,
                telemetry: Arc::new(TelemetryStore::new()),
                audit: Arc::new(AuditLog::new(clock)),
                metrics: ActorMetrics::new(),
                settings: SessionSettings {
                    ice_servers: vec!["stun:stun.example.com:3478".to_string()],
                    telemetry_interval: Duration::from_millis(50),
                    quality_hysteresis: 3,
                },
            },
            session,
            instructor,
        }
    }

    fn spawn(f: &Fixture) -> (SessionActorHandle, JoinHandle<()>) {
        SessionActor::spawn(&f.session, Vec::new(), f.deps.clone(), CancellationToken::new())
    }

    async fn connect(
        handle: &SessionActorHandle,
        user_id: UserId,
        capacity: usize,
    ) -> (Participant, mpsc::Receiver<ConnectionMessage>) {
        let (conn, rx) = ConnectionActorHandle::detached(capacity);
        let participant = handle
            .connect(user_id, "user".to_string(), None, conn)
            .await
            .unwrap();
        (participant, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ConnectionMessage>) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let ConnectionMessage::Send { message } = message {
                frames.push(message);
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_connect_sends_joined_and_fans_out() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);

        let (prof, mut prof_rx) = connect(&handle, f.instructor, 16).await;
        assert_eq!(prof.role, Role::Instructor);
        let frames = drain(&mut prof_rx);
        assert!(matches!(
            frames.first(),
            Some(ServerMessage::Joined { participant_id, ice_servers, .. })
                if *participant_id == prof.id && ice_servers.len() == 1
        ));

        let (student, _student_rx) = connect(&handle, UserId::new(), 16).await;
        let frames = drain(&mut prof_rx);
        assert!(frames.iter().any(|m| matches!(
            m,
            ServerMessage::ParticipantJoined { participant, .. } if participant.participant_id == student.id
        )));

        let state = handle.get_state().await.unwrap();
        assert_eq!(state.connected.len(), 2);
        assert_eq!(state.routed.len(), 2);
    }

    #[tokio::test]
    async fn test_http_admit_then_ws_connect_is_same_participant() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);
        let user = UserId::new();

        let admission = handle.admit(user, "Sam".to_string(), None).await.unwrap();
        let (participant, _rx) = connect(&handle, user, 8).await;
        assert_eq!(admission.participant.id, participant.id);
        assert_eq!(f.deps.registry.active_count(f.session.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_relay_to_named_recipient_only() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);
        let (a, mut a_rx) = connect(&handle, f.instructor, 16).await;
        let (b, mut b_rx) = connect(&handle, UserId::new(), 16).await;
        let (_c, mut c_rx) = connect(&handle, UserId::new(), 16).await;
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        handle
            .signal(
                a.id,
                ClientMessage::Offer {
                    session_id: f.session.id,
                    to: b.id,
                    sdp: "v=0 o=- 1 2 IN IP4 127.0.0.1".to_string(),
                },
            )
            .await
            .unwrap();
        handle.get_state().await.unwrap();

        let frames = drain(&mut b_rx);
        assert!(matches!(
            frames.as_slice(),
            [ServerMessage::Offer { from, sdp, .. }] if *from == a.id && sdp.starts_with("v=0")
        ));
        assert!(drain(&mut c_rx).is_empty());
        assert_eq!(f.deps.audit.count(f.session.id, AuditKind::Relayed).await, 1);
    }

    #[tokio::test]
    async fn test_relay_to_disconnected_recipient_is_dropped() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);
        let (a, mut a_rx) = connect(&handle, f.instructor, 16).await;
        // Admitted over HTTP, never connected.
        let b = handle
            .admit(UserId::new(), "offline".to_string(), None)
            .await
            .unwrap()
            .participant;
        drain(&mut a_rx);

        handle
            .signal(
                a.id,
                ClientMessage::IceCandidate {
                    session_id: f.session.id,
                    to: b.id,
                    candidate: "candidate:1".to_string(),
                },
            )
            .await
            .unwrap();
        handle.get_state().await.unwrap();

        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(f.deps.audit.count(f.session.id, AuditKind::Dropped).await, 1);
    }

    #[tokio::test]
    async fn test_student_mute_rejected_without_relay() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);
        let (_prof, mut prof_rx) = connect(&handle, f.instructor, 16).await;
        let (s1, mut s1_rx) = connect(&handle, UserId::new(), 16).await;
        let (s2, mut s2_rx) = connect(&handle, UserId::new(), 16).await;
        drain(&mut prof_rx);
        drain(&mut s1_rx);
        drain(&mut s2_rx);

        handle
            .signal(
                s1.id,
                ClientMessage::Mute {
                    session_id: f.session.id,
                    target: s2.id,
                },
            )
            .await
            .unwrap();
        handle.get_state().await.unwrap();

        let s1_frames = drain(&mut s1_rx);
        assert!(matches!(
            s1_frames.as_slice(),
            [ServerMessage::Error { code, .. }] if code == "NOT_AUTHORIZED"
        ));
        assert!(drain(&mut s2_rx).is_empty());
        assert!(drain(&mut prof_rx).is_empty());
        assert!(!f.deps.registry.participant(f.session.id, s2.id).await.unwrap().is_muted);
        assert_eq!(f.deps.audit.count(f.session.id, AuditKind::Rejected).await, 1);
    }

    #[tokio::test]
    async fn test_kick_closes_target_and_notifies_others() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);
        let (prof, mut prof_rx) = connect(&handle, f.instructor, 16).await;
        let (s1, mut s1_rx) = connect(&handle, UserId::new(), 16).await;
        let (_s2, mut s2_rx) = connect(&handle, UserId::new(), 16).await;
        drain(&mut prof_rx);
        drain(&mut s1_rx);
        drain(&mut s2_rx);

        let kicked = handle
            .moderate(
                Actor::resolve(&f.session, f.instructor, Some(prof.id)),
                s1.id,
                ModerationAction::Kick,
            )
            .await
            .unwrap();
        assert!(!kicked.is_active());

        let mut saw_kicked = false;
        let mut saw_close = false;
        while let Ok(message) = s1_rx.try_recv() {
            match message {
                ConnectionMessage::Send { message: ServerMessage::Kicked { .. } } => saw_kicked = true,
                ConnectionMessage::Close { .. } => saw_close = true,
                ConnectionMessage::Send { .. } | ConnectionMessage::Media { .. } => {}
            }
        }
        assert!(saw_kicked && saw_close);

        assert!(drain(&mut s2_rx).iter().any(|m| matches!(
            m,
            ServerMessage::ParticipantLeft { participant_id, reason: LeaveReason::Kicked, .. }
                if *participant_id == s1.id
        )));
        assert!(!handle.get_state().await.unwrap().routed.contains(&s1.id));
    }

    #[tokio::test]
    async fn test_slow_consumer_is_evicted() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);
        let (a, mut a_rx) = connect(&handle, f.instructor, 16).await;
        // Capacity 1: the joined frame fills the queue.
        let (b, _b_rx) = connect(&handle, UserId::new(), 1).await;
        drain(&mut a_rx);

        handle
            .signal(
                a.id,
                ClientMessage::Offer {
                    session_id: f.session.id,
                    to: b.id,
                    sdp: "sdp".to_string(),
                },
            )
            .await
            .unwrap();
        let state = handle.get_state().await.unwrap();

        assert!(!state.connected.contains(&b.id));
        assert!(drain(&mut a_rx).iter().any(|m| matches!(
            m,
            ServerMessage::ParticipantLeft { reason: LeaveReason::SlowConsumer, .. }
        )));
        assert!(!f.deps.registry.participant(f.session.id, b.id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_last_leave_completes_and_finalizes_recording() {
        let f = fixture(SessionFlags {
            auto_record: true,
            ..SessionFlags::default()
        })
        .await;
        let (handle, task) = spawn(&f);
        let (prof, _rx) = connect(&handle, f.instructor, 16).await;
        assert!(f.deps.recordings.is_recording(f.session.id).await);

        let outcome = handle.leave(prof.id, LeaveReason::Left).await.unwrap();
        assert_eq!(outcome.remaining_active, 0);
        task.await.unwrap();

        let session = f.deps.registry.get(f.session.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        let recordings = f.deps.recordings.list(Some(f.session.id), None, None).await;
        let recording = recordings.items.first().unwrap();
        assert_ne!(recording.status, RecordingStatus::Recording);
        assert_eq!(
            recording.available_at,
            session.completed_at.map(|at| at + chrono::Duration::minutes(30))
        );
    }

    #[tokio::test]
    async fn test_screen_share_start_twice_is_one_interval() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);
        let (s1, _rx) = connect(&handle, UserId::new(), 16).await;
        let actor = Actor::from_participant(&s1);

        let first = handle.screen_share(actor, s1.id, true).await.unwrap();
        let second = handle.screen_share(actor, s1.id, true).await.unwrap();
        assert_eq!(first.track_id, second.track_id);
        assert!(first.track_id.unwrap().ends_with("-screen"));

        let shares = f.deps.registry.screen_shares(f.session.id).await.unwrap();
        assert_eq!(shares.iter().filter(|s| s.is_open()).count(), 1);
    }

    #[tokio::test]
    async fn test_media_relay_taps_recording() {
        let f = fixture(SessionFlags {
            auto_record: true,
            ..SessionFlags::default()
        })
        .await;
        let (handle, _task) = spawn(&f);
        let (a, _a_rx) = connect(&handle, f.instructor, 16).await;
        let (b, _b_rx) = connect(&handle, UserId::new(), 16).await;

        let deliveries = handle
            .route_media(a.id, TrackRole::Camera, Bytes::from_static(b"frame"))
            .await
            .unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries.first().unwrap().to, b.id);
    }

    fn media_frames(rx: &mut mpsc::Receiver<ConnectionMessage>) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let ConnectionMessage::Media { frame } = message {
                frames.push(frame);
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_published_media_reaches_other_sockets() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);
        let (a, mut a_rx) = connect(&handle, f.instructor, 16).await;
        let (_b, mut b_rx) = connect(&handle, UserId::new(), 16).await;
        media_frames(&mut a_rx);
        media_frames(&mut b_rx);

        handle
            .publish_media(a.id, TrackRole::Camera, Bytes::from_static(b"frame"))
            .await
            .unwrap();
        // Request-reply behind it orders the check after the relay.
        handle.get_state().await.unwrap();

        let frames = media_frames(&mut b_rx);
        assert_eq!(frames.len(), 1);
        let (role, publisher, payload) =
            media::frame::decode_outbound(frames.first().unwrap()).unwrap();
        assert_eq!(role, TrackRole::Camera);
        assert_eq!(publisher, a.id);
        assert_eq!(payload, Bytes::from_static(b"frame"));

        assert!(media_frames(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_muted_audio_not_relayed() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);
        let (prof, _prof_rx) = connect(&handle, f.instructor, 16).await;
        let (student, _student_rx) = connect(&handle, UserId::new(), 16).await;
        let (_other, mut other_rx) = connect(&handle, UserId::new(), 16).await;

        handle
            .moderate(
                Actor::resolve(&f.session, f.instructor, Some(prof.id)),
                student.id,
                ModerationAction::Mute,
            )
            .await
            .unwrap();
        media_frames(&mut other_rx);

        let deliveries = handle
            .route_media(student.id, TrackRole::Microphone, Bytes::from_static(b"voice"))
            .await
            .unwrap();
        assert!(deliveries.is_empty());
        assert!(media_frames(&mut other_rx).is_empty());

        // Video from a muted participant still flows.
        let deliveries = handle
            .route_media(student.id, TrackRole::Camera, Bytes::from_static(b"face"))
            .await
            .unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(media_frames(&mut other_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_on_media_evicts_slow_consumer() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);
        let (a, _a_rx) = connect(&handle, f.instructor, 16).await;
        // Nothing drains this queue.
        let (slow, _slow_rx) = connect(&handle, UserId::new(), 2).await;

        for _ in 0..4 {
            handle
                .route_media(a.id, TrackRole::Camera, Bytes::from_static(b"frame"))
                .await
                .unwrap();
        }

        let state = handle.get_state().await.unwrap();
        assert!(!state.connected.contains(&slow.id));
        let row = f.deps.registry.participant(f.session.id, slow.id).await.unwrap();
        assert!(!row.is_active());
    }

    #[tokio::test]
    async fn test_recording_control_requires_instructor() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, _task) = spawn(&f);
        let (_prof, _prof_rx) = connect(&handle, f.instructor, 16).await;
        let student = UserId::new();
        let (_s, _s_rx) = connect(&handle, student, 16).await;

        assert!(matches!(
            handle.start_recording(student, StartOptions::default()).await,
            Err(CcError::NotAuthorized(_))
        ));
        let recording = handle
            .start_recording(f.instructor, StartOptions::default())
            .await
            .unwrap();
        assert_eq!(recording.status, RecordingStatus::Recording);

        let stopped = handle.stop_recording(f.instructor).await.unwrap();
        assert_eq!(stopped.id, recording.id);
        assert_eq!(stopped.status, RecordingStatus::Processing);
        assert!(matches!(
            handle.stop_recording(f.instructor).await,
            Err(CcError::RecordingNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_recording_queued_behind_last_leave_is_rejected() {
        let f = fixture(SessionFlags::default()).await;
        let (handle, task) = spawn(&f);
        let (prof, _prof_rx) = connect(&handle, f.instructor, 16).await;

        // Both land in the mailbox before the actor handles either.
        let leave = handle.leave(prof.id, LeaveReason::Left);
        let start = handle.start_recording(f.instructor, StartOptions::default());
        let (left, started) = tokio::join!(leave, start);

        assert_eq!(left.unwrap().session_status, SessionStatus::Completed);
        assert!(started.is_err());
        task.await.unwrap();

        assert!(!f.deps.recordings.is_recording(f.session.id).await);
        let recordings = f.deps.recordings.list(Some(f.session.id), None, None).await;
        assert!(recordings.items.is_empty());
    }
}
