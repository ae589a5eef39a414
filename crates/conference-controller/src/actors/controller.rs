//! `SessionControllerActor`: singleton supervisor for session actors.
//!
//! - Spawns a `SessionActor` the first time a live operation touches a session
//! - Owns the root `CancellationToken`; every session actor gets a child
//! - Reaps finished session actors and records panics
//!
//! # Graceful Shutdown
//!
//! On shutdown the controller stops handing out new session actors, cancels
//! the root token and waits (bounded by the deadline) for every session actor
//! to exit.

use crate::errors::CcError;

use super::messages::{ControllerMessage, ControllerStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{SessionActor, SessionActorHandle, SessionDeps};
use crate::registry::lifecycle::{transition, LifecycleEvent};

use common::types::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// How often idle controllers look for exited session actors.
const REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to the `SessionControllerActor`.
#[derive(Clone, Debug)]
pub struct SessionControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
}

impl SessionControllerHandle {
    /// Spawn the controller and return a handle to it.
    #[must_use]
    pub fn new(deps: SessionDeps) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionControllerActor::new(receiver, cancel_token.clone(), deps);
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Handle to the live actor for `session_id`, spawning one if needed.
    ///
    /// Fails for unknown or terminal sessions and while draining.
    pub async fn get_or_spawn(&self, session_id: SessionId) -> Result<SessionActorHandle, CcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetOrSpawn {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Handle to the actor for `session_id` if one is running.
    pub async fn get(&self, session_id: SessionId) -> Result<Option<SessionActorHandle>, CcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::Get {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn get_status(&self) -> Result<ControllerStatus, CcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting sessions and wait up to `deadline` for actors to exit.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), CcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the controller and every session actor immediately.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for actors that should stop with the controller.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedSession {
    handle: SessionActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `SessionControllerActor` implementation.
pub struct SessionControllerActor {
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Root token.
    cancel_token: CancellationToken,
    deps: SessionDeps,
    sessions: HashMap<SessionId, ManagedSession>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SessionControllerActor {
    fn new(
        receiver: mpsc::Receiver<ControllerMessage>,
        cancel_token: CancellationToken,
        deps: SessionDeps,
    ) -> Self {
        Self {
            receiver,
            cancel_token,
            metrics: Arc::clone(&deps.metrics),
            deps,
            sessions: HashMap::new(),
            accepting_new: true,
            mailbox: MailboxMonitor::new(ActorType::Controller, "controller"),
        }
    }

    #[instrument(skip_all, name = "cc.actor.controller")]
    async fn run(mut self) {
        info!(target: "cc.actor.controller", "SessionControllerActor started");

        let mut reap = tokio::time::interval(REAP_INTERVAL);
        reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            self.check_session_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "cc.actor.controller",
                        "SessionControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown(Duration::from_secs(30)).await;
                    break;
                }

                _ = reap.tick() => {}

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.observe(self.receiver.len());
                            self.handle_message(message).await;
                        }
                        None => {
                            info!(
                                target: "cc.actor.controller",
                                "SessionControllerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "cc.actor.controller",
            sessions_remaining = self.sessions.len(),
            messages_handled = self.mailbox.handled(),
            "SessionControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::GetOrSpawn {
                session_id,
                respond_to,
            } => {
                let result = self.get_or_spawn(session_id).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::Get {
                session_id,
                respond_to,
            } => {
                let handle = self
                    .sessions
                    .get(&session_id)
                    .filter(|m| !m.handle.is_closed())
                    .map(|m| m.handle.clone());
                let _ = respond_to.send(handle);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                self.graceful_shutdown(deadline).await;
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    async fn get_or_spawn(&mut self, session_id: SessionId) -> Result<SessionActorHandle, CcError> {
        if !self.accepting_new {
            return Err(CcError::Draining);
        }

        let session = self.deps.registry.get(session_id).await?;
        // Terminal sessions get the same rejection as a direct admission.
        transition(session.status, LifecycleEvent::Admit)?;

        if let Some(managed) = self.sessions.get(&session_id) {
            if !managed.handle.is_closed() && !managed.task_handle.is_finished() {
                return Ok(managed.handle.clone());
            }
        }
        // A stale entry is reaped before respawning.
        if let Some(stale) = self.sessions.remove(&session_id) {
            Self::observe_exit(session_id, stale.task_handle, &self.metrics).await;
        }

        let active = self.deps.registry.participants(session_id, false).await?;
        debug!(
            target: "cc.actor.controller",
            session_id = %session_id,
            active = active.len(),
            "Spawning session actor"
        );

        let (handle, task_handle) = SessionActor::spawn(
            &session,
            active,
            self.deps.clone(),
            self.cancel_token.child_token(),
        );
        self.sessions.insert(
            session_id,
            ManagedSession {
                handle: handle.clone(),
                task_handle,
            },
        );

        info!(
            target: "cc.actor.controller",
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            "Session actor created"
        );
        Ok(handle)
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            session_count: self.sessions.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    async fn graceful_shutdown(&mut self, deadline: Duration) {
        info!(
            target: "cc.actor.controller",
            session_count = self.sessions.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;
        self.cancel_token.cancel();

        let wait_all = async {
            for (session_id, managed) in self.sessions.drain() {
                Self::observe_exit(session_id, managed.task_handle, &self.metrics).await;
            }
        };
        if tokio::time::timeout(deadline, wait_all).await.is_err() {
            warn!(
                target: "cc.actor.controller",
                "Session actor shutdown timed out"
            );
        }

        info!(target: "cc.actor.controller", "Graceful shutdown complete");
    }

    /// Remove session actors whose task has ended.
    async fn check_session_health(&mut self) {
        let finished: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for session_id in finished {
            if let Some(managed) = self.sessions.remove(&session_id) {
                Self::observe_exit(session_id, managed.task_handle, &self.metrics).await;
            }
        }
    }

    async fn observe_exit(
        session_id: SessionId,
        task_handle: JoinHandle<()>,
        metrics: &ActorMetrics,
    ) {
        match task_handle.await {
            Ok(()) => {
                debug!(
                    target: "cc.actor.controller",
                    session_id = %session_id,
                    "Session actor exited cleanly"
                );
            }
            Err(join_error) => {
                if join_error.is_panic() {
                    error!(
                        target: "cc.actor.controller",
                        session_id = %session_id,
                        error = ?join_error,
                        "Session actor panicked"
                    );
                    metrics.record_panic(ActorType::Session);
                    // The actor never reached its own exit bookkeeping.
                    metrics.session_removed();
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::session::SessionSettings;
    use crate::audit::AuditLog;
    use crate::models::api::ScheduleSessionRequest;
    use crate::models::{QualitySettings, SessionFlags};
    use crate::quality::TelemetryStore;
    use crate::recording::{
        InMemoryObjectStore, RecordingOrchestrator, RecordingSettings, BACKOFF_BASE, BACKOFF_MAX,
    };
    use crate::registry::{RegistrySettings, SessionRegistry};
    use chrono::{DateTime, Utc};
    use common::clock::ManualClock;
    use common::types::UserId;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-04T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn deps() -> SessionDeps {
        let clock = Arc::new(ManualClock::new(t0()));
        SessionDeps {
            registry: Arc::new(SessionRegistry::new(
                RegistrySettings {
                    join_url_base: "https://example.com/join".to_string(),
                    join_window: chrono::Duration::minutes(10),
                    default_max_participants: 50,
                },
                clock.clone(),
            )),
            recordings: RecordingOrchestrator::new(
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
            ),
            telemetry: Arc::new(TelemetryStore::new()),
            audit: Arc::new(AuditLog::new(clock)),
            metrics: ActorMetrics::new(),
            settings: SessionSettings {
                ice_servers: Vec::new(),
                telemetry_interval: Duration::from_millis(50),
                quality_hysteresis: 3,
            },
        }
    }

    async fn schedule(deps: &SessionDeps, instructor: UserId) -> SessionId {
        deps.registry
            .schedule(ScheduleSessionRequest {
                instructor_id: instructor,
                title: "Physics".to_string(),
                description: String::new(),
                start_time: t0() + chrono::Duration::minutes(5),
                duration_minutes: 45,
                max_participants: None,
                flags: SessionFlags::default(),
                quality: QualitySettings::default(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_get_or_spawn_reuses_live_actor() {
        let deps = deps();
        let session_id = schedule(&deps, UserId::new()).await;
        let controller = SessionControllerHandle::new(deps.clone());

        let first = controller.get_or_spawn(session_id).await.unwrap();
        let second = controller.get_or_spawn(session_id).await.unwrap();
        assert_eq!(first.session_id(), second.session_id());
        assert_eq!(controller.get_status().await.unwrap().session_count, 1);
        assert!(controller.get(session_id).await.unwrap().is_some());

        controller.cancel();
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let controller = SessionControllerHandle::new(deps());
        let result = controller.get_or_spawn(SessionId::new()).await;
        assert!(matches!(result, Err(CcError::SessionNotFound(_))));
        assert!(controller.get(SessionId::new()).await.unwrap().is_none());
        controller.cancel();
    }

    #[tokio::test]
    async fn test_terminal_session_is_rejected() {
        let deps = deps();
        let instructor = UserId::new();
        let session_id = schedule(&deps, instructor).await;
        deps.registry
            .cancel(session_id, instructor, None)
            .await
            .unwrap();

        let controller = SessionControllerHandle::new(deps);
        let result = controller.get_or_spawn(session_id).await;
        assert!(matches!(
            result,
            Err(CcError::InvalidTransition { ref event, .. }) if event == "admit"
        ));
        controller.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects_new() {
        let deps = deps();
        let session_id = schedule(&deps, UserId::new()).await;
        let controller = SessionControllerHandle::new(deps.clone());
        let session = controller.get_or_spawn(session_id).await.unwrap();
        assert_eq!(deps.metrics.session_count(), 1);

        controller.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(controller.is_cancelled());
        assert!(session.is_closed());
        assert_eq!(deps.metrics.session_count(), 0);
    }

    #[tokio::test]
    async fn test_child_token_follows_root() {
        let controller = SessionControllerHandle::new(deps());
        let child = controller.child_token();
        assert!(!child.is_cancelled());

        controller.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(child.is_cancelled());
    }
}
