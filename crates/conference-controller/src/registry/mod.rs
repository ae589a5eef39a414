//! Session registry: the authoritative store for sessions, admissions and
//! screen-share intervals.
//!
//! Every time check goes through the injected [`Clock`]. Every operation
//! takes the registry write lock for its full check-then-mutate step, so the
//! capacity and lifecycle checks in [`SessionRegistry::admit`] are atomic.
//!
//! Sessions are never deleted. Terminal sessions stay queryable.

pub mod lifecycle;

use crate::config::Config;
use crate::errors::CcError;
use crate::models::api::{ListSessionsQuery, ScheduleSessionRequest, UpdateSessionRequest};
use crate::models::{
    normalize_paging, paginate, CalendarInvitation, Page, Participant, QualitySettings, Role,
    ScreenShare, Session, SessionStatus,
};
use crate::quality::QualityTier;
use chrono::{DateTime, Duration, Utc};
use common::clock::Clock;
use common::types::{ParticipantId, SessionId, UserId};
use lifecycle::{transition, LifecycleEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Upper bound on `max_participants`.
pub const MAX_PARTICIPANTS_LIMIT: u32 = crate::config::MAX_PARTICIPANTS_LIMIT;

/// Registry tunables taken from [`Config`].
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub join_url_base: String,
    pub join_window: Duration,
    pub default_max_participants: u32,
}

impl From<&Config> for RegistrySettings {
    fn from(config: &Config) -> Self {
        Self {
            join_url_base: config.join_url_base.clone(),
            join_window: config.join_window(),
            default_max_participants: config.default_max_participants,
        }
    }
}

/// Result of a successful admission.
#[derive(Debug, Clone)]
pub struct Admission {
    pub participant: Participant,
    pub session: Session,
    /// This admission moved the session SCHEDULED -> ACTIVE.
    pub activated: bool,
    /// The user already had an active row; nothing was charged.
    pub rejoined: bool,
}

/// Result of closing a participant row.
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub participant: Participant,
    pub remaining_active: usize,
    pub session_status: SessionStatus,
    /// An open screen share was closed as part of the leave.
    pub closed_screen_share: bool,
}

/// Result of cancelling a session.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub session: Session,
    /// Rows that were still active and have been closed.
    pub closed: Vec<Participant>,
}

/// Result of a screen-share start or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenShareChange {
    Started,
    AlreadyOpen,
    Stopped,
    NotOpen,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    session: Session,
    participants: Vec<Participant>,
    screen_shares: Vec<ScreenShare>,
    invitations: Vec<CalendarInvitation>,
}

impl SessionEntry {
    fn active_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_active()).count()
    }

    fn active_for_user(&self, user_id: UserId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.user_id == user_id && p.is_active())
    }

    fn participant_mut(&mut self, participant_id: ParticipantId) -> Result<&mut Participant, CcError> {
        self.participants
            .iter_mut()
            .find(|p| p.id == participant_id)
            .ok_or_else(|| CcError::ParticipantNotFound(participant_id.to_string()))
    }

    fn close_share(&mut self, participant_id: ParticipantId, at: DateTime<Utc>) -> bool {
        let mut closed = false;
        for share in self
            .screen_shares
            .iter_mut()
            .filter(|s| s.participant_id == participant_id && s.is_open())
        {
            share.stopped_at = Some(at);
            closed = true;
        }
        if closed {
            if let Ok(p) = self.participant_mut(participant_id) {
                p.is_screen_sharing = false;
            }
        }
        closed
    }

    fn close_all(&mut self, at: DateTime<Utc>) -> Vec<Participant> {
        for share in self.screen_shares.iter_mut().filter(|s| s.is_open()) {
            share.stopped_at = Some(at);
        }
        let mut closed = Vec::new();
        for p in self.participants.iter_mut().filter(|p| p.is_active()) {
            p.left_at = Some(at);
            p.is_screen_sharing = false;
            closed.push(p.clone());
        }
        closed
    }
}

/// In-memory session registry.
#[derive(Debug)]
pub struct SessionRegistry {
    clock: Arc<dyn Clock>,
    settings: RegistrySettings,
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(settings: RegistrySettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            settings,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[must_use]
    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// When admission opens for `session`.
    #[must_use]
    pub fn join_enabled_at(&self, session: &Session) -> DateTime<Utc> {
        session.start_time - self.settings.join_window
    }

    /// Create a session in SCHEDULED state.
    #[instrument(skip_all, name = "cc.registry.schedule", fields(instructor_id = %req.instructor_id))]
    pub async fn schedule(&self, req: ScheduleSessionRequest) -> Result<Session, CcError> {
        let now = self.clock.now();
        let max_participants = req
            .max_participants
            .unwrap_or(self.settings.default_max_participants);

        validate_title(&req.title)?;
        validate_timing(req.start_time, req.duration_minutes, now)?;
        validate_max_participants(max_participants)?;
        validate_quality(&req.quality)?;

        let id = SessionId::new();
        let session = Session {
            id,
            instructor_id: req.instructor_id,
            title: req.title.trim().to_string(),
            description: req.description,
            start_time: req.start_time,
            duration_minutes: req.duration_minutes,
            status: SessionStatus::Scheduled,
            max_participants,
            flags: req.flags,
            quality: req.quality,
            join_url: format!("{}/{}", self.settings.join_url_base, id),
            created_at: now,
            activated_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
        };

        self.sessions.write().await.insert(
            id,
            SessionEntry {
                session: session.clone(),
                participants: Vec::new(),
                screen_shares: Vec::new(),
                invitations: Vec::new(),
            },
        );

        info!(
            target: "cc.registry",
            session_id = %id,
            start_time = %session.start_time,
            duration_minutes = session.duration_minutes,
            max_participants,
            "Session scheduled"
        );
        Ok(session)
    }

    pub async fn get(&self, session_id: SessionId) -> Result<Session, CcError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_id)
            .map(|e| e.session.clone())
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))
    }

    /// Patch a SCHEDULED session. Owner only.
    #[instrument(skip_all, name = "cc.registry.update", fields(session_id = %session_id))]
    pub async fn update(
        &self,
        session_id: SessionId,
        req: UpdateSessionRequest,
    ) -> Result<Session, CcError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;

        if entry.session.instructor_id != req.requester_id {
            return Err(CcError::NotAuthorized(
                "Only the session instructor can update the session".to_string(),
            ));
        }
        if entry.session.status != SessionStatus::Scheduled {
            return Err(CcError::InvalidTransition {
                from: entry.session.status.as_str().to_string(),
                event: "update".to_string(),
            });
        }

        let mut next = entry.session.clone();
        if let Some(title) = req.title {
            validate_title(&title)?;
            next.title = title.trim().to_string();
        }
        if let Some(description) = req.description {
            next.description = description;
        }
        if req.start_time.is_some() || req.duration_minutes.is_some() {
            let start = req.start_time.unwrap_or(next.start_time);
            let duration = req.duration_minutes.unwrap_or(next.duration_minutes);
            validate_timing(start, duration, now)?;
            next.start_time = start;
            next.duration_minutes = duration;
        }
        if let Some(max) = req.max_participants {
            validate_max_participants(max)?;
            next.max_participants = max;
        }
        if let Some(flags) = req.flags {
            next.flags = flags;
        }
        if let Some(quality) = req.quality {
            validate_quality(&quality)?;
            next.quality = quality;
        }

        entry.session = next.clone();
        debug!(target: "cc.registry", session_id = %session_id, "Session updated");
        Ok(next)
    }

    /// Cancel a SCHEDULED or ACTIVE session. Owner only.
    #[instrument(skip_all, name = "cc.registry.cancel", fields(session_id = %session_id))]
    pub async fn cancel(
        &self,
        session_id: SessionId,
        requester_id: UserId,
        reason: Option<String>,
    ) -> Result<Cancellation, CcError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;

        if entry.session.instructor_id != requester_id {
            return Err(CcError::NotAuthorized(
                "Only the session instructor can cancel the session".to_string(),
            ));
        }
        entry.session.status = transition(entry.session.status, LifecycleEvent::Cancel)?;
        entry.session.cancelled_at = Some(now);
        entry.session.cancel_reason = reason;
        let closed = entry.close_all(now);

        info!(
            target: "cc.registry",
            session_id = %session_id,
            closed_participants = closed.len(),
            "Session cancelled"
        );
        Ok(Cancellation {
            session: entry.session.clone(),
            closed,
        })
    }

    /// Sessions ordered by start time, filtered and paged.
    pub async fn list(&self, query: &ListSessionsQuery) -> Page<Session> {
        let (page, page_size) = normalize_paging(query.page, query.page_size);
        let sessions = self.sessions.read().await;
        let mut matching: Vec<Session> = sessions
            .values()
            .map(|e| &e.session)
            .filter(|s| query.instructor_id.map_or(true, |i| s.instructor_id == i))
            .filter(|s| query.status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        paginate(&matching, page, page_size)
    }

    /// The join gate.
    ///
    /// Checks, in order: terminal status, join window, claimed instructor
    /// role, idempotent rejoin, capacity. The first admission activates the
    /// session.
    #[instrument(skip_all, name = "cc.registry.admit", fields(session_id = %session_id, user_id = %user_id))]
    pub async fn admit(
        &self,
        session_id: SessionId,
        user_id: UserId,
        claimed_role: Option<Role>,
        display_name: &str,
    ) -> Result<Admission, CcError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;

        let next_status = transition(entry.session.status, LifecycleEvent::Admit)?;

        if entry.session.status == SessionStatus::Scheduled {
            let join_enabled_at = entry.session.start_time - self.settings.join_window;
            if now < join_enabled_at {
                return Err(CcError::TooEarly {
                    retry_after_secs: retry_after_secs(join_enabled_at - now),
                    join_enabled_at,
                });
            }
        }

        let is_owner = entry.session.instructor_id == user_id;
        if claimed_role == Some(Role::Instructor) && !is_owner {
            return Err(CcError::NotAuthorized(
                "Only the session owner can join as instructor".to_string(),
            ));
        }

        if let Some(existing) = entry.active_for_user(user_id) {
            debug!(target: "cc.registry", session_id = %session_id, participant_id = %existing.id, "Idempotent rejoin");
            return Ok(Admission {
                participant: existing.clone(),
                session: entry.session.clone(),
                activated: false,
                rejoined: true,
            });
        }

        let max = entry.session.max_participants;
        if entry.active_count() >= max as usize {
            return Err(CcError::SessionFull {
                max_participants: max,
            });
        }

        let role = if is_owner { Role::Instructor } else { Role::Student };
        let quality = entry.session.quality;
        let participant = Participant {
            id: ParticipantId::new(),
            session_id,
            user_id,
            display_name: display_name.trim().to_string(),
            role,
            audio_enabled: true,
            video_enabled: true,
            is_muted: role == Role::Student && entry.session.flags.mute_on_join,
            is_screen_sharing: false,
            quality: quality
                .default_quality
                .clamp_to(quality.min_bitrate_kbps, quality.max_bitrate_kbps),
            joined_at: now,
            left_at: None,
        };
        entry.participants.push(participant.clone());

        let activated = entry.session.status == SessionStatus::Scheduled;
        entry.session.status = next_status;
        if activated {
            entry.session.activated_at = Some(now);
            info!(target: "cc.registry", session_id = %session_id, "Session activated");
        }

        info!(
            target: "cc.registry",
            session_id = %session_id,
            participant_id = %participant.id,
            role = role.as_str(),
            active = entry.active_count(),
            "Participant admitted"
        );
        Ok(Admission {
            participant,
            session: entry.session.clone(),
            activated,
            rejoined: false,
        })
    }

    /// ACTIVE -> COMPLETED.
    #[instrument(skip_all, name = "cc.registry.complete", fields(session_id = %session_id))]
    pub async fn complete(&self, session_id: SessionId) -> Result<Session, CcError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;

        entry.session.status = transition(entry.session.status, LifecycleEvent::Complete)?;
        entry.session.completed_at = Some(now);
        entry.close_all(now);

        info!(target: "cc.registry", session_id = %session_id, "Session completed");
        Ok(entry.session.clone())
    }

    /// Close a participant row. Leaving twice returns the closed row.
    pub async fn leave(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<LeaveOutcome, CcError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;

        let closed_screen_share = entry.close_share(participant_id, now);
        let participant = entry.participant_mut(participant_id)?;
        if participant.left_at.is_none() {
            participant.left_at = Some(now);
        }
        let participant = participant.clone();

        Ok(LeaveOutcome {
            participant,
            remaining_active: entry.active_count(),
            session_status: entry.session.status,
            closed_screen_share,
        })
    }

    pub async fn participants(
        &self,
        session_id: SessionId,
        include_left: bool,
    ) -> Result<Vec<Participant>, CcError> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;
        Ok(entry
            .participants
            .iter()
            .filter(|p| include_left || p.is_active())
            .cloned()
            .collect())
    }

    pub async fn participant(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<Participant, CcError> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;
        entry
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .cloned()
            .ok_or_else(|| CcError::ParticipantNotFound(participant_id.to_string()))
    }

    /// The active row for a user, if any.
    pub async fn active_participant_for(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<Option<Participant>, CcError> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;
        Ok(entry.active_for_user(user_id).cloned())
    }

    pub async fn active_count(&self, session_id: SessionId) -> Result<usize, CcError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_id)
            .map(SessionEntry::active_count)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))
    }

    /// Snapshot for `GetSessionStatus`. `is_recording` comes from the caller.
    pub async fn status(
        &self,
        session_id: SessionId,
        is_recording: bool,
    ) -> Result<crate::models::api::SessionStatusResponse, CcError> {
        let now = self.clock.now();
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;
        let session = &entry.session;
        let join_enabled_at = self.join_enabled_at(session);
        let can_join = match session.status {
            SessionStatus::Scheduled => now >= join_enabled_at,
            SessionStatus::Active => true,
            SessionStatus::Completed | SessionStatus::Cancelled => false,
        };

        Ok(crate::models::api::SessionStatusResponse {
            session_id,
            status: session.status,
            participant_count: entry.active_count(),
            max_participants: session.max_participants,
            can_join,
            join_enabled_at,
            elapsed_minutes: session
                .activated_at
                .map(|at| (session.completed_at.unwrap_or(now) - at).num_minutes()),
            is_recording,
        })
    }

    pub async fn set_muted(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        muted: bool,
    ) -> Result<Participant, CcError> {
        self.with_active_participant(session_id, participant_id, |p| {
            p.is_muted = muted;
        })
        .await
    }

    pub async fn set_quality(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        tier: QualityTier,
    ) -> Result<Participant, CcError> {
        self.with_active_participant(session_id, participant_id, |p| {
            p.quality = tier;
        })
        .await
    }

    /// Open a screen-share interval. A second start is a no-op.
    pub async fn start_screen_share(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<ScreenShareChange, CcError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;

        if entry
            .screen_shares
            .iter()
            .any(|s| s.participant_id == participant_id && s.is_open())
        {
            return Ok(ScreenShareChange::AlreadyOpen);
        }

        let participant = entry.participant_mut(participant_id)?;
        if !participant.is_active() {
            return Err(CcError::InvalidArgument(
                "Participant has left the session".to_string(),
            ));
        }
        participant.is_screen_sharing = true;
        entry.screen_shares.push(ScreenShare {
            id: Uuid::new_v4(),
            session_id,
            participant_id,
            started_at: now,
            stopped_at: None,
        });
        Ok(ScreenShareChange::Started)
    }

    pub async fn stop_screen_share(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<ScreenShareChange, CcError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;
        entry.participant_mut(participant_id)?;
        if entry.close_share(participant_id, now) {
            Ok(ScreenShareChange::Stopped)
        } else {
            Ok(ScreenShareChange::NotOpen)
        }
    }

    /// Every interval ever opened in the session.
    pub async fn screen_shares(&self, session_id: SessionId) -> Result<Vec<ScreenShare>, CcError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_id)
            .map(|e| e.screen_shares.clone())
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))
    }

    pub async fn record_invitation(&self, invitation: CalendarInvitation) -> Result<(), CcError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&invitation.session_id)
            .ok_or_else(|| CcError::SessionNotFound(invitation.session_id.to_string()))?;
        entry.invitations.push(invitation);
        Ok(())
    }

    pub async fn invitations(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<CalendarInvitation>, CcError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_id)
            .map(|e| e.invitations.clone())
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))
    }

    async fn with_active_participant(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        apply: impl FnOnce(&mut Participant),
    ) -> Result<Participant, CcError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;
        let participant = entry.participant_mut(participant_id)?;
        if !participant.is_active() {
            return Err(CcError::InvalidArgument(
                "Participant has left the session".to_string(),
            ));
        }
        apply(participant);
        Ok(participant.clone())
    }
}

/// Whole seconds until `wait` elapses, rounded up.
fn retry_after_secs(wait: Duration) -> u64 {
    let millis = wait.num_milliseconds().max(0);
    u64::try_from((millis + 999) / 1000).unwrap_or(0)
}

fn validate_title(title: &str) -> Result<(), CcError> {
    if title.trim().is_empty() {
        return Err(CcError::InvalidSchedule("Title is required".to_string()));
    }
    Ok(())
}

fn validate_timing(
    start_time: DateTime<Utc>,
    duration_minutes: i64,
    now: DateTime<Utc>,
) -> Result<(), CcError> {
    if duration_minutes <= 0 {
        return Err(CcError::InvalidSchedule(
            "Duration must be positive".to_string(),
        ));
    }
    if start_time <= now {
        return Err(CcError::InvalidSchedule(
            "Start time must be in the future".to_string(),
        ));
    }
    Ok(())
}

fn validate_max_participants(max: u32) -> Result<(), CcError> {
    if !(1..=MAX_PARTICIPANTS_LIMIT).contains(&max) {
        return Err(CcError::InvalidSchedule(format!(
            "max_participants must be between 1 and {MAX_PARTICIPANTS_LIMIT}"
        )));
    }
    Ok(())
}

fn validate_quality(quality: &QualitySettings) -> Result<(), CcError> {
    if quality.min_bitrate_kbps >= quality.max_bitrate_kbps {
        return Err(CcError::InvalidSchedule(
            "min_bitrate_kbps must be below max_bitrate_kbps".to_string(),
        ));
    }
    Ok(())
}
