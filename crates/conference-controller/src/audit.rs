//! Append-only signaling event log.

use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::types::{ParticipantId, SessionId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Admitted,
    Left,
    Relayed,
    Dropped,
    Moderation,
    Rejected,
    ScreenShare,
    QualityChanged,
}

impl AuditKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Admitted => "admitted",
            AuditKind::Left => "left",
            AuditKind::Relayed => "relayed",
            AuditKind::Dropped => "dropped",
            AuditKind::Moderation => "moderation",
            AuditKind::Rejected => "rejected",
            AuditKind::ScreenShare => "screen_share",
            AuditKind::QualityChanged => "quality_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub session_id: SessionId,
    pub participant_id: Option<ParticipantId>,
    pub kind: AuditKind,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct AuditLog {
    clock: Arc<dyn Clock>,
    events: RwLock<Vec<AuditEvent>>,
}

impl AuditLog {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            events: RwLock::new(Vec::new()),
        }
    }

    /// Append an event, returning its sequence number.
    pub async fn record(
        &self,
        session_id: SessionId,
        participant_id: Option<ParticipantId>,
        kind: AuditKind,
        detail: impl Into<String>,
    ) -> u64 {
        let mut events = self.events.write().await;
        let seq = events.len() as u64;
        let detail = detail.into();
        debug!(
            target: "cc.audit",
            seq,
            session_id = %session_id,
            kind = kind.as_str(),
            detail = %detail,
            "Audit event"
        );
        events.push(AuditEvent {
            seq,
            session_id,
            participant_id,
            kind,
            detail,
            at: self.clock.now(),
        });
        seq
    }

    /// Every event for a session, oldest first.
    pub async fn for_session(&self, session_id: SessionId) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }

    pub async fn count(&self, session_id: SessionId, kind: AuditKind) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.session_id == session_id && e.kind == kind)
            .count()
    }
}
