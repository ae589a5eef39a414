//! Request and response bodies for the HTTP RPC surface.

use super::{
    Participant, QualitySettings, QualityStats, Recording, Role, Session, SessionFlags,
    SessionStatus,
};
use crate::quality::QualityTier;
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, SessionId, UserId};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleSessionRequest {
    pub instructor_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    #[serde(default)]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub flags: SessionFlags,
    #[serde(default)]
    pub quality: QualitySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSessionResponse {
    pub session: Session,
    pub calendar_ics: String,
}

/// Partial update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateSessionRequest {
    pub requester_id: UserId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub flags: Option<SessionFlags>,
    #[serde(default)]
    pub quality: Option<QualitySettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CancelSessionRequest {
    pub requester_id: UserId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListSessionsQuery {
    pub instructor_id: Option<UserId>,
    pub status: Option<SessionStatus>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JoinSessionRequest {
    pub user_id: UserId,
    pub display_name: String,
    /// Claimed role. Defaults to what ownership implies.
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSessionResponse {
    pub participant: Participant,
    pub ws_url: String,
    pub ice_servers: Vec<String>,
    pub session_status: SessionStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LeaveSessionRequest {
    pub participant_id: ParticipantId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveSessionResponse {
    pub participant: Participant,
    pub remaining_participants: usize,
    pub session_status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub participant_count: usize,
    pub max_participants: u32,
    pub can_join: bool,
    pub join_enabled_at: DateTime<Utc>,
    pub elapsed_minutes: Option<i64>,
    pub is_recording: bool,
}

/// Body for mute, unmute and kick.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModerationRequest {
    pub requester_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationResponse {
    pub participant: Participant,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListParticipantsQuery {
    #[serde(default)]
    pub include_left: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScreenShareRequest {
    /// Participant issuing the request.
    pub participant_id: ParticipantId,
    /// Whose share to stop. Defaults to the requester.
    #[serde(default)]
    pub target_participant_id: Option<ParticipantId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenShareResponse {
    pub participant_id: ParticipantId,
    pub is_screen_sharing: bool,
    pub track_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StartRecordingRequest {
    pub requester_id: UserId,
    #[serde(default)]
    pub quality: Option<QualityTier>,
    #[serde(default = "default_true")]
    pub include_audio: bool,
    #[serde(default = "default_true")]
    pub include_screen_share: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StopRecordingRequest {
    pub requester_id: UserId,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListRecordingsQuery {
    pub session_id: Option<SessionId>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateQualityRequest {
    pub participant_id: ParticipantId,
    pub quality: QualityTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateQualityResponse {
    pub participant_id: ParticipantId,
    pub quality: QualityTier,
    pub bitrate_kbps: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QualityStatsQuery {
    pub participant_id: Option<ParticipantId>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityStatsResponse {
    pub stats: Vec<QualityStats>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SendInvitationRequest {
    pub requester_id: UserId,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendInvitationResponse {
    pub session_id: SessionId,
    pub sent_to: Vec<String>,
    pub calendar_ics: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingResponse {
    pub recording: Recording,
    /// `gs://` URL once available.
    pub url: Option<String>,
}

impl From<Recording> for RecordingResponse {
    fn from(recording: Recording) -> Self {
        let url = recording.location.as_ref().map(super::StorageLocation::url);
        Self { recording, url }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_request_defaults() {
        let json = serde_json::json!({
            "instructor_id": UserId::new(),
            "title": "Algebra",
            "start_time": "2026-03-01T10:00:00Z",
            "duration_minutes": 60
        });
        let req: ScheduleSessionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.max_participants, None);
        assert!(req.flags.allow_screen_share);
        assert!(!req.flags.auto_record);
        assert_eq!(req.quality.default_quality, QualityTier::P720);
        assert_eq!(req.quality.min_bitrate_kbps, 300);
    }

    #[test]
    fn test_start_recording_defaults_include_everything() {
        let json = serde_json::json!({ "requester_id": UserId::new() });
        let req: StartRecordingRequest = serde_json::from_value(json).unwrap();
        assert!(req.include_audio);
        assert!(req.include_screen_share);
        assert!(req.quality.is_none());
    }
}
