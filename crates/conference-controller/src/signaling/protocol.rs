//! Signaling wire format.
//!
//! JSON text frames, internally tagged by `type`. Every frame in both
//! directions carries the `session_id` it belongs to.

use crate::errors::CcError;
use crate::models::{Participant, Role};
use crate::quality::{QualityTier, TelemetryReport};
use common::types::{ParticipantId, SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        session_id: SessionId,
        display_name: String,
        #[serde(default)]
        role: Option<Role>,
    },
    Leave {
        session_id: SessionId,
    },
    Offer {
        session_id: SessionId,
        to: ParticipantId,
        sdp: String,
    },
    Answer {
        session_id: SessionId,
        to: ParticipantId,
        sdp: String,
    },
    IceCandidate {
        session_id: SessionId,
        to: ParticipantId,
        candidate: String,
    },
    Mute {
        session_id: SessionId,
        target: ParticipantId,
    },
    Unmute {
        session_id: SessionId,
        target: ParticipantId,
    },
    Kick {
        session_id: SessionId,
        target: ParticipantId,
    },
    StartScreenShare {
        session_id: SessionId,
    },
    StopScreenShare {
        session_id: SessionId,
        #[serde(default)]
        target: Option<ParticipantId>,
    },
    Stats {
        session_id: SessionId,
        quality: QualityTier,
        bitrate_kbps: u32,
        frame_rate: f64,
        packet_loss_percent: f64,
        jitter_ms: f64,
        latency_ms: f64,
        #[serde(default)]
        bytes_sent: u64,
        #[serde(default)]
        bytes_received: u64,
    },
    Ping {
        session_id: SessionId,
    },
}

impl ClientMessage {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        match self {
            ClientMessage::Join { session_id, .. }
            | ClientMessage::Leave { session_id }
            | ClientMessage::Offer { session_id, .. }
            | ClientMessage::Answer { session_id, .. }
            | ClientMessage::IceCandidate { session_id, .. }
            | ClientMessage::Mute { session_id, .. }
            | ClientMessage::Unmute { session_id, .. }
            | ClientMessage::Kick { session_id, .. }
            | ClientMessage::StartScreenShare { session_id }
            | ClientMessage::StopScreenShare { session_id, .. }
            | ClientMessage::Stats { session_id, .. }
            | ClientMessage::Ping { session_id } => *session_id,
        }
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Leave { .. } => "leave",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice_candidate",
            ClientMessage::Mute { .. } => "mute",
            ClientMessage::Unmute { .. } => "unmute",
            ClientMessage::Kick { .. } => "kick",
            ClientMessage::StartScreenShare { .. } => "start_screen_share",
            ClientMessage::StopScreenShare { .. } => "stop_screen_share",
            ClientMessage::Stats { .. } => "stats",
            ClientMessage::Ping { .. } => "ping",
        }
    }

    /// Telemetry carried by a `stats` frame, attributed to `participant_id`.
    #[must_use]
    pub fn telemetry(&self, participant_id: ParticipantId) -> Option<TelemetryReport> {
        match self {
            ClientMessage::Stats {
                quality,
                bitrate_kbps,
                frame_rate,
                packet_loss_percent,
                jitter_ms,
                latency_ms,
                bytes_sent,
                bytes_received,
                ..
            } => Some(TelemetryReport {
                participant_id,
                quality: *quality,
                bitrate_kbps: *bitrate_kbps,
                frame_rate: *frame_rate,
                packet_loss_percent: *packet_loss_percent,
                jitter_ms: *jitter_ms,
                latency_ms: *latency_ms,
                bytes_sent: *bytes_sent,
                bytes_received: *bytes_received,
            }),
            _ => None,
        }
    }
}

/// Parse one text frame.
pub fn parse_client_frame(text: &str) -> Result<ClientMessage, CcError> {
    serde_json::from_str(text)
        .map_err(|e| CcError::InvalidArgument(format!("Malformed signaling frame: {e}")))
}

/// Why a participant left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    Left,
    Disconnected,
    Kicked,
    SlowConsumer,
    SessionEnded,
    Cancelled,
}

impl LeaveReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::Left => "left",
            LeaveReason::Disconnected => "disconnected",
            LeaveReason::Kicked => "kicked",
            LeaveReason::SlowConsumer => "slow_consumer",
            LeaveReason::SessionEnded => "session_ended",
            LeaveReason::Cancelled => "cancelled",
        }
    }
}

/// Participant as seen by other clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub participant_id: ParticipantId,
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    pub is_muted: bool,
    pub is_screen_sharing: bool,
    pub quality: QualityTier,
}

impl From<&Participant> for ParticipantSummary {
    fn from(p: &Participant) -> Self {
        Self {
            participant_id: p.id,
            user_id: p.user_id,
            display_name: p.display_name.clone(),
            role: p.role,
            is_muted: p.is_muted,
            is_screen_sharing: p.is_screen_sharing,
            quality: p.quality,
        }
    }
}

/// Frames sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Joined {
        session_id: SessionId,
        participant_id: ParticipantId,
        participants: Vec<ParticipantSummary>,
        ice_servers: Vec<String>,
    },
    ParticipantJoined {
        session_id: SessionId,
        participant: ParticipantSummary,
    },
    ParticipantLeft {
        session_id: SessionId,
        participant_id: ParticipantId,
        reason: LeaveReason,
    },
    Offer {
        session_id: SessionId,
        from: ParticipantId,
        to: ParticipantId,
        sdp: String,
    },
    Answer {
        session_id: SessionId,
        from: ParticipantId,
        to: ParticipantId,
        sdp: String,
    },
    IceCandidate {
        session_id: SessionId,
        from: ParticipantId,
        to: ParticipantId,
        candidate: String,
    },
    MuteChanged {
        session_id: SessionId,
        target: ParticipantId,
        muted: bool,
        by: UserId,
    },
    Kicked {
        session_id: SessionId,
        by: UserId,
    },
    ScreenShareStarted {
        session_id: SessionId,
        participant_id: ParticipantId,
        track_id: String,
    },
    ScreenShareStopped {
        session_id: SessionId,
        participant_id: ParticipantId,
    },
    QualityChange {
        session_id: SessionId,
        participant_id: ParticipantId,
        quality: QualityTier,
        bitrate_kbps: u32,
    },
    Error {
        session_id: SessionId,
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
    Pong {
        session_id: SessionId,
    },
}

impl ServerMessage {
    /// Error frame. The message is the client-safe rendering.
    #[must_use]
    pub fn error(session_id: SessionId, err: &CcError) -> Self {
        ServerMessage::Error {
            session_id,
            code: err.code_str().to_string(),
            message: err.client_message(),
            retry_after_secs: err.retry_after_secs(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::ParticipantJoined { .. } => "participant_joined",
            ServerMessage::ParticipantLeft { .. } => "participant_left",
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::IceCandidate { .. } => "ice_candidate",
            ServerMessage::MuteChanged { .. } => "mute_changed",
            ServerMessage::Kicked { .. } => "kicked",
            ServerMessage::ScreenShareStarted { .. } => "screen_share_started",
            ServerMessage::ScreenShareStopped { .. } => "screen_share_stopped",
            ServerMessage::QualityChange { .. } => "quality_change",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Pong { .. } => "pong",
        }
    }

    pub fn to_json(&self) -> Result<String, CcError> {
        serde_json::to_string(self)
            .map_err(|e| CcError::Internal(format!("failed to encode signaling frame: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join() {
        let session_id = SessionId::new();
        let text = format!(r#"{{"type":"join","session_id":"{session_id}","display_name":"Ada"}}"#);
        let msg = parse_client_frame(&text).unwrap();
        assert_eq!(msg.session_id(), session_id);
        assert_eq!(msg.kind(), "join");
    }

    #[test]
    fn test_parse_ice_candidate_verbatim() {
        let session_id = SessionId::new();
        let to = ParticipantId::new();
        let candidate = "candidate:842163049 1 udp 1677729535 203.0.113.7 3478 typ srflx";
        let text = serde_json::json!({
            "type": "ice_candidate",
            "session_id": session_id,
            "to": to,
            "candidate": candidate,
        })
        .to_string();
        match parse_client_frame(&text).unwrap() {
            ClientMessage::IceCandidate { candidate: c, to: t, .. } => {
                assert_eq!(c, candidate);
                assert_eq!(t, to);
            }
            other => unreachable!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(matches!(
            parse_client_frame("not json"),
            Err(CcError::InvalidArgument(_))
        ));
        assert!(parse_client_frame(r#"{"type":"teleport","session_id":"x"}"#).is_err());
        // session_id is mandatory
        assert!(parse_client_frame(r#"{"type":"ping"}"#).is_err());
    }

    #[test]
    fn test_stats_to_telemetry() {
        let session_id = SessionId::new();
        let pid = ParticipantId::new();
        let text = serde_json::json!({
            "type": "stats",
            "session_id": session_id,
            "quality": "720p",
            "bitrate_kbps": 1800,
            "frame_rate": 30.0,
            "packet_loss_percent": 0.2,
            "jitter_ms": 8.0,
            "latency_ms": 40.0,
        })
        .to_string();
        let report = parse_client_frame(&text).unwrap().telemetry(pid).unwrap();
        assert_eq!(report.participant_id, pid);
        assert_eq!(report.quality, QualityTier::P720);
        assert_eq!(report.bytes_sent, 0);
    }

    #[test]
    fn test_server_frames_are_tagged() {
        let session_id = SessionId::new();
        let frame = ServerMessage::QualityChange {
            session_id,
            participant_id: ParticipantId::new(),
            quality: QualityTier::P480,
            bitrate_kbps: 1200,
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "quality_change");
        assert_eq!(value["quality"], "480p");
        assert_eq!(value["session_id"], session_id.to_string());
    }

    #[test]
    fn test_error_frame_carries_retry_after() {
        let session_id = SessionId::new();
        let err = CcError::TooEarly {
            retry_after_secs: 90,
            join_enabled_at: chrono::Utc::now(),
        };
        match ServerMessage::error(session_id, &err) {
            ServerMessage::Error { retry_after_secs, code, .. } => {
                assert_eq!(retry_after_secs, Some(90));
                assert_eq!(code, err.code_str());
            }
            other => unreachable!("unexpected {other:?}"),
        }
    }
}
