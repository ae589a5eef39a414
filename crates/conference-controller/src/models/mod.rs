//! Domain records for sessions, participants, telemetry and recordings.
//!
//! These are the durable projections owned by the registry and the
//! recording orchestrator. Live connection state lives in the session
//! actors and the media router.

pub mod api;

use crate::quality::QualityTier;
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, RecordingId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "SCHEDULED",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Cancelled => "CANCELLED",
        }
    }

    /// COMPLETED and CANCELLED accept no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Participant role within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Instructor,
    Student,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Instructor => "INSTRUCTOR",
            Role::Student => "STUDENT",
        }
    }
}

/// Per-session behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFlags {
    /// Open a recording when the session becomes ACTIVE.
    pub auto_record: bool,
    /// Students may share their screen.
    pub allow_screen_share: bool,
    /// Admissions are expected to be approved by the instructor.
    pub require_approval: bool,
    /// Students join muted.
    pub mute_on_join: bool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            auto_record: false,
            allow_screen_share: true,
            require_approval: false,
            mute_on_join: false,
        }
    }
}

/// Per-session quality configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub default_quality: QualityTier,
    pub adaptive_bitrate: bool,
    pub min_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            default_quality: QualityTier::P720,
            adaptive_bitrate: true,
            min_bitrate_kbps: 300,
            max_bitrate_kbps: 5000,
        }
    }
}

impl QualitySettings {
    /// Clamp a bitrate into the configured bounds.
    #[must_use]
    pub fn clamp_bitrate(&self, kbps: u32) -> u32 {
        kbps.clamp(self.min_bitrate_kbps, self.max_bitrate_kbps)
    }
}

/// A scheduled session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub instructor_id: UserId,
    pub title: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: SessionStatus,
    pub max_participants: u32,
    pub flags: SessionFlags,
    pub quality: QualitySettings,
    pub join_url: String,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
}

impl Session {
    /// Scheduled end time.
    #[must_use]
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::minutes(self.duration_minutes)
    }
}

/// One admission of a user into a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub is_muted: bool,
    pub is_screen_sharing: bool,
    pub quality: QualityTier,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl Participant {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// One screen-share interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenShare {
    pub id: Uuid,
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl ScreenShare {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stopped_at.is_none()
    }
}

/// Point-in-time telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    /// Arena index within the session's telemetry log.
    pub seq: u64,
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub quality: QualityTier,
    pub bitrate_kbps: u32,
    pub frame_rate: f64,
    pub packet_loss_percent: f64,
    pub jitter_ms: f64,
    pub latency_ms: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Recording pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingStatus {
    Recording,
    Processing,
    Available,
    Failed,
}

impl RecordingStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Recording => "RECORDING",
            RecordingStatus::Processing => "PROCESSING",
            RecordingStatus::Available => "AVAILABLE",
            RecordingStatus::Failed => "FAILED",
        }
    }
}

/// Object storage location of an uploaded recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub bucket: String,
    pub key: String,
}

impl StorageLocation {
    /// `gs://bucket/key` style URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.key)
    }
}

/// A session recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: RecordingId,
    pub session_id: SessionId,
    pub status: RecordingStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub size_bytes: Option<u64>,
    pub location: Option<StorageLocation>,
    pub available_at: Option<DateTime<Utc>>,
    pub quality: QualityTier,
    pub include_audio: bool,
    pub include_screen_share: bool,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Calendar invitation sent for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarInvitation {
    pub session_id: SessionId,
    pub recipients: Vec<String>,
    pub ics: String,
    pub sent_at: DateTime<Utc>,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Default page size for listings.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Normalize 1-based paging inputs.
#[must_use]
pub fn normalize_paging(page: Option<usize>, page_size: Option<usize>) -> (usize, usize) {
    let page = page.filter(|p| *p > 0).unwrap_or(1);
    let page_size = page_size
        .filter(|s| *s > 0)
        .map_or(DEFAULT_PAGE_SIZE, |s| s.min(MAX_PAGE_SIZE));
    (page, page_size)
}

/// Slice an already-sorted list into a page.
#[must_use]
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Page<T> {
    let start = page.saturating_sub(1).saturating_mul(page_size);
    let page_items = items
        .iter()
        .skip(start)
        .take(page_size)
        .cloned()
        .collect();
    Page {
        items: page_items,
        total: items.len(),
        page,
        page_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(!SessionStatus::Scheduled.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_string(&SessionStatus::Active).unwrap_or_default();
        assert_eq!(json, "\"ACTIVE\"");
    }

    #[test]
    fn test_quality_settings_clamp() {
        let settings = QualitySettings {
            min_bitrate_kbps: 400,
            max_bitrate_kbps: 1500,
            ..QualitySettings::default()
        };
        assert_eq!(settings.clamp_bitrate(5000), 1500);
        assert_eq!(settings.clamp_bitrate(100), 400);
        assert_eq!(settings.clamp_bitrate(800), 800);
    }

    #[test]
    fn test_normalize_paging() {
        assert_eq!(normalize_paging(None, None), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(normalize_paging(Some(0), Some(0)), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(normalize_paging(Some(3), Some(500)), (3, MAX_PAGE_SIZE));
    }

    #[test]
    fn test_paginate() {
        let items: Vec<u32> = (1..=45).collect();

        let first = paginate(&items, 1, 20);
        assert_eq!(first.items.len(), 20);
        assert_eq!(first.total, 45);

        let last = paginate(&items, 3, 20);
        assert_eq!(last.items, vec![41, 42, 43, 44, 45]);

        let past_end = paginate(&items, 9, 20);
        assert!(past_end.items.is_empty());
    }

    #[test]
    fn test_storage_location_url() {
        let location = StorageLocation {
            bucket: "recordings".to_string(),
            key: "recordings/2026/01/02/s/r.webm".to_string(),
        };
        assert_eq!(location.url(), "gs://recordings/recordings/2026/01/02/s/r.webm");
    }
}
