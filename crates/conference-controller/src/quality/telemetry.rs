//! Append-only telemetry arena.
//!
//! Samples are indexed by a per-session sequence number. Readers keep a
//! cursor and fetch everything past it, so the quality task never needs the
//! session actor's state.

use crate::models::QualityStats;
use crate::quality::QualityTier;
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, SessionId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A telemetry report before it is assigned a sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReport {
    pub participant_id: ParticipantId,
    pub quality: QualityTier,
    pub bitrate_kbps: u32,
    pub frame_rate: f64,
    pub packet_loss_percent: f64,
    pub jitter_ms: f64,
    pub latency_ms: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
pub struct TelemetryStore {
    sessions: RwLock<HashMap<SessionId, Vec<QualityStats>>>,
}

impl TelemetryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a report, returning its sequence number.
    pub async fn append(
        &self,
        session_id: SessionId,
        report: TelemetryReport,
        recorded_at: DateTime<Utc>,
    ) -> u64 {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(session_id).or_default();
        let seq = log.len() as u64;
        log.push(QualityStats {
            seq,
            session_id,
            participant_id: report.participant_id,
            quality: report.quality,
            bitrate_kbps: report.bitrate_kbps,
            frame_rate: report.frame_rate,
            packet_loss_percent: report.packet_loss_percent,
            jitter_ms: report.jitter_ms,
            latency_ms: report.latency_ms,
            bytes_sent: report.bytes_sent,
            bytes_received: report.bytes_received,
            recorded_at,
        });
        seq
    }

    /// Samples with `seq >= cursor`, in order.
    pub async fn read_since(&self, session_id: SessionId, cursor: u64) -> Vec<QualityStats> {
        let sessions = self.sessions.read().await;
        let Some(log) = sessions.get(&session_id) else {
            return Vec::new();
        };
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        log.get(start..).map(<[QualityStats]>::to_vec).unwrap_or_default()
    }

    /// Most recent samples, newest first, optionally for one participant.
    pub async fn query(
        &self,
        session_id: SessionId,
        participant_id: Option<ParticipantId>,
        limit: usize,
    ) -> Vec<QualityStats> {
        let sessions = self.sessions.read().await;
        let Some(log) = sessions.get(&session_id) else {
            return Vec::new();
        };
        log.iter()
            .rev()
            .filter(|s| participant_id.map_or(true, |p| s.participant_id == p))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self, session_id: SessionId) -> usize {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map_or(0, Vec::len)
    }
}
