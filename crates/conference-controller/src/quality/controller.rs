//! Per-participant adaptive quality state machine.
//!
//! Samples are classified Poor, Fair or Good. A run of `hysteresis` Poor
//! samples steps one tier down, a run of Good samples steps one tier up. Any
//! Fair sample, or a sample of the opposite class, resets both runs.

use super::ladder::QualityTier;
use crate::models::{QualitySettings, QualityStats};
use common::types::ParticipantId;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Health class of a single telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Poor,
    Fair,
    Good,
}

pub const POOR_LOSS_PERCENT: f64 = 5.0;
pub const POOR_LATENCY_MS: f64 = 300.0;
pub const POOR_JITTER_MS: f64 = 50.0;
pub const GOOD_LOSS_PERCENT: f64 = 1.0;
pub const GOOD_LATENCY_MS: f64 = 100.0;
pub const GOOD_JITTER_MS: f64 = 30.0;

/// Classify one sample.
#[must_use]
pub fn classify(sample: &QualityStats) -> Health {
    if sample.packet_loss_percent > POOR_LOSS_PERCENT
        || sample.latency_ms > POOR_LATENCY_MS
        || sample.jitter_ms > POOR_JITTER_MS
    {
        Health::Poor
    } else if sample.packet_loss_percent < GOOD_LOSS_PERCENT
        && sample.latency_ms < GOOD_LATENCY_MS
        && sample.jitter_ms < GOOD_JITTER_MS
    {
        Health::Good
    } else {
        Health::Fair
    }
}

/// Why a tier changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Manual,
}

impl Direction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Manual => "manual",
        }
    }
}

/// A tier change to push to the participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityDecision {
    pub participant_id: ParticipantId,
    pub from: QualityTier,
    pub to: QualityTier,
    pub bitrate_kbps: u32,
    pub direction: Direction,
}

/// Hysteresis state for one participant.
#[derive(Debug, Clone)]
pub struct ParticipantQuality {
    participant_id: ParticipantId,
    tier: QualityTier,
    poor_streak: u32,
    good_streak: u32,
    hysteresis: u32,
    settings: QualitySettings,
}

impl ParticipantQuality {
    #[must_use]
    pub fn new(participant_id: ParticipantId, settings: QualitySettings, hysteresis: u32) -> Self {
        let tier = settings
            .default_quality
            .clamp_to(settings.min_bitrate_kbps, settings.max_bitrate_kbps);
        Self {
            participant_id,
            tier,
            poor_streak: 0,
            good_streak: 0,
            hysteresis,
            settings,
        }
    }

    #[must_use]
    pub fn tier(&self) -> QualityTier {
        self.tier
    }

    /// Feed one sample, returning a decision when the tier changes.
    pub fn observe(&mut self, sample: &QualityStats) -> Option<QualityDecision> {
        if !self.settings.adaptive_bitrate {
            return None;
        }

        match classify(sample) {
            Health::Poor => {
                self.good_streak = 0;
                self.poor_streak = self.poor_streak.saturating_add(1);
            }
            Health::Good => {
                self.poor_streak = 0;
                self.good_streak = self.good_streak.saturating_add(1);
            }
            Health::Fair => {
                self.poor_streak = 0;
                self.good_streak = 0;
                return None;
            }
        }

        let (next, direction) = if self.poor_streak >= self.hysteresis {
            (self.tier.down(), Direction::Down)
        } else if self.good_streak >= self.hysteresis {
            let ceiling = QualityTier::highest_within(
                self.settings.min_bitrate_kbps,
                self.settings.max_bitrate_kbps,
            );
            (self.tier.up().filter(|t| *t <= ceiling), Direction::Up)
        } else {
            return None;
        };

        // A full run resets even at the ends of the ladder.
        self.poor_streak = 0;
        self.good_streak = 0;

        let to = next?;
        Some(self.apply(to, direction))
    }

    /// Force a tier, clamped to the session's bounds.
    pub fn set_manual(&mut self, requested: QualityTier) -> QualityDecision {
        let to = requested.clamp_to(self.settings.min_bitrate_kbps, self.settings.max_bitrate_kbps);
        self.poor_streak = 0;
        self.good_streak = 0;
        self.apply(to, Direction::Manual)
    }

    fn apply(&mut self, to: QualityTier, direction: Direction) -> QualityDecision {
        let from = self.tier;
        self.tier = to;
        QualityDecision {
            participant_id: self.participant_id,
            from,
            to,
            bitrate_kbps: to.target_bitrate(
                self.settings.min_bitrate_kbps,
                self.settings.max_bitrate_kbps,
            ),
            direction,
        }
    }
}

/// Quality state for every participant of one session.
///
/// Shared between the session actor (which registers and forgets
/// participants) and the periodic quality task (which feeds samples).
#[derive(Debug)]
pub struct QualityController {
    settings: QualitySettings,
    hysteresis: u32,
    participants: Mutex<HashMap<ParticipantId, ParticipantQuality>>,
}

impl QualityController {
    #[must_use]
    pub fn new(settings: QualitySettings, hysteresis: u32) -> Self {
        Self {
            settings,
            hysteresis,
            participants: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a participant, returning its initial tier.
    pub async fn track(&self, participant_id: ParticipantId) -> QualityTier {
        let mut participants = self.participants.lock().await;
        participants
            .entry(participant_id)
            .or_insert_with(|| ParticipantQuality::new(participant_id, self.settings, self.hysteresis))
            .tier()
    }

    pub async fn forget(&self, participant_id: ParticipantId) {
        self.participants.lock().await.remove(&participant_id);
    }

    /// Feed a batch of samples in order, collecting the resulting decisions.
    pub async fn observe_batch(&self, samples: &[QualityStats]) -> Vec<QualityDecision> {
        let mut participants = self.participants.lock().await;
        samples
            .iter()
            .filter_map(|sample| {
                participants
                    .get_mut(&sample.participant_id)
                    .and_then(|state| state.observe(sample))
            })
            .collect()
    }

    /// Manual override for a tracked participant.
    pub async fn override_tier(
        &self,
        participant_id: ParticipantId,
        requested: QualityTier,
    ) -> Option<QualityDecision> {
        let mut participants = self.participants.lock().await;
        participants
            .get_mut(&participant_id)
            .map(|state| state.set_manual(requested))
    }

    pub async fn tier_of(&self, participant_id: ParticipantId) -> Option<QualityTier> {
        self.participants
            .lock()
            .await
            .get(&participant_id)
            .map(ParticipantQuality::tier)
    }
}
