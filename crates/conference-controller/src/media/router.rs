//! Selective forwarding model.
//!
//! The router never decodes media. It tracks which tracks each participant
//! publishes and, for a packet on one of those tracks, lists the other
//! participants it should be relayed to. The owning session actor is the
//! only writer.

use bytes::Bytes;
use common::types::ParticipantId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// What a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackRole {
    Microphone,
    Camera,
    Screen,
}

impl TrackRole {
    #[must_use]
    pub const fn kind(&self) -> TrackKind {
        match self {
            TrackRole::Microphone => TrackKind::Audio,
            TrackRole::Camera | TrackRole::Screen => TrackKind::Video,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackRole::Microphone => "microphone",
            TrackRole::Camera => "camera",
            TrackRole::Screen => "screen",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub kind: TrackKind,
    pub role: TrackRole,
}

impl Track {
    fn for_participant(participant_id: ParticipantId, role: TrackRole) -> Self {
        Self {
            id: format!("{participant_id}-{}", role.as_str()),
            kind: role.kind(),
            role,
        }
    }
}

#[derive(Debug, Clone)]
struct Publisher {
    tracks: BTreeMap<TrackRole, Track>,
    muted: bool,
}

/// One relay of a packet to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub to: ParticipantId,
    pub track_id: String,
    pub payload: Bytes,
}

#[derive(Debug, Default)]
pub struct MediaRouter {
    publishers: BTreeMap<ParticipantId, Publisher>,
}

impl MediaRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant with microphone and camera tracks.
    pub fn add_participant(&mut self, participant_id: ParticipantId, muted: bool) {
        self.publishers.entry(participant_id).or_insert_with(|| {
            let tracks = [TrackRole::Microphone, TrackRole::Camera]
                .into_iter()
                .map(|role| (role, Track::for_participant(participant_id, role)))
                .collect();
            Publisher { tracks, muted }
        });
    }

    /// Drop every inbound and outbound relay for the participant.
    pub fn remove_participant(&mut self, participant_id: ParticipantId) -> bool {
        self.publishers.remove(&participant_id).is_some()
    }

    #[must_use]
    pub fn contains(&self, participant_id: ParticipantId) -> bool {
        self.publishers.contains_key(&participant_id)
    }

    /// Muting stops audio relay but keeps the tracks.
    pub fn set_muted(&mut self, participant_id: ParticipantId, muted: bool) {
        if let Some(p) = self.publishers.get_mut(&participant_id) {
            p.muted = muted;
        }
    }

    #[must_use]
    pub fn is_muted(&self, participant_id: ParticipantId) -> bool {
        self.publishers
            .get(&participant_id)
            .is_some_and(|p| p.muted)
    }

    /// Add the screen track. Returns the track id, unchanged on repeat calls.
    pub fn add_screen_track(&mut self, participant_id: ParticipantId) -> Option<String> {
        let publisher = self.publishers.get_mut(&participant_id)?;
        let track = publisher
            .tracks
            .entry(TrackRole::Screen)
            .or_insert_with(|| Track::for_participant(participant_id, TrackRole::Screen));
        Some(track.id.clone())
    }

    pub fn remove_screen_track(&mut self, participant_id: ParticipantId) -> Option<Track> {
        self.publishers
            .get_mut(&participant_id)
            .and_then(|p| p.tracks.remove(&TrackRole::Screen))
    }

    #[must_use]
    pub fn tracks(&self, participant_id: ParticipantId) -> Vec<Track> {
        self.publishers
            .get(&participant_id)
            .map(|p| p.tracks.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Recipients for `role` published by `publisher`.
    ///
    /// Empty if the track does not exist or is muted audio.
    #[must_use]
    pub fn forwarding_plan(&self, publisher: ParticipantId, role: TrackRole) -> Vec<ParticipantId> {
        let Some(source) = self.publishers.get(&publisher) else {
            return Vec::new();
        };
        if !source.tracks.contains_key(&role) {
            return Vec::new();
        }
        if source.muted && role.kind() == TrackKind::Audio {
            return Vec::new();
        }
        self.publishers
            .keys()
            .filter(|id| **id != publisher)
            .copied()
            .collect()
    }

    /// Relay one opaque packet.
    #[must_use]
    pub fn route_packet(&self, from: ParticipantId, role: TrackRole, payload: &Bytes) -> Vec<Delivery> {
        let Some(track) = self
            .publishers
            .get(&from)
            .and_then(|p| p.tracks.get(&role))
        else {
            return Vec::new();
        };
        self.forwarding_plan(from, role)
            .into_iter()
            .map(|to| Delivery {
                to,
                track_id: track.id.clone(),
                payload: payload.clone(),
            })
            .collect()
    }

    /// Every (publisher, track) pair a participant receives.
    #[must_use]
    pub fn subscriptions(&self, subscriber: ParticipantId) -> Vec<(ParticipantId, Track)> {
        if !self.publishers.contains_key(&subscriber) {
            return Vec::new();
        }
        self.publishers
            .iter()
            .filter(|(id, _)| **id != subscriber)
            .flat_map(|(id, p)| p.tracks.values().map(move |t| (*id, t.clone())))
            .collect()
    }

    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.publishers.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn router_with(n: usize) -> (MediaRouter, Vec<ParticipantId>) {
        let mut router = MediaRouter::new();
        let ids: Vec<ParticipantId> = (0..n).map(|_| ParticipantId::new()).collect();
        for id in &ids {
            router.add_participant(*id, false);
        }
        (router, ids)
    }

    #[test]
    fn test_forwarding_excludes_publisher() {
        let (router, ids) = router_with(3);
        let a = ids[0];
        let plan = router.forwarding_plan(a, TrackRole::Camera);
        assert_eq!(plan.len(), 2);
        assert!(!plan.contains(&a));
    }

    #[test]
    fn test_mute_stops_audio_only() {
        let (mut router, ids) = router_with(2);
        let a = ids[0];
        router.set_muted(a, true);
        assert!(router.forwarding_plan(a, TrackRole::Microphone).is_empty());
        assert_eq!(router.forwarding_plan(a, TrackRole::Camera).len(), 1);
        assert_eq!(router.tracks(a).len(), 2);

        router.set_muted(a, false);
        assert_eq!(router.forwarding_plan(a, TrackRole::Microphone).len(), 1);
    }

    #[test]
    fn test_screen_track_lifecycle() {
        let (mut router, ids) = router_with(2);
        let a = ids[0];
        assert!(router.forwarding_plan(a, TrackRole::Screen).is_empty());

        let first = router.add_screen_track(a).unwrap();
        let second = router.add_screen_track(a).unwrap();
        assert_eq!(first, second);
        assert_eq!(router.tracks(a).len(), 3);
        assert_eq!(router.forwarding_plan(a, TrackRole::Screen).len(), 1);

        let removed = router.remove_screen_track(a).unwrap();
        assert_eq!(removed.kind, TrackKind::Video);
        assert!(router.forwarding_plan(a, TrackRole::Screen).is_empty());
    }

    #[test]
    fn test_remove_drops_relays_both_ways() {
        let (mut router, ids) = router_with(3);
        let (a, b) = (ids[0], ids[1]);
        assert!(router.remove_participant(b));

        assert!(router.forwarding_plan(b, TrackRole::Camera).is_empty());
        assert!(!router.forwarding_plan(a, TrackRole::Camera).contains(&b));
        assert!(router.subscriptions(b).is_empty());
        assert!(!router.remove_participant(b));
    }

    #[test]
    fn test_route_packet_clones_payload() {
        let (router, ids) = router_with(3);
        let payload = Bytes::from_static(b"\x80\x60rtp");
        let deliveries = router.route_packet(ids[0], TrackRole::Microphone, &payload);
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries.iter().all(|d| d.payload == payload));
        assert!(deliveries
            .iter()
            .all(|d| d.track_id.ends_with("-microphone")));
    }

    #[test]
    fn test_subscriptions() {
        let (mut router, ids) = router_with(3);
        router.add_screen_track(ids[1]);
        // 2 tracks from ids[2], 3 from ids[1]
        assert_eq!(router.subscriptions(ids[0]).len(), 5);
    }
}
