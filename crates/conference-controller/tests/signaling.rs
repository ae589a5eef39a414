//! Signaling through the session actor with real connection writers.
//!
//! Each client is a `ConnectionActor` writing into an in-memory channel, so
//! frames are observed exactly as the WebSocket would serialize them.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::extract::ws::Message;
use cc_test_utils::{ScheduleRequestBuilder, TestApp};
use chrono::Duration;
use common::types::{SessionId, UserId};
use bytes::Bytes;
use conference_controller::actors::{ConnectionActor, SessionActorHandle};
use conference_controller::media::frame::decode_outbound;
use conference_controller::media::TrackRole;
use conference_controller::models::{Participant, QualitySettings};
use conference_controller::quality::QualityTier;
use conference_controller::signaling::{parse_client_frame, ClientMessage, ServerMessage};
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct Client {
    participant: Participant,
    frames: mpsc::Receiver<Message>,
}

impl Client {
    /// Next text frame, skipping control frames.
    async fn next(&mut self) -> Option<ServerMessage> {
        loop {
            let frame = tokio::time::timeout(std::time::Duration::from_secs(2), self.frames.next())
                .await
                .ok()??;
            if let Message::Text(text) = frame {
                return Some(serde_json::from_str(&text).unwrap());
            }
        }
    }

    /// Next binary frame, skipping text frames.
    async fn next_binary(&mut self) -> Option<Vec<u8>> {
        loop {
            let frame = tokio::time::timeout(std::time::Duration::from_secs(2), self.frames.next())
                .await
                .ok()??;
            if let Message::Binary(data) = frame {
                return Some(data);
            }
        }
    }

    /// Everything already written, without waiting.
    fn written(&mut self) -> Vec<Message> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.frames.try_next() {
            frames.push(frame);
        }
        frames
    }

    /// Read until a frame matches.
    async fn expect<F: Fn(&ServerMessage) -> bool>(&mut self, pred: F) -> ServerMessage {
        while let Some(frame) = self.next().await {
            if pred(&frame) {
                return frame;
            }
        }
        panic!("expected frame never arrived");
    }
}

async fn setup() -> (TestApp, SessionId, UserId) {
    setup_with(TestApp::builder().build(), QualitySettings::default()).await
}

async fn setup_with(app: TestApp, quality: QualitySettings) -> (TestApp, SessionId, UserId) {
    let instructor = UserId::new();
    let request = ScheduleRequestBuilder::new(app.now() + Duration::minutes(5))
        .instructor(instructor)
        .quality(quality)
        .build();
    let (_, body) = app.post("/v1/sessions", &request).await;
    let session_id = body["session"]["id"].as_str().unwrap().parse().unwrap();
    (app, session_id, instructor)
}

async fn connect(app: &TestApp, session_id: SessionId, user: UserId, name: &str) -> Client {
    let actor = app.state.controller.get_or_spawn(session_id).await.unwrap();
    let (sink, frames) = mpsc::channel(64);
    let (handle, _task) = ConnectionActor::spawn(
        session_id,
        sink,
        32,
        CancellationToken::new(),
        app.state.metrics.clone(),
    );
    let participant = actor
        .connect(user, name.to_string(), None, handle)
        .await
        .unwrap();
    Client {
        participant,
        frames,
    }
}

async fn actor(app: &TestApp, session_id: SessionId) -> SessionActorHandle {
    app.state.controller.get(session_id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_offer_answer_exchange() {
    let (app, session_id, instructor) = setup().await;
    let mut prof = connect(&app, session_id, instructor, "Prof. Ada").await;
    assert!(matches!(
        prof.next().await,
        Some(ServerMessage::Joined { participants, .. }) if participants.len() == 1
    ));

    let mut student = connect(&app, session_id, UserId::new(), "Linus").await;
    let student_id = student.participant.id;
    let prof_id = prof.participant.id;
    prof
        .expect(|m| matches!(m, ServerMessage::ParticipantJoined { participant, .. } if participant.participant_id == student_id))
        .await;

    let offer = parse_client_frame(
        &json!({
            "type": "offer",
            "session_id": session_id,
            "to": student_id,
            "sdp": "v=0 offer"
        })
        .to_string(),
    )
    .unwrap();
    actor(&app, session_id)
        .await
        .signal(prof_id, offer)
        .await
        .unwrap();

    let frame = student
        .expect(|m| matches!(m, ServerMessage::Offer { .. }))
        .await;
    assert_eq!(
        frame,
        ServerMessage::Offer {
            session_id,
            from: prof_id,
            to: student_id,
            sdp: "v=0 offer".to_string(),
        }
    );

    actor(&app, session_id)
        .await
        .signal(
            student_id,
            ClientMessage::Answer {
                session_id,
                to: prof_id,
                sdp: "v=0 answer".to_string(),
            },
        )
        .await
        .unwrap();
    prof
        .expect(|m| matches!(m, ServerMessage::Answer { from, .. } if *from == student_id))
        .await;
}

#[tokio::test]
async fn test_student_moderation_is_answered_with_error() {
    let (app, session_id, instructor) = setup().await;
    let prof = connect(&app, session_id, instructor, "Prof. Ada").await;
    let mut student = connect(&app, session_id, UserId::new(), "Linus").await;

    actor(&app, session_id)
        .await
        .signal(
            student.participant.id,
            ClientMessage::Mute {
                session_id,
                target: prof.participant.id,
            },
        )
        .await
        .unwrap();

    let frame = student
        .expect(|m| matches!(m, ServerMessage::Error { .. }))
        .await;
    assert!(matches!(frame, ServerMessage::Error { code, .. } if code == "NOT_AUTHORIZED"));
}

#[tokio::test]
async fn test_kick_closes_the_student_connection() {
    let (app, session_id, instructor) = setup().await;
    let mut prof = connect(&app, session_id, instructor, "Prof. Ada").await;
    let mut student = connect(&app, session_id, UserId::new(), "Linus").await;
    let student_id = student.participant.id;

    actor(&app, session_id)
        .await
        .signal(
            prof.participant.id,
            ClientMessage::Kick {
                session_id,
                target: student_id,
            },
        )
        .await
        .unwrap();

    student
        .expect(|m| matches!(m, ServerMessage::Kicked { by, .. } if *by == instructor))
        .await;
    // Writer closed after the kick
    while student.next().await.is_some() {}

    prof
        .expect(|m| matches!(m, ServerMessage::ParticipantLeft { participant_id, .. } if *participant_id == student_id))
        .await;

    let (_, body) = app
        .get(&format!("/v1/sessions/{session_id}/participants"))
        .await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_notifies_connected_clients() {
    let (app, session_id, instructor) = setup().await;
    let mut student = connect(&app, session_id, UserId::new(), "Linus").await;

    let (status, _) = app
        .post(
            &format!("/v1/sessions/{session_id}/cancel"),
            &json!({ "requester_id": instructor, "reason": "snow day" }),
        )
        .await;
    assert_eq!(status, axum::http::StatusCode::OK);

    student
        .expect(|m| matches!(m, ServerMessage::ParticipantLeft { .. }))
        .await;
    while student.next().await.is_some() {}
}

#[tokio::test]
async fn test_stats_frames_feed_quality_stats() {
    let (app, session_id, instructor) = setup().await;
    let prof = connect(&app, session_id, instructor, "Prof. Ada").await;

    for _ in 0..3 {
        actor(&app, session_id)
            .await
            .signal(
                prof.participant.id,
                parse_client_frame(
                    &json!({
                        "type": "stats",
                        "session_id": session_id,
                        "quality": "720p",
                        "bitrate_kbps": 2000,
                        "frame_rate": 30.0,
                        "packet_loss_percent": 0.5,
                        "jitter_ms": 4.0,
                        "latency_ms": 40.0
                    })
                    .to_string(),
                )
                .unwrap(),
            )
            .await
            .unwrap();
    }

    // Round trip through the mailbox so the stats frames are processed
    actor(&app, session_id).await.get_state().await.unwrap();

    let (_, body) = app
        .get(&format!(
            "/v1/sessions/{session_id}/quality/stats?participant_id={}&limit=2",
            prof.participant.id
        ))
        .await;
    let stats = body["stats"].as_array().unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0]["bitrate_kbps"], 2000);
}

#[tokio::test]
async fn test_published_media_is_written_to_subscriber_socket() {
    let (app, session_id, instructor) = setup().await;
    let mut prof = connect(&app, session_id, instructor, "Prof. Ada").await;
    let mut student = connect(&app, session_id, UserId::new(), "Linus").await;
    let prof_id = prof.participant.id;

    actor(&app, session_id)
        .await
        .publish_media(prof_id, TrackRole::Screen, Bytes::from_static(b"slide-1"))
        .await
        .unwrap();

    let frame = student.next_binary().await.unwrap();
    let (role, publisher, payload) = decode_outbound(&Bytes::from(frame)).unwrap();
    assert_eq!(role, TrackRole::Screen);
    assert_eq!(publisher, prof_id);
    assert_eq!(payload, Bytes::from_static(b"slide-1"));

    actor(&app, session_id).await.get_state().await.unwrap();
    assert!(!prof
        .written()
        .iter()
        .any(|m| matches!(m, Message::Binary(_))));
}

#[tokio::test]
async fn test_muted_microphone_is_not_written_to_sockets() {
    let (app, session_id, instructor) = setup().await;
    let mut prof = connect(&app, session_id, instructor, "Prof. Ada").await;
    let mut student = connect(&app, session_id, UserId::new(), "Linus").await;
    let student_id = student.participant.id;

    let (status, _) = app
        .post(
            &format!("/v1/sessions/{session_id}/participants/{student_id}/mute"),
            &json!({ "requester_id": instructor }),
        )
        .await;
    assert_eq!(status, axum::http::StatusCode::OK);

    let session = actor(&app, session_id).await;
    session
        .publish_media(student_id, TrackRole::Microphone, Bytes::from_static(b"voice"))
        .await
        .unwrap();
    session.get_state().await.unwrap();
    assert!(!prof
        .written()
        .iter()
        .any(|m| matches!(m, Message::Binary(_))));

    session
        .publish_media(prof.participant.id, TrackRole::Microphone, Bytes::from_static(b"lecture"))
        .await
        .unwrap();
    let frame = student.next_binary().await.unwrap();
    let (role, _, payload) = decode_outbound(&Bytes::from(frame)).unwrap();
    assert_eq!(role, TrackRole::Microphone);
    assert_eq!(payload, Bytes::from_static(b"lecture"));
}

fn lossy_stats(session_id: SessionId) -> ClientMessage {
    parse_client_frame(
        &json!({
            "type": "stats",
            "session_id": session_id,
            "quality": "480p",
            "bitrate_kbps": 650,
            "frame_rate": 24.0,
            "packet_loss_percent": 9.0,
            "jitter_ms": 12.0,
            "latency_ms": 80.0
        })
        .to_string(),
    )
    .unwrap()
}

fn fast_quality_app() -> TestApp {
    TestApp::builder()
        .var("CC_TELEMETRY_INTERVAL_MS", "20")
        .build()
}

/// Bitrate bounds that cap the ladder at 480p.
fn capped_quality() -> QualitySettings {
    QualitySettings {
        default_quality: QualityTier::P720,
        adaptive_bitrate: true,
        min_bitrate_kbps: 300,
        max_bitrate_kbps: 700,
    }
}

#[tokio::test]
async fn test_sustained_loss_steps_quality_down() {
    let (app, session_id, instructor) = setup_with(fast_quality_app(), capped_quality()).await;
    let mut prof = connect(&app, session_id, instructor, "Prof. Ada").await;
    let prof_id = prof.participant.id;

    for _ in 0..3 {
        actor(&app, session_id)
            .await
            .signal(prof_id, lossy_stats(session_id))
            .await
            .unwrap();
    }

    let frame = prof
        .expect(|m| matches!(m, ServerMessage::QualityChange { .. }))
        .await;
    // 480p -> 360p, whose 800 kbps target is clamped to the session max.
    assert_eq!(
        frame,
        ServerMessage::QualityChange {
            session_id,
            participant_id: prof_id,
            quality: QualityTier::P360,
            bitrate_kbps: 700,
        }
    );

    actor(&app, session_id).await.get_state().await.unwrap();
    let (_, body) = app
        .get(&format!("/v1/sessions/{session_id}/participants"))
        .await;
    let row = body
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["id"] == json!(prof_id))
        .unwrap();
    assert_eq!(row["quality"], "360p");
}

#[tokio::test]
async fn test_short_loss_burst_keeps_quality() {
    let (app, session_id, instructor) = setup_with(fast_quality_app(), capped_quality()).await;
    let mut prof = connect(&app, session_id, instructor, "Prof. Ada").await;
    let prof_id = prof.participant.id;

    for _ in 0..2 {
        actor(&app, session_id)
            .await
            .signal(prof_id, lossy_stats(session_id))
            .await
            .unwrap();
    }

    // Several telemetry passes.
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    actor(&app, session_id).await.get_state().await.unwrap();

    assert!(!prof.written().iter().any(|m| matches!(
        m,
        Message::Text(text) if text.contains("\"quality_change\"")
    )));
}
