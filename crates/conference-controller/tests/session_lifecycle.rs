//! End-to-end session lifecycle through the HTTP router.
//!
//! A session scheduled an hour out with room for two: early join is refused,
//! the instructor activates it inside the join window, a third user is
//! turned away, and the last leave completes it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::http::StatusCode;
use cc_test_utils::{ScheduleRequestBuilder, TestApp};
use chrono::Duration;
use common::types::UserId;
use serde_json::json;

#[tokio::test]
async fn test_scheduled_session_full_lifecycle() {
    let app = TestApp::builder().build();
    let instructor = UserId::new();
    let request = ScheduleRequestBuilder::new(app.now() + Duration::minutes(60))
        .instructor(instructor)
        .max_participants(2)
        .build();

    let (status, body) = app.post("/v1/sessions", &request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["session"]["status"], "SCHEDULED");
    assert!(body["calendar_ics"]
        .as_str()
        .unwrap()
        .contains("BEGIN:VCALENDAR"));
    let session_id = body["session"]["id"].as_str().unwrap().to_string();

    // 50 minutes before the join window opens
    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/join"),
            &json!({ "user_id": instructor, "display_name": "Prof. Ada" }),
        )
        .await;
    assert_eq!(status.as_u16(), 425);
    assert_eq!(body["error"]["code"], "TOO_EARLY");
    assert!(body["error"]["retry_after_secs"].as_u64().unwrap() > 0);

    let (_, body) = app.get(&format!("/v1/sessions/{session_id}/status")).await;
    assert_eq!(body["can_join"], false);

    app.advance(Duration::minutes(55));

    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/join"),
            &json!({ "user_id": instructor, "display_name": "Prof. Ada" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["participant"]["role"], "INSTRUCTOR");
    assert_eq!(body["session_status"], "ACTIVE");
    assert_eq!(
        body["ws_url"],
        format!("/v1/sessions/{session_id}/ws?user_id={instructor}")
    );
    let instructor_pid = body["participant"]["id"].as_str().unwrap().to_string();

    let student = UserId::new();
    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/join"),
            &json!({ "user_id": student, "display_name": "Grace" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["participant"]["role"], "STUDENT");
    let student_pid = body["participant"]["id"].as_str().unwrap().to_string();

    // Rejoin is idempotent and does not count against capacity
    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/join"),
            &json!({ "user_id": student, "display_name": "Grace" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["participant"]["id"], student_pid.as_str());

    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/join"),
            &json!({ "user_id": UserId::new(), "display_name": "Latecomer" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SESSION_FULL");

    app.advance(Duration::minutes(20));
    let (_, body) = app.get(&format!("/v1/sessions/{session_id}/status")).await;
    assert_eq!(body["status"], "ACTIVE");
    assert_eq!(body["participant_count"], 2);
    assert_eq!(body["elapsed_minutes"], 20);
    assert_eq!(body["is_recording"], false);

    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/leave"),
            &json!({ "participant_id": student_pid }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["remaining_participants"], 1);
    assert_eq!(body["session_status"], "ACTIVE");

    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/leave"),
            &json!({ "participant_id": instructor_pid }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["remaining_participants"], 0);
    assert_eq!(body["session_status"], "COMPLETED");

    // Leaving again is a no-op
    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/leave"),
            &json!({ "participant_id": instructor_pid }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_status"], "COMPLETED");

    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/join"),
            &json!({ "user_id": student, "display_name": "Grace" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (_, body) = app
        .get(&format!(
            "/v1/sessions/{session_id}/participants?include_left=true"
        ))
        .await;
    let participants = body.as_array().unwrap();
    assert_eq!(participants.len(), 2);
    assert!(participants.iter().all(|p| !p["left_at"].is_null()));
}

#[tokio::test]
async fn test_cancel_closes_session_for_everyone() {
    let app = TestApp::builder().build();
    let instructor = UserId::new();
    let request = ScheduleRequestBuilder::new(app.now() + Duration::minutes(5))
        .instructor(instructor)
        .build();
    let (_, body) = app.post("/v1/sessions", &request).await;
    let session_id = body["session"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .post(
            &format!("/v1/sessions/{session_id}/join"),
            &json!({ "user_id": UserId::new(), "display_name": "Early bird" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/cancel"),
            &json!({ "requester_id": UserId::new(), "reason": "not mine" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "NOT_AUTHORIZED");

    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/cancel"),
            &json!({ "requester_id": instructor, "reason": "instructor ill" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(body["cancel_reason"], "instructor ill");

    let (_, body) = app.get(&format!("/v1/sessions/{session_id}/status")).await;
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(body["participant_count"], 0);
    assert_eq!(body["can_join"], false);

    let (status, body) = app
        .post(
            &format!("/v1/sessions/{session_id}/cancel"),
            &json!({ "requester_id": instructor }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
}
