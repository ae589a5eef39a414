//! Pre-configured test data fixtures for Conference Controller testing.
//!
//! Provides:
//! - Environment maps accepted by `Config::from_vars`
//! - A fixed start instant for the manual clock
//! - Builders for schedule requests
//! - [`TestApp`], a fully wired `AppState` and router

use crate::http::request_json;
use crate::mock_invitations::RecordingInvitationSender;
use crate::mock_storage::FlakyObjectStore;
use axum::http::{Method, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use common::clock::ManualClock;
use common::types::UserId;
use conference_controller::config::Config;
use conference_controller::models::api::ScheduleSessionRequest;
use conference_controller::models::{QualitySettings, SessionFlags};
use conference_controller::routes::{build_routes, AppState};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Instant every [`TestApp`] clock starts at: Monday 2026-03-09 09:00 UTC.
#[must_use]
pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-09T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Minimal environment for `Config::from_vars`.
#[must_use]
pub fn test_config_vars() -> HashMap<String, String> {
    HashMap::from([
        (
            "CC_JOIN_URL_BASE".to_string(),
            "https://classes.example.com/join".to_string(),
        ),
        (
            "CC_RECORDING_BUCKET".to_string(),
            "test-recordings".to_string(),
        ),
        ("CC_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        (
            "CC_HEALTH_BIND_ADDRESS".to_string(),
            "127.0.0.1:0".to_string(),
        ),
    ])
}

/// Config built from [`test_config_vars`].
#[must_use]
pub fn test_config() -> Config {
    Config::from_vars(&test_config_vars()).unwrap()
}

/// Builder for [`ScheduleSessionRequest`].
#[derive(Debug, Clone)]
pub struct ScheduleRequestBuilder {
    request: ScheduleSessionRequest,
}

impl ScheduleRequestBuilder {
    /// A 60 minute session for a fresh instructor starting at `start_time`.
    #[must_use]
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            request: ScheduleSessionRequest {
                instructor_id: UserId::new(),
                title: "Intro to Distributed Systems".to_string(),
                description: "Week 3: consensus".to_string(),
                start_time,
                duration_minutes: 60,
                max_participants: None,
                flags: SessionFlags::default(),
                quality: QualitySettings::default(),
            },
        }
    }

    #[must_use]
    pub fn instructor(mut self, instructor_id: UserId) -> Self {
        self.request.instructor_id = instructor_id;
        self
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.request.title = title.into();
        self
    }

    #[must_use]
    pub fn duration_minutes(mut self, minutes: i64) -> Self {
        self.request.duration_minutes = minutes;
        self
    }

    #[must_use]
    pub fn max_participants(mut self, max: u32) -> Self {
        self.request.max_participants = Some(max);
        self
    }

    #[must_use]
    pub fn flags(mut self, flags: SessionFlags) -> Self {
        self.request.flags = flags;
        self
    }

    #[must_use]
    pub fn quality(mut self, quality: QualitySettings) -> Self {
        self.request.quality = quality;
        self
    }

    #[must_use]
    pub fn build(self) -> ScheduleSessionRequest {
        self.request
    }
}

/// A wired controller with inspectable collaborators.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: Router,
    pub clock: Arc<ManualClock>,
    pub store: Arc<FlakyObjectStore>,
    pub invitations: Arc<RecordingInvitationSender>,
}

impl TestApp {
    #[must_use]
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    /// Current manual clock time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        use common::clock::Clock;
        self.clock.now()
    }

    /// Advance wall time. Tokio time is not touched.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        request_json::<()>(&self.router, Method::GET, uri, None).await
    }

    pub async fn post<T: Serialize>(&self, uri: &str, body: &T) -> (StatusCode, Value) {
        request_json(&self.router, Method::POST, uri, Some(body)).await
    }

    pub async fn patch<T: Serialize>(&self, uri: &str, body: &T) -> (StatusCode, Value) {
        request_json(&self.router, Method::PATCH, uri, Some(body)).await
    }
}

/// Builder for [`TestApp`].
#[derive(Debug)]
pub struct TestAppBuilder {
    vars: HashMap<String, String>,
    start: DateTime<Utc>,
    store: FlakyObjectStore,
    invitations: RecordingInvitationSender,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self {
            vars: test_config_vars(),
            start: t0(),
            store: FlakyObjectStore::new(),
            invitations: RecordingInvitationSender::new(),
        }
    }
}

impl TestAppBuilder {
    /// Override one config variable.
    #[must_use]
    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn start_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub fn store(mut self, store: FlakyObjectStore) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn invitations(mut self, invitations: RecordingInvitationSender) -> Self {
        self.invitations = invitations;
        self
    }

    /// Build the app. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn build(self) -> TestApp {
        let config = Config::from_vars(&self.vars).unwrap();
        let clock = Arc::new(ManualClock::new(self.start));
        let store = Arc::new(self.store);
        let invitations = Arc::new(self.invitations);

        let state = Arc::new(AppState::new(
            config,
            clock.clone(),
            store.clone(),
            invitations.clone(),
        ));
        let router = build_routes(Arc::clone(&state));

        TestApp {
            state,
            router,
            clock,
            store,
            invitations,
        }
    }
}
