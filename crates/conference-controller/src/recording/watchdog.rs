//! Recording watchdog background task.
//!
//! Periodically fails recordings that are still PROCESSING past their
//! `available_at` deadline. The task exits when its cancellation token fires.

use super::RecordingOrchestrator;
use crate::observability::metrics as prom;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Start the recording watchdog.
#[instrument(skip_all, name = "cc.recording.watchdog")]
pub async fn start_recording_watchdog(
    orchestrator: RecordingOrchestrator,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "cc.recording.watchdog",
        interval_seconds = interval.as_secs(),
        "Starting recording watchdog"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_sweep(&orchestrator).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "cc.recording.watchdog",
                    "Recording watchdog received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

/// One sweep. Returns how many recordings were failed.
pub(crate) async fn run_sweep(orchestrator: &RecordingOrchestrator) -> usize {
    let now = orchestrator.clock().now();
    let failed = orchestrator.sweep_expired(now).await;
    prom::record_watchdog_sweep(failed.len() as u64);

    if failed.is_empty() {
        debug!(target: "cc.recording.watchdog", "No expired recordings");
    } else {
        for recording_id in &failed {
            warn!(
                target: "cc.recording.watchdog",
                recording_id = %recording_id,
                "Recording exceeded processing deadline"
            );
        }
    }
    failed.len()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{QualitySettings, RecordingStatus, Session, SessionFlags, SessionStatus};
    use crate::recording::storage::{ObjectStore, StorageError};
    use crate::recording::{RecordingSettings, StartOptions, BACKOFF_BASE, BACKOFF_MAX};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{DateTime, Utc};
    use common::clock::{Clock, ManualClock};
    use common::types::{SessionId, UserId};
    use std::sync::Arc;

    /// Store whose uploads never complete.
    #[derive(Debug)]
    struct HangingStore;

    #[async_trait]
    impl ObjectStore for HangingStore {
        async fn put_object(
            &self,
            _bucket: &str,
            _key: &str,
            _body: Bytes,
            _content_type: &str,
        ) -> Result<u64, StorageError> {
            std::future::pending().await
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-03T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn session() -> Session {
        Session {
            id: SessionId::new(),
            instructor_id: UserId::new(),
            title: "Chemistry".to_string(),
            description: String::new(),
            start_time: t0(),
            duration_minutes: 60,
            status: SessionStatus::Active,
            max_participants: 10,
            flags: SessionFlags::default(),
            quality: QualitySettings::default(),
            join_url: String::new(),
            created_at: t0(),
            activated_at: Some(t0()),
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fails_hung_upload() {
        let clock = Arc::new(ManualClock::new(t0()));
        let orchestrator = RecordingOrchestrator::new(
            RecordingSettings {
                bucket: "rec".to_string(),
                sla: chrono::Duration::minutes(30),
                max_attempts: 3,
                upload_timeout: Duration::from_secs(3600),
                backoff_base: BACKOFF_BASE,
                backoff_max: BACKOFF_MAX,
            },
            clock.clone(),
            Arc::new(HangingStore),
        );

        let session = session();
        let recording = orchestrator
            .start(&session, StartOptions::default())
            .await
            .unwrap();
        orchestrator.stop(session.id, clock.now()).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(start_recording_watchdog(
            orchestrator.clone(),
            Duration::from_secs(60),
            cancel.clone(),
        ));

        clock.advance(chrono::Duration::minutes(29));
        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(
            orchestrator.get(recording.id).await.unwrap().status,
            RecordingStatus::Processing
        );

        clock.advance(chrono::Duration::minutes(2));
        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        let failed = orchestrator.get(recording.id).await.unwrap();
        assert_eq!(failed.status, RecordingStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("processing timeout"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_sweep_counts() {
        let clock = Arc::new(ManualClock::new(t0()));
        let orchestrator = RecordingOrchestrator::new(
            RecordingSettings {
                bucket: "rec".to_string(),
                sla: chrono::Duration::minutes(30),
                max_attempts: 1,
                upload_timeout: Duration::from_secs(1),
                backoff_base: BACKOFF_BASE,
                backoff_max: BACKOFF_MAX,
            },
            clock.clone(),
            Arc::new(HangingStore),
        );
        assert_eq!(run_sweep(&orchestrator).await, 0);
    }
}
