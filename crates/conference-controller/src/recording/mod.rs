//! Recording orchestration.
//!
//! A recording is opened while its session is ACTIVE, collects routed media
//! into a capture buffer, and on stop moves to PROCESSING with a hard
//! deadline of `completed_at + sla`. A background pipeline uploads the
//! assembled object with bounded retries. The watchdog fails anything still
//! PROCESSING past its deadline, and a late upload result never resurrects
//! a FAILED recording.

pub mod storage;
pub mod watchdog;

use crate::config::Config;
use crate::errors::CcError;
use crate::models::{
    normalize_paging, paginate, Page, Recording, RecordingStatus, Session, SessionStatus,
    StorageLocation,
};
use crate::observability::metrics as prom;
use crate::quality::QualityTier;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::types::{RecordingId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

pub use storage::{InMemoryObjectStore, ObjectStore, StorageError};
pub use watchdog::start_recording_watchdog;

/// Base delay for upload retry backoff.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Maximum upload retry backoff.
pub const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Error recorded when the deadline passes before the upload lands.
pub const PROCESSING_TIMEOUT_ERROR: &str = "processing timeout";

const CONTENT_TYPE: &str = "video/webm";

/// Events on the recording state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingEvent {
    Stop,
    UploadSucceeded,
    UploadFailed,
    DeadlineExceeded,
}

/// Forward-only transition table. `None` means the event is ignored.
#[must_use]
pub fn advance(status: RecordingStatus, event: RecordingEvent) -> Option<RecordingStatus> {
    match (status, event) {
        (RecordingStatus::Recording, RecordingEvent::Stop) => Some(RecordingStatus::Processing),
        (RecordingStatus::Processing, RecordingEvent::UploadSucceeded) => {
            Some(RecordingStatus::Available)
        }
        (
            RecordingStatus::Processing,
            RecordingEvent::UploadFailed | RecordingEvent::DeadlineExceeded,
        ) => Some(RecordingStatus::Failed),
        _ => None,
    }
}

/// Object key for a recording.
#[must_use]
pub fn object_key(
    started_at: DateTime<Utc>,
    session_id: SessionId,
    recording_id: RecordingId,
) -> String {
    format!(
        "recordings/{}/{session_id}/{recording_id}.webm",
        started_at.format("%Y/%m/%d")
    )
}

#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub bucket: String,
    pub sla: chrono::Duration,
    pub max_attempts: u32,
    pub upload_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl From<&Config> for RecordingSettings {
    fn from(config: &Config) -> Self {
        Self {
            bucket: config.recording_bucket.clone(),
            sla: config.recording_sla(),
            max_attempts: config.recording_max_attempts,
            upload_timeout: config.upload_timeout(),
            backoff_base: BACKOFF_BASE,
            backoff_max: BACKOFF_MAX,
        }
    }
}

/// Options for `StartRecording`.
#[derive(Debug, Clone, Copy)]
pub struct StartOptions {
    pub quality: Option<QualityTier>,
    pub include_audio: bool,
    pub include_screen_share: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            quality: None,
            include_audio: true,
            include_screen_share: true,
        }
    }
}

#[derive(Debug)]
struct Inner {
    settings: RecordingSettings,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ObjectStore>,
    recordings: RwLock<HashMap<RecordingId, Recording>>,
    /// Open (RECORDING) recording per session.
    open: RwLock<HashMap<SessionId, RecordingId>>,
    capture: Mutex<HashMap<RecordingId, BytesMut>>,
    pipelines: TaskTracker,
}

/// Cheaply cloneable handle to the recording store and pipelines.
#[derive(Debug, Clone)]
pub struct RecordingOrchestrator {
    inner: Arc<Inner>,
}

impl RecordingOrchestrator {
    #[must_use]
    pub fn new(
        settings: RecordingSettings,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                clock,
                store,
                recordings: RwLock::new(HashMap::new()),
                open: RwLock::new(HashMap::new()),
                capture: Mutex::new(HashMap::new()),
                pipelines: TaskTracker::new(),
            }),
        }
    }

    /// Open a recording for an ACTIVE session.
    #[instrument(skip_all, name = "cc.recording.start", fields(session_id = %session.id))]
    pub async fn start(&self, session: &Session, options: StartOptions) -> Result<Recording, CcError> {
        if session.status != SessionStatus::Active {
            return Err(CcError::InvalidTransition {
                from: session.status.as_str().to_string(),
                event: "record".to_string(),
            });
        }

        let mut open = self.inner.open.write().await;
        if open.contains_key(&session.id) {
            return Err(CcError::Conflict(
                "A recording is already in progress for this session".to_string(),
            ));
        }

        let quality = options
            .quality
            .unwrap_or(session.quality.default_quality)
            .clamp_to(session.quality.min_bitrate_kbps, session.quality.max_bitrate_kbps);
        let recording = Recording {
            id: RecordingId::new(),
            session_id: session.id,
            status: RecordingStatus::Recording,
            started_at: self.inner.clock.now(),
            completed_at: None,
            duration_seconds: None,
            size_bytes: None,
            location: None,
            available_at: None,
            quality,
            include_audio: options.include_audio,
            include_screen_share: options.include_screen_share,
            error: None,
            attempts: 0,
        };

        open.insert(session.id, recording.id);
        self.inner
            .recordings
            .write()
            .await
            .insert(recording.id, recording.clone());
        self.inner
            .capture
            .lock()
            .await
            .insert(recording.id, BytesMut::new());

        info!(
            target: "cc.recording",
            session_id = %session.id,
            recording_id = %recording.id,
            quality = %quality,
            "Recording started"
        );
        Ok(recording)
    }

    /// Append routed media to the session's open recording, if any.
    pub async fn capture(&self, session_id: SessionId, payload: &Bytes) {
        let Some(recording_id) = self.inner.open.read().await.get(&session_id).copied() else {
            return;
        };
        if let Some(buffer) = self.inner.capture.lock().await.get_mut(&recording_id) {
            buffer.extend_from_slice(payload);
        }
    }

    /// RECORDING -> PROCESSING and spawn the upload pipeline.
    ///
    /// Returns `None` when the session has no open recording.
    #[instrument(skip_all, name = "cc.recording.stop", fields(session_id = %session_id))]
    pub async fn stop(
        &self,
        session_id: SessionId,
        completed_at: DateTime<Utc>,
    ) -> Option<Recording> {
        let recording_id = self.inner.open.write().await.remove(&session_id)?;
        let body = self
            .inner
            .capture
            .lock()
            .await
            .remove(&recording_id)
            .map(BytesMut::freeze)
            .unwrap_or_default();

        let recording = {
            let mut recordings = self.inner.recordings.write().await;
            let recording = recordings.get_mut(&recording_id)?;
            let next = advance(recording.status, RecordingEvent::Stop)?;
            recording.status = next;
            recording.completed_at = Some(completed_at);
            recording.duration_seconds =
                Some((completed_at - recording.started_at).num_seconds().max(0));
            recording.available_at = Some(completed_at + self.inner.settings.sla);
            recording.clone()
        };

        info!(
            target: "cc.recording",
            session_id = %session_id,
            recording_id = %recording_id,
            bytes = body.len(),
            "Recording stopped, processing"
        );

        let this = self.clone();
        self.inner.pipelines.spawn(async move {
            this.process(recording_id, body).await;
        });

        Some(recording)
    }

    /// Upload with bounded retries inside the remaining deadline.
    #[instrument(skip_all, name = "cc.recording.process", fields(recording_id = %recording_id))]
    async fn process(&self, recording_id: RecordingId, body: Bytes) {
        let Some(recording) = self.get(recording_id).await.ok() else {
            return;
        };
        let Some(available_at) = recording.available_at else {
            return;
        };
        let settings = &self.inner.settings;
        let key = object_key(recording.started_at, recording.session_id, recording_id);

        let mut delay = settings.backoff_base;
        let mut last_error = String::from("no upload attempted");
        let mut attempts = 0;

        while attempts < settings.max_attempts {
            let remaining = (available_at - self.inner.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                last_error = PROCESSING_TIMEOUT_ERROR.to_string();
                break;
            }
            attempts += 1;

            let started = Instant::now();
            let attempt_timeout = settings.upload_timeout.min(remaining);
            let result = tokio::time::timeout(
                attempt_timeout,
                self.inner
                    .store
                    .put_object(&settings.bucket, &key, body.clone(), CONTENT_TYPE),
            )
            .await;

            match result {
                Ok(Ok(size)) => {
                    prom::record_upload_attempt("success", started.elapsed());
                    self.finish(
                        recording_id,
                        RecordingEvent::UploadSucceeded,
                        attempts,
                        Some((
                            StorageLocation {
                                bucket: settings.bucket.clone(),
                                key: key.clone(),
                            },
                            size,
                        )),
                        None,
                    )
                    .await;
                    return;
                }
                Ok(Err(StorageError::Rejected(reason))) => {
                    prom::record_upload_attempt("rejected", started.elapsed());
                    last_error = format!("upload rejected: {reason}");
                    break;
                }
                Ok(Err(err)) => {
                    prom::record_upload_attempt("error", started.elapsed());
                    last_error = err.to_string();
                }
                Err(_) => {
                    prom::record_upload_attempt("timeout", started.elapsed());
                    last_error = format!(
                        "upload attempt timed out after {}s",
                        attempt_timeout.as_secs()
                    );
                }
            }

            warn!(
                target: "cc.recording",
                recording_id = %recording_id,
                attempt = attempts,
                max_attempts = settings.max_attempts,
                error = %last_error,
                "Recording upload attempt failed"
            );

            if attempts < settings.max_attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(settings.backoff_max);
            }
        }

        self.finish(
            recording_id,
            RecordingEvent::UploadFailed,
            attempts,
            None,
            Some(last_error),
        )
        .await;
    }

    async fn finish(
        &self,
        recording_id: RecordingId,
        event: RecordingEvent,
        attempts: u32,
        uploaded: Option<(StorageLocation, u64)>,
        error_message: Option<String>,
    ) {
        let mut recordings = self.inner.recordings.write().await;
        let Some(recording) = recordings.get_mut(&recording_id) else {
            return;
        };
        recording.attempts = attempts;

        // An upload that lands after `available_at` does not make it AVAILABLE.
        let overdue = event == RecordingEvent::UploadSucceeded
            && recording
                .available_at
                .is_some_and(|deadline| self.inner.clock.now() > deadline);
        let (event, uploaded, error_message) = if overdue {
            warn!(
                target: "cc.recording",
                recording_id = %recording_id,
                "Upload finished after the processing deadline"
            );
            (
                RecordingEvent::DeadlineExceeded,
                None,
                Some(PROCESSING_TIMEOUT_ERROR.to_string()),
            )
        } else {
            (event, uploaded, error_message)
        };

        let Some(next) = advance(recording.status, event) else {
            warn!(
                target: "cc.recording",
                recording_id = %recording_id,
                status = recording.status.as_str(),
                ?event,
                "Late pipeline result ignored"
            );
            return;
        };
        recording.status = next;

        match uploaded {
            Some((location, size)) => {
                info!(
                    target: "cc.recording",
                    recording_id = %recording_id,
                    key = %location.key,
                    size_bytes = size,
                    attempts,
                    "Recording available"
                );
                recording.location = Some(location);
                recording.size_bytes = Some(size);
                prom::record_recording_finished("available", "uploaded");
            }
            None => {
                error!(
                    target: "cc.recording",
                    recording_id = %recording_id,
                    attempts,
                    error = error_message.as_deref().unwrap_or("unknown"),
                    "Recording failed"
                );
                recording.error = error_message;
                let reason = if event == RecordingEvent::DeadlineExceeded {
                    "processing_timeout"
                } else {
                    "upload"
                };
                prom::record_recording_finished("failed", reason);
            }
        }
    }

    /// Fail every PROCESSING recording whose deadline has passed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<RecordingId> {
        let mut recordings = self.inner.recordings.write().await;
        let mut failed = Vec::new();
        for recording in recordings.values_mut() {
            let expired = recording.available_at.is_some_and(|deadline| now > deadline);
            if !expired {
                continue;
            }
            if let Some(next) = advance(recording.status, RecordingEvent::DeadlineExceeded) {
                recording.status = next;
                recording.error = Some(PROCESSING_TIMEOUT_ERROR.to_string());
                failed.push(recording.id);
                prom::record_recording_finished("failed", "processing_timeout");
            }
        }
        failed
    }

    pub async fn get(&self, recording_id: RecordingId) -> Result<Recording, CcError> {
        self.inner
            .recordings
            .read()
            .await
            .get(&recording_id)
            .cloned()
            .ok_or_else(|| CcError::RecordingNotFound(recording_id.to_string()))
    }

    /// Recordings ordered by start time, optionally for one session.
    pub async fn list(
        &self,
        session_id: Option<SessionId>,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Page<Recording> {
        let (page, page_size) = normalize_paging(page, page_size);
        let recordings = self.inner.recordings.read().await;
        let mut matching: Vec<Recording> = recordings
            .values()
            .filter(|r| session_id.map_or(true, |s| r.session_id == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        paginate(&matching, page, page_size)
    }

    pub async fn is_recording(&self, session_id: SessionId) -> bool {
        self.inner.open.read().await.contains_key(&session_id)
    }

    /// Wait for in-flight pipelines, bounded by `timeout`.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.inner.pipelines.close();
        let drained = tokio::time::timeout(timeout, self.inner.pipelines.wait())
            .await
            .is_ok();
        debug!(target: "cc.recording", drained, "Recording pipelines drained");
        drained
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }
}
