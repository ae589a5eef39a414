//! Metrics definitions for the Conference Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `cc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 3 values (controller, session, connection)
//! - `message_type`: bounded by the signaling message enum (~15 values)
//! - `outcome` / `status`: small fixed sets per metric
//! - `operation`: bounded by call sites

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Signaling relay latency - in-process hop, p99 < 50ms
        .set_buckets_for_metric(
            Matcher::Prefix("cc_signaling".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500,
            ],
        )
        .map_err(|e| format!("Failed to set signaling buckets: {e}"))?
        // Recording uploads - large objects, seconds to minutes
        .set_buckets_for_metric(
            Matcher::Prefix("cc_recording".to_string()),
            &[
                0.100, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000, 60.000, 120.000, 300.000,
            ],
        )
        .map_err(|e| format!("Failed to set recording buckets: {e}"))?
        // HTTP RPC latency
        .set_buckets_for_metric(
            Matcher::Prefix("cc_http".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `cc_sessions_active`
pub fn set_sessions_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_sessions_active").set(count as f64);
}

/// Metric: `cc_connections_active`
pub fn set_connections_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_connections_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `cc_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Signaling
// ============================================================================

/// Record time spent handling one inbound signaling message.
///
/// Metric: `cc_signaling_message_latency_seconds`
/// Labels: `message_type`
pub fn record_message_latency(message_type: &str, duration: Duration) {
    histogram!("cc_signaling_message_latency_seconds", "message_type" => message_type.to_string())
        .record(duration.as_secs_f64());
}

/// Record a negotiation relay outcome.
///
/// Metric: `cc_signaling_relays_total`
/// Labels: `outcome` (delivered, dropped)
pub fn record_relay(outcome: &str) {
    counter!("cc_signaling_relays_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an admission attempt.
///
/// Metric: `cc_admissions_total`
/// Labels: `outcome` (admitted, rejoined, too_early, full, not_authorized, invalid)
pub fn record_admission(outcome: &str) {
    counter!("cc_admissions_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a forced participant removal.
///
/// Metric: `cc_participants_removed_total`
/// Labels: `reason` (left, disconnected, kicked, slow_consumer, session_ended)
pub fn record_participant_removed(reason: &str) {
    counter!("cc_participants_removed_total", "reason" => reason.to_string()).increment(1);
}

/// Record a moderation decision.
///
/// Metric: `cc_moderation_actions_total`
/// Labels: `action`, `outcome` (allowed, rejected)
pub fn record_moderation(action: &str, outcome: &str) {
    counter!("cc_moderation_actions_total",
        "action" => action.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ============================================================================
// Quality
// ============================================================================

/// Metric: `cc_quality_transitions_total`
/// Labels: `direction` (up, down, manual)
pub fn record_quality_transition(direction: &str) {
    counter!("cc_quality_transitions_total", "direction" => direction.to_string()).increment(1);
}

/// Metric: `cc_quality_samples_total`
pub fn record_quality_samples(count: u64) {
    counter!("cc_quality_samples_total").increment(count);
}

// ============================================================================
// Recording
// ============================================================================

/// Record one upload attempt.
///
/// Metrics: `cc_recording_upload_attempts_total` (labels: `status`) and
/// `cc_recording_upload_duration_seconds`.
pub fn record_upload_attempt(status: &str, duration: Duration) {
    histogram!("cc_recording_upload_duration_seconds").record(duration.as_secs_f64());
    counter!("cc_recording_upload_attempts_total", "status" => status.to_string()).increment(1);
}

/// Record a recording reaching a terminal status.
///
/// Metric: `cc_recordings_finished_total`
/// Labels: `status` (available, failed), `reason`
pub fn record_recording_finished(status: &str, reason: &str) {
    counter!("cc_recordings_finished_total",
        "status" => status.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Metric: `cc_recording_watchdog_sweeps_total`
pub fn record_watchdog_sweep(failed: u64) {
    counter!("cc_recording_watchdog_sweeps_total").increment(1);
    if failed > 0 {
        counter!("cc_recording_watchdog_failed_total").increment(failed);
    }
}

// ============================================================================
// Actors
// ============================================================================

/// Metric: `cc_actor_panics_total`
/// Labels: `actor_type`
///
/// Any non-zero value indicates a bug.
pub fn record_actor_panic(actor_type: &str) {
    counter!("cc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// Metric: `cc_messages_dropped_total`
/// Labels: `actor_type`
pub fn record_message_dropped(actor_type: &str) {
    counter!("cc_messages_dropped_total", "actor_type" => actor_type.to_string()).increment(1);
}

// ============================================================================
// HTTP
// ============================================================================

/// Record one HTTP response.
///
/// `endpoint` is the matched route template (`/v1/sessions/:id`), or
/// `/other` when nothing matched, so cardinality stays bounded.
///
/// Metrics: `cc_http_request_duration_seconds`, `cc_http_requests_total`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    histogram!("cc_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => categorize_status_code(status_code)
    )
    .record(duration.as_secs_f64());

    counter!("cc_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Record an error by category.
///
/// Metric: `cc_errors_total`
/// Labels: `operation`, `category`, `status_code`
pub fn record_error(operation: &str, category: &str, status_code: u16) {
    counter!("cc_errors_total",
        "operation" => operation.to_string(),
        "category" => category.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Metric: `cc_invitations_total`
/// Labels: `status` (sent, error, timeout)
pub fn record_invitation(status: &str) {
    counter!("cc_invitations_total", "status" => status.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::MetricKind;

    #[test]
    fn test_recording_functions_without_recorder() {
        // A missing recorder is a no-op, never a panic.
        set_sessions_active(3);
        set_connections_active(7);
        record_relay("delivered");
        record_upload_attempt("error", Duration::from_millis(10));
        record_watchdog_sweep(0);
    }

    #[test]
    fn test_counters_are_labelled() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_relay("delivered");
            record_relay("dropped");
            record_relay("dropped");
            record_admission("full");
            record_quality_transition("down");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let dropped = snapshot.iter().find(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == "cc_signaling_relays_total"
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == "outcome" && l.value() == "dropped")
        });
        let (_, _, _, value) = dropped.expect("dropped relay counter recorded");
        assert_eq!(*value, DebugValue::Counter(2));

        assert!(snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "cc_admissions_total"));
        assert!(snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "cc_quality_transitions_total"));
    }

    #[test]
    fn test_status_categories() {
        assert_eq!(categorize_status_code(201), "success");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(425), "error");
    }

    #[test]
    fn test_watchdog_sweep_counts_failures() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_watchdog_sweep(0);
            record_watchdog_sweep(2);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let failed = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "cc_recording_watchdog_failed_total")
            .map(|(_, _, _, value)| value.clone());
        assert_eq!(failed, Some(DebugValue::Counter(2)).as_ref());
    }

    #[test]
    fn test_gauges_and_histograms_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_sessions_active(4);
            set_actor_mailbox_depth("session", 12);
            record_message_latency("offer", Duration::from_millis(3));
            record_upload_attempt("success", Duration::from_secs(2));
            record_error("schedule_session", "validation", 400);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let names: Vec<&str> = snapshot
            .iter()
            .map(|(key, _, _, _)| key.key().name())
            .collect();
        for expected in [
            "cc_sessions_active",
            "cc_actor_mailbox_depth",
            "cc_signaling_message_latency_seconds",
            "cc_recording_upload_duration_seconds",
            "cc_recording_upload_attempts_total",
            "cc_errors_total",
        ] {
            assert!(names.contains(&expected), "missing metric {expected}");
        }
    }
}
