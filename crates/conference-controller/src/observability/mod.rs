//! Observability for the Conference Controller.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit safe
//! fields. Display names, SDP and ICE payloads are never logged.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `cc_sessions_active` | Gauge | none |
//! | `cc_connections_active` | Gauge | none |
//! | `cc_actor_mailbox_depth` | Gauge | `actor_type` |
//! | `cc_actor_panics_total` | Counter | `actor_type` |
//! | `cc_messages_dropped_total` | Counter | `actor_type` |
//! | `cc_signaling_message_latency_seconds` | Histogram | `message_type` |
//! | `cc_signaling_relays_total` | Counter | `outcome` |
//! | `cc_admissions_total` | Counter | `outcome` |
//! | `cc_participants_removed_total` | Counter | `reason` |
//! | `cc_moderation_actions_total` | Counter | `action`, `outcome` |
//! | `cc_quality_samples_total` | Counter | none |
//! | `cc_quality_transitions_total` | Counter | `direction` |
//! | `cc_recording_upload_attempts_total` | Counter | `status` |
//! | `cc_recording_upload_duration_seconds` | Histogram | none |
//! | `cc_recording_watchdog_sweeps_total` | Counter | none |
//! | `cc_recording_watchdog_failed_total` | Counter | none |
//! | `cc_invitations_total` | Counter | `status` |
//! | `cc_recordings_finished_total` | Counter | `status`, `reason` |
//! | `cc_errors_total` | Counter | `operation`, `category`, `status_code` |
//! | `cc_http_requests_total` | Counter | `method`, `endpoint`, `status_code` |
//! | `cc_http_request_duration_seconds` | Histogram | `method`, `endpoint`, `status` |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
