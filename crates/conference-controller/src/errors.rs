//! Conference Controller error types.
//!
//! Errors map to a stable numeric `error_code`, an `ErrorCategory` used for
//! metrics and retry policy, and an HTTP status via the `IntoResponse` impl.
//! The same code and client message are sent in signaling `error` frames.
//! Internal details are logged server-side but not exposed to clients.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad parameters or payloads. Never retried.
    Validation,
    /// Caller lacks the role for the action. Connection stays open.
    Authorization,
    /// Session is full.
    Capacity,
    /// Too early to join; carries a retry-after hint.
    Timing,
    /// Referenced entity does not exist.
    NotFound,
    /// Conflicting concurrent state.
    Conflict,
    /// Storage or notification collaborator failed.
    Infrastructure,
    /// A bounded deadline elapsed. Terminal.
    Timeout,
    /// Bug or misconfiguration.
    Internal,
}

impl ErrorCategory {
    /// Label value for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Capacity => "capacity",
            ErrorCategory::Timing => "timing",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Infrastructure => "infrastructure",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// Conference Controller error type.
///
/// Error codes:
/// - Validation (`InvalidSchedule`, `InvalidArgument`, `InvalidTransition`): 1
/// - `NotAuthorized`: 3
/// - Not found: 4
/// - `Conflict`: 5
/// - `Config`, `Internal`: 6
/// - `SessionFull`, `Draining`: 7
/// - `TooEarly`: 8
/// - `Storage`, `Notification`: 9
/// - `Timeout`: 10
#[derive(Debug, Error)]
pub enum CcError {
    /// Schedule parameters rejected.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Malformed request or signaling payload.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Lifecycle transition not allowed from the current state.
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// Caller is not allowed to perform the action.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Session has reached `max_participants`.
    #[error("Session full: {max_participants} participants")]
    SessionFull { max_participants: u32 },

    /// Join window has not opened yet.
    #[error("Too early to join, retry after {retry_after_secs}s")]
    TooEarly {
        retry_after_secs: u64,
        join_enabled_at: DateTime<Utc>,
    },

    /// Session not found.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Participant not found.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Recording not found.
    #[error("Recording not found: {0}")]
    RecordingNotFound(String),

    /// Conflict error (e.g., recording already open).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notification collaborator failed.
    #[error("Notification error: {0}")]
    Notification(String),

    /// Bounded deadline elapsed.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Controller is draining (graceful shutdown).
    #[error("Controller is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CcError {
    /// Taxonomy bucket for this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            CcError::InvalidSchedule(_)
            | CcError::InvalidArgument(_)
            | CcError::InvalidTransition { .. } => ErrorCategory::Validation,
            CcError::NotAuthorized(_) => ErrorCategory::Authorization,
            CcError::SessionFull { .. } | CcError::Draining => ErrorCategory::Capacity,
            CcError::TooEarly { .. } => ErrorCategory::Timing,
            CcError::SessionNotFound(_)
            | CcError::ParticipantNotFound(_)
            | CcError::RecordingNotFound(_) => ErrorCategory::NotFound,
            CcError::Conflict(_) => ErrorCategory::Conflict,
            CcError::Storage(_) | CcError::Notification(_) => ErrorCategory::Infrastructure,
            CcError::Timeout(_) => ErrorCategory::Timeout,
            CcError::Config(_) | CcError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Returns the stable numeric error code.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            CcError::InvalidSchedule(_)
            | CcError::InvalidArgument(_)
            | CcError::InvalidTransition { .. } => 1, // INVALID_ARGUMENT
            CcError::NotAuthorized(_) => 3, // FORBIDDEN
            CcError::SessionNotFound(_)
            | CcError::ParticipantNotFound(_)
            | CcError::RecordingNotFound(_) => 4, // NOT_FOUND
            CcError::Conflict(_) => 5,       // CONFLICT
            CcError::Config(_) | CcError::Internal(_) => 6, // INTERNAL_ERROR
            CcError::SessionFull { .. } | CcError::Draining => 7, // CAPACITY_EXCEEDED
            CcError::TooEarly { .. } => 8,   // TOO_EARLY
            CcError::Storage(_) | CcError::Notification(_) => 9, // UNAVAILABLE
            CcError::Timeout(_) => 10,       // DEADLINE_EXCEEDED
        }
    }

    /// Short machine-readable code string for JSON bodies.
    #[must_use]
    pub fn code_str(&self) -> &'static str {
        match self {
            CcError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            CcError::InvalidArgument(_) => "INVALID_ARGUMENT",
            CcError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CcError::NotAuthorized(_) => "NOT_AUTHORIZED",
            CcError::SessionFull { .. } => "SESSION_FULL",
            CcError::TooEarly { .. } => "TOO_EARLY",
            CcError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            CcError::ParticipantNotFound(_) => "PARTICIPANT_NOT_FOUND",
            CcError::RecordingNotFound(_) => "RECORDING_NOT_FOUND",
            CcError::Conflict(_) => "CONFLICT",
            CcError::Storage(_) => "STORAGE_UNAVAILABLE",
            CcError::Notification(_) => "NOTIFICATION_UNAVAILABLE",
            CcError::Timeout(_) => "TIMEOUT",
            CcError::Config(_) | CcError::Internal(_) => "INTERNAL_ERROR",
            CcError::Draining => "DRAINING",
        }
    }

    /// Remaining wait for timing errors.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            CcError::TooEarly {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CcError::Config(_) | CcError::Internal(_) => "An internal error occurred".to_string(),
            CcError::Storage(_) => "Recording storage is temporarily unavailable".to_string(),
            CcError::Notification(_) => {
                "Invitation delivery is temporarily unavailable".to_string()
            }
            CcError::SessionNotFound(_) => "Session not found".to_string(),
            CcError::ParticipantNotFound(_) => "Participant not found".to_string(),
            CcError::RecordingNotFound(_) => "Recording not found".to_string(),
            CcError::SessionFull { max_participants } => {
                format!("Session is full ({max_participants} participants)")
            }
            CcError::TooEarly {
                join_enabled_at, ..
            } => format!("Session opens for joining at {}", join_enabled_at.to_rfc3339()),
            CcError::Draining => "Server is shutting down, please retry".to_string(),
            CcError::InvalidTransition { from, event } => {
                format!("Cannot {event} a session that is {from}")
            }
            CcError::InvalidSchedule(msg)
            | CcError::InvalidArgument(msg)
            | CcError::NotAuthorized(msg)
            | CcError::Conflict(msg)
            | CcError::Timeout(msg) => msg.clone(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::Authorization => StatusCode::FORBIDDEN,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Capacity | ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::Timing => {
                StatusCode::from_u16(425).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
            }
            ErrorCategory::Infrastructure => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    numeric_code: i32,
    category: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl IntoResponse for CcError {
    fn into_response(self) -> Response {
        match self.category() {
            ErrorCategory::Internal => {
                tracing::error!(target: "cc.errors", error = %self, "Internal error");
            }
            ErrorCategory::Infrastructure => {
                tracing::warn!(target: "cc.errors", error = %self, "Collaborator unavailable");
            }
            _ => {}
        }

        let status = self.status_code();
        let retry_after = self.retry_after_secs();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code_str(),
                numeric_code: self.error_code(),
                category: self.category().as_str(),
                message: self.client_message(),
                retry_after_secs: retry_after,
            },
        };

        let mut response = (status, Json(body)).into_response();

        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
