//! HTTP request handlers for the Conference Controller.
//!
//! Bodies are read as raw bytes and parsed here so malformed JSON gets the
//! structured 400 body instead of axum's default rejection.

pub mod invitations;
pub mod participants;
pub mod quality;
pub mod recordings;
pub mod sessions;

pub use invitations::send_calendar_invitation;
pub use participants::{
    kick_participant, list_participants, mute_participant, start_screen_share,
    stop_screen_share, unmute_participant,
};
pub use quality::{get_video_quality_stats, update_video_quality};
pub use recordings::{get_recording, list_recordings, start_recording, stop_recording};
pub use sessions::{
    cancel_session, get_session, get_session_status, join_session, leave_session, list_sessions,
    schedule_session, update_session,
};

use crate::errors::CcError;
use crate::observability::metrics as prom;
use axum::extract::rejection::QueryRejection;
use axum::extract::Query;
use bytes::Bytes;
use serde::de::DeserializeOwned;

/// Parse a JSON request body.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, CcError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "cc.handlers", error = %e, "Invalid request body");
        CcError::InvalidArgument(format!("Invalid request body: {e}"))
    })
}

/// Unwrap a query string extraction.
pub(crate) fn parse_query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, CcError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| CcError::InvalidArgument(format!("Invalid query string: {}", e.body_text())))
}

/// Count a failed RPC and pass the error through.
pub(crate) fn failed(operation: &'static str, error: CcError) -> CcError {
    prom::record_error(
        operation,
        error.category().as_str(),
        error.status_code().as_u16(),
    );
    error
}
