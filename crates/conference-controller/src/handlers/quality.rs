//! Video quality handlers.
//!
//! - `POST /v1/sessions/{id}/quality` - Manually set a participant's tier
//! - `GET /v1/sessions/{id}/quality/stats` - Recent telemetry samples

use super::{failed, parse_body, parse_query};
use crate::errors::CcError;
use crate::models::api::{
    QualityStatsQuery, QualityStatsResponse, UpdateQualityRequest, UpdateQualityResponse,
};
use crate::routes::AppState;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use bytes::Bytes;
use common::types::SessionId;
use std::sync::Arc;
use tracing::instrument;

/// Samples returned when `limit` is absent.
const DEFAULT_STATS_LIMIT: usize = 100;

/// Largest `limit` honored.
const MAX_STATS_LIMIT: usize = 1000;

/// Handler for `POST /v1/sessions/{id}/quality`.
///
/// The requested tier is clamped to the session's bitrate bounds and pushed to
/// the participant as a `quality_change` frame.
#[instrument(skip_all, name = "cc.handlers.update_quality", fields(session_id = %session_id))]
pub async fn update_video_quality(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<Json<UpdateQualityResponse>, CcError> {
    async {
        let request: UpdateQualityRequest = parse_body(&body)?;
        let actor = state.controller.get_or_spawn(session_id).await?;
        actor
            .set_quality(request.participant_id, request.quality)
            .await
    }
    .await
    .map(Json)
    .map_err(|e| failed("update_video_quality", e))
}

/// Handler for `GET /v1/sessions/{id}/quality/stats`.
///
/// Newest first.
pub async fn get_video_quality_stats(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    query: Result<Query<QualityStatsQuery>, QueryRejection>,
) -> Result<Json<QualityStatsResponse>, CcError> {
    let query = parse_query(query).map_err(|e| failed("get_video_quality_stats", e))?;
    state
        .registry
        .get(session_id)
        .await
        .map_err(|e| failed("get_video_quality_stats", e))?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_STATS_LIMIT)
        .min(MAX_STATS_LIMIT);
    let stats = state
        .telemetry
        .query(session_id, query.participant_id, limit)
        .await;
    Ok(Json(QualityStatsResponse { stats }))
}
