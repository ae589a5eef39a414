//! Per-session periodic quality evaluation.
//!
//! Every telemetry interval the task reads new samples from the
//! [`TelemetryStore`] past its cursor, feeds them through the session's
//! [`QualityController`] and forwards any tier changes to the session actor.
//! It exits when its (child) cancellation token fires or when the actor's
//! receiving side is gone.

use super::controller::{QualityController, QualityDecision};
use super::telemetry::TelemetryStore;
use crate::observability::metrics as prom;
use common::types::SessionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Upper bound on a single telemetry read.
pub const TELEMETRY_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Inputs for one session's quality task.
#[derive(Debug, Clone)]
pub struct QualityTaskConfig {
    pub session_id: SessionId,
    pub interval: Duration,
    pub read_timeout: Duration,
}

/// Run the quality loop until cancelled.
#[instrument(skip_all, name = "cc.quality.task", fields(session_id = %config.session_id))]
pub async fn start_quality_task(
    config: QualityTaskConfig,
    telemetry: Arc<TelemetryStore>,
    controller: Arc<QualityController>,
    decisions_tx: mpsc::Sender<Vec<QualityDecision>>,
    cancel_token: CancellationToken,
) {
    info!(
        target: "cc.quality",
        session_id = %config.session_id,
        interval_ms = config.interval.as_millis(),
        "Starting quality task"
    );

    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut cursor = 0u64;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "cc.quality", session_id = %config.session_id, "Quality task cancelled");
                break;
            }
            _ = interval.tick() => {
                let decisions = run_quality_pass(&config, &telemetry, &controller, &mut cursor).await;
                if decisions.is_empty() {
                    continue;
                }
                if decisions_tx.send(decisions).await.is_err() {
                    debug!(target: "cc.quality", session_id = %config.session_id, "Session actor gone, stopping quality task");
                    break;
                }
            }
        }
    }

    info!(target: "cc.quality", session_id = %config.session_id, "Quality task stopped");
}

/// One evaluation pass. Advances `cursor` past every sample consumed.
pub(crate) async fn run_quality_pass(
    config: &QualityTaskConfig,
    telemetry: &TelemetryStore,
    controller: &QualityController,
    cursor: &mut u64,
) -> Vec<QualityDecision> {
    let samples = match tokio::time::timeout(
        config.read_timeout,
        telemetry.read_since(config.session_id, *cursor),
    )
    .await
    {
        Ok(samples) => samples,
        Err(_) => {
            warn!(
                target: "cc.quality",
                session_id = %config.session_id,
                timeout_ms = config.read_timeout.as_millis(),
                "Telemetry read timed out, skipping pass"
            );
            return Vec::new();
        }
    };

    let Some(last) = samples.last() else {
        return Vec::new();
    };
    *cursor = last.seq + 1;
    prom::record_quality_samples(samples.len() as u64);

    let decisions = controller.observe_batch(&samples).await;
    for decision in &decisions {
        prom::record_quality_transition(decision.direction.as_str());
        info!(
            target: "cc.quality",
            session_id = %config.session_id,
            participant_id = %decision.participant_id,
            from = %decision.from,
            to = %decision.to,
            bitrate_kbps = decision.bitrate_kbps,
            "Quality transition"
        );
    }
    decisions
}
