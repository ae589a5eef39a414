//! Adaptive quality: ladder, hysteresis state machine, telemetry arena and
//! the per-session evaluation task.

pub mod controller;
pub mod ladder;
pub mod task;
pub mod telemetry;

pub use controller::{classify, Direction, Health, ParticipantQuality, QualityController, QualityDecision};
pub use ladder::{BitrateBand, QualityTier};
pub use task::{start_quality_task, QualityTaskConfig};
pub use telemetry::{TelemetryReport, TelemetryStore};
