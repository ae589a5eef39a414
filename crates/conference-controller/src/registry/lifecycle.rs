//! Session lifecycle state machine.
//!
//! ```text
//! SCHEDULED --admit--> ACTIVE --complete--> COMPLETED
//!     |                  |
//!     +-----cancel-------+-----> CANCELLED
//! ```

use crate::errors::CcError;
use crate::models::SessionStatus;

/// Events that drive the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Admit,
    Complete,
    Cancel,
}

impl LifecycleEvent {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Admit => "admit",
            LifecycleEvent::Complete => "complete",
            LifecycleEvent::Cancel => "cancel",
        }
    }
}

/// Next status for `event`, or `InvalidTransition`.
///
/// Admitting into an ACTIVE session is a self-loop.
pub fn transition(from: SessionStatus, event: LifecycleEvent) -> Result<SessionStatus, CcError> {
    use LifecycleEvent::{Admit, Cancel, Complete};
    use SessionStatus::{Active, Cancelled, Completed, Scheduled};

    match (from, event) {
        (Scheduled | Active, Admit) => Ok(Active),
        (Active, Complete) => Ok(Completed),
        (Scheduled | Active, Cancel) => Ok(Cancelled),
        (Scheduled | Completed | Cancelled, _) => Err(CcError::InvalidTransition {
            from: from.as_str().to_string(),
            event: event.as_str().to_string(),
        }),
    }
}
