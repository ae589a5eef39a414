//! Actor metrics and mailbox monitoring.
//!
//! Each actor samples its own receiver after taking a message, so the depth
//! reported is the backlog still waiting behind the message being handled.
//!
//! | Actor Type | Elevated above | Critical above |
//! |------------|----------------|----------------|
//! | Controller | 100            | 500            |
//! | Session    | 100            | 500            |
//! | Connection | 32             | 56             |
//!
//! Connection thresholds sit under the default outbound queue capacity (64),
//! since a connection whose queue fills is evicted as a slow consumer.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `SessionControllerActor` (singleton).
    Controller,
    /// `SessionActor` (one per live session).
    Session,
    /// `ConnectionActor` (one per WebSocket).
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Controller => "controller",
            ActorType::Session => "session",
            ActorType::Connection => "connection",
        }
    }

    /// `(elevated, critical)` backlog thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> (usize, usize) {
        match self {
            ActorType::Controller | ActorType::Session => (100, 500),
            ActorType::Connection => (32, 56),
        }
    }

    fn level(self, depth: usize) -> MailboxLevel {
        let (elevated, critical) = self.thresholds();
        if depth > critical {
            MailboxLevel::Critical
        } else if depth > elevated {
            MailboxLevel::Elevated
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Backlog level of a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum MailboxLevel {
    Normal = 0,
    Elevated = 1,
    Critical = 2,
}

impl MailboxLevel {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => MailboxLevel::Normal,
            1 => MailboxLevel::Elevated,
            _ => MailboxLevel::Critical,
        }
    }
}

/// Samples one actor's mailbox backlog.
///
/// Logs only when the level changes, so a saturated session produces one
/// warning instead of one per message.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Session id, connection id, or "controller".
    actor_id: String,
    depth: AtomicUsize,
    level: AtomicU8,
    handled: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            level: AtomicU8::new(MailboxLevel::Normal as u8),
            handled: AtomicU64::new(0),
        }
    }

    /// Record one handled message and the backlog left behind it.
    pub fn observe(&self, backlog: usize) {
        self.handled.fetch_add(1, Ordering::Relaxed);
        self.depth.store(backlog, Ordering::Relaxed);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), backlog);

        let level = self.actor_type.level(backlog);
        let previous = MailboxLevel::from_u8(self.level.swap(level as u8, Ordering::Relaxed));
        if level == previous {
            return;
        }

        match level {
            MailboxLevel::Critical => warn!(
                target: "cc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog,
                "Mailbox backlog critical"
            ),
            MailboxLevel::Elevated if previous == MailboxLevel::Normal => debug!(
                target: "cc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog,
                "Mailbox backlog elevated"
            ),
            _ => debug!(
                target: "cc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog,
                "Mailbox backlog recovering"
            ),
        }
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        MailboxLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Messages handled since the actor started.
    #[must_use]
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }
}

/// Process-wide counters shared by every actor.
///
/// The gauges `cc_sessions_active` and `cc_connections_active` are driven
/// from here; the controller's status query reads the same numbers.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    live_sessions: AtomicUsize,
    open_connections: AtomicUsize,
    attached_participants: AtomicUsize,
    panics: AtomicU64,
}

/// Point-in-time view of [`ActorMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorMetricsSnapshot {
    pub sessions: usize,
    pub connections: usize,
    pub participants: usize,
    pub panics: u64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_created(&self) {
        let live = self.live_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_sessions_active(live as u64);
    }

    pub fn session_removed(&self) {
        let live = saturating_decrement(&self.live_sessions);
        prom::set_sessions_active(live as u64);
    }

    pub fn connection_created(&self) {
        let open = self.open_connections.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_connections_active(open as u64);
    }

    pub fn connection_closed(&self) {
        let open = saturating_decrement(&self.open_connections);
        prom::set_connections_active(open as u64);
    }

    /// A participant's connection was attached to its session actor.
    pub fn participant_connected(&self) {
        self.attached_participants.fetch_add(1, Ordering::Relaxed);
    }

    pub fn participant_disconnected(&self) {
        saturating_decrement(&self.attached_participants);
    }

    /// Record an actor task that ended by panicking.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.panics.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "cc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected"
        );
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.live_sessions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.open_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> ActorMetricsSnapshot {
        ActorMetricsSnapshot {
            sessions: self.live_sessions.load(Ordering::Relaxed),
            connections: self.open_connections.load(Ordering::Relaxed),
            participants: self.attached_participants.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

/// Decrement without wrapping; returns the new value.
fn saturating_decrement(counter: &AtomicUsize) -> usize {
    let previous = counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        })
        .unwrap_or(0);
    previous.saturating_sub(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_thresholds_fit_under_queue_capacity() {
        let (elevated, critical) = ActorType::Connection.thresholds();
        assert!(elevated < critical);
        assert!(critical < crate::config::DEFAULT_OUTBOUND_QUEUE_CAPACITY);
        assert_eq!(ActorType::Session.thresholds(), (100, 500));
    }

    #[test]
    fn test_observe_tracks_backlog_and_count() {
        let monitor = MailboxMonitor::new(ActorType::Session, "s-1");
        monitor.observe(3);
        monitor.observe(0);
        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.handled(), 2);
    }

    #[test]
    fn test_levels_follow_backlog_both_ways() {
        let monitor = MailboxMonitor::new(ActorType::Session, "s-1");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.observe(150);
        assert_eq!(monitor.current_level(), MailboxLevel::Elevated);

        monitor.observe(501);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);

        monitor.observe(10);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
    }

    #[test]
    fn test_connection_goes_critical_before_queue_is_full() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "7");
        monitor.observe(40);
        assert_eq!(monitor.current_level(), MailboxLevel::Elevated);
        monitor.observe(60);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_snapshot_counts() {
        let metrics = ActorMetrics::new();

        metrics.session_created();
        metrics.session_created();
        metrics.connection_created();
        metrics.participant_connected();
        metrics.participant_connected();
        metrics.participant_disconnected();
        metrics.session_removed();
        metrics.record_panic(ActorType::Session);

        assert_eq!(
            metrics.snapshot(),
            ActorMetricsSnapshot {
                sessions: 1,
                connections: 1,
                participants: 1,
                panics: 1,
            }
        );
    }

    #[test]
    fn test_counts_saturate_at_zero() {
        let metrics = ActorMetrics::new();
        metrics.connection_closed();
        metrics.session_removed();
        metrics.participant_disconnected();
        assert_eq!(metrics.connection_count(), 0);
        assert_eq!(metrics.session_count(), 0);
        assert_eq!(metrics.snapshot().participants, 0);
    }
}
