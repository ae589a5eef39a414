//! Calendar invitations.
//!
//! The ICS body is built here. Delivery is behind [`InvitationSender`]; the
//! binary wires [`LoggingInvitationSender`].

use crate::errors::CcError;
use crate::models::Session;
use crate::observability::metrics as prom;
use async_trait::async_trait;
use icalendar::{Calendar, Component, Event, EventLike};
use std::time::Duration;
use tracing::{info, warn};

/// Render the session as a single-event iCalendar document.
#[must_use]
pub fn session_ics(session: &Session) -> String {
    let event = Event::new()
        .uid(&session.id.to_string())
        .summary(&session.title)
        .description(&format!(
            "{}\n\nJoin URL: {}",
            session.description, session.join_url
        ))
        .starts(session.start_time)
        .ends(session.end_time())
        .done();

    Calendar::new().push(event).done().to_string()
}

/// Delivery seam for invitations.
#[async_trait]
pub trait InvitationSender: Send + Sync + std::fmt::Debug {
    async fn send(&self, recipient: &str, session: &Session, ics: &str) -> Result<(), CcError>;
}

/// Sender that only logs. Used when no mail transport is configured.
#[derive(Debug, Default)]
pub struct LoggingInvitationSender;

#[async_trait]
impl InvitationSender for LoggingInvitationSender {
    async fn send(&self, recipient: &str, session: &Session, ics: &str) -> Result<(), CcError> {
        info!(
            target: "cc.calendar",
            session_id = %session.id,
            recipient,
            ics_bytes = ics.len(),
            "Calendar invitation sent"
        );
        Ok(())
    }
}

/// Reject an empty list or anything that is not an address.
pub fn validate_recipients(recipients: &[String]) -> Result<(), CcError> {
    if recipients.is_empty() {
        return Err(CcError::InvalidArgument(
            "At least one recipient is required".to_string(),
        ));
    }
    if let Some(bad) = recipients
        .iter()
        .find(|r| r.trim().is_empty() || !r.contains('@'))
    {
        return Err(CcError::InvalidArgument(format!(
            "Invalid recipient address: {bad}"
        )));
    }
    Ok(())
}

/// Send to each recipient in order, each bounded by `timeout`.
///
/// Stops at the first failure.
pub async fn deliver(
    sender: &dyn InvitationSender,
    session: &Session,
    recipients: &[String],
    ics: &str,
    timeout: Duration,
) -> Result<Vec<String>, CcError> {
    let mut sent = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        match tokio::time::timeout(timeout, sender.send(recipient, session, ics)).await {
            Ok(Ok(())) => {
                prom::record_invitation("sent");
                sent.push(recipient.clone());
            }
            Ok(Err(e)) => {
                prom::record_invitation("failed");
                warn!(target: "cc.calendar", session_id = %session.id, recipient = %recipient, error = %e, "Invitation delivery failed");
                return Err(e);
            }
            Err(_) => {
                prom::record_invitation("timeout");
                return Err(CcError::Timeout(format!(
                    "invitation delivery to {recipient} timed out"
                )));
            }
        }
    }
    Ok(sent)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{QualitySettings, SessionFlags, SessionStatus};
    use chrono::{DateTime, Utc};
    use common::types::{SessionId, UserId};

    fn session() -> Session {
        let start = DateTime::parse_from_rfc3339("2026-03-10T14:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Session {
            id: SessionId::new(),
            instructor_id: UserId::new(),
            title: "Linear Algebra".to_string(),
            description: "Eigenvalues".to_string(),
            start_time: start,
            duration_minutes: 90,
            status: SessionStatus::Scheduled,
            max_participants: 30,
            flags: SessionFlags::default(),
            quality: QualitySettings::default(),
            join_url: "https://classes.example.com/join/abc".to_string(),
            created_at: start,
            activated_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
        }
    }

    #[derive(Debug)]
    struct SlowSender;

    #[async_trait]
    impl InvitationSender for SlowSender {
        async fn send(&self, _: &str, _: &Session, _: &str) -> Result<(), CcError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[test]
    fn test_ics_contains_event() {
        let ics = session_ics(&session());
        assert!(ics.contains("BEGIN:VCALENDAR"));
        assert!(ics.contains("BEGIN:VEVENT"));
        assert!(ics.contains("SUMMARY:Linear Algebra"));
        assert!(ics.contains("20260310T140000Z"));
        assert!(ics.contains("20260310T153000Z"));
        assert!(ics.contains("END:VCALENDAR"));
    }

    #[test]
    fn test_validate_recipients() {
        assert!(validate_recipients(&[]).is_err());
        assert!(validate_recipients(&["nobody".to_string()]).is_err());
        assert!(validate_recipients(&["a@example.com".to_string()]).is_ok());
    }

    #[tokio::test]
    async fn test_deliver_logging_sender() {
        let s = session();
        let recipients = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        let sent = deliver(
            &LoggingInvitationSender,
            &s,
            &recipients,
            &session_ics(&s),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(sent, recipients);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_times_out() {
        let s = session();
        let err = deliver(
            &SlowSender,
            &s,
            &["a@example.com".to_string()],
            "",
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CcError::Timeout(_)));
    }
}
