//! Invitation sender that records deliveries instead of sending mail.

use async_trait::async_trait;
use common::types::SessionId;
use conference_controller::calendar::InvitationSender;
use conference_controller::errors::CcError;
use conference_controller::models::Session;
use std::collections::HashSet;
use std::sync::Mutex;

/// One captured delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentInvitation {
    pub recipient: String,
    pub session_id: SessionId,
    pub ics: String,
}

/// Captures every invitation. Recipients added with [`Self::failing_for`]
/// get a notification error.
#[derive(Debug, Default)]
pub struct RecordingInvitationSender {
    failing: HashSet<String>,
    sent: Mutex<Vec<SentInvitation>>,
}

impl RecordingInvitationSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make delivery to `recipient` fail.
    #[must_use]
    pub fn failing_for(mut self, recipient: impl Into<String>) -> Self {
        self.failing.insert(recipient.into());
        self
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentInvitation> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl InvitationSender for RecordingInvitationSender {
    async fn send(&self, recipient: &str, session: &Session, ics: &str) -> Result<(), CcError> {
        if self.failing.contains(recipient) {
            return Err(CcError::Notification(format!(
                "mailbox unavailable for {recipient}"
            )));
        }
        self.sent.lock().unwrap().push(SentInvitation {
            recipient: recipient.to_string(),
            session_id: session.id,
            ics: ics.to_string(),
        });
        Ok(())
    }
}
