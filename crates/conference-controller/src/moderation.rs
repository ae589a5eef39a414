//! Moderation authorization.
//!
//! Pure checks. The session actor resolves who is acting, calls these, and
//! writes the outcome (accepted or rejected) to the audit log.

use crate::errors::CcError;
use crate::models::{Participant, Role, Session};
use common::types::{ParticipantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Mute,
    Unmute,
    Kick,
    StartScreenShare,
    StopScreenShare,
}

impl ModerationAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::Mute => "mute",
            ModerationAction::Unmute => "unmute",
            ModerationAction::Kick => "kick",
            ModerationAction::StartScreenShare => "start_screen_share",
            ModerationAction::StopScreenShare => "stop_screen_share",
        }
    }
}

/// Whoever is performing an action in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    /// Set when the actor is connected as a participant.
    pub participant_id: Option<ParticipantId>,
    pub role: Role,
}

impl Actor {
    /// Role follows session ownership.
    #[must_use]
    pub fn resolve(session: &Session, user_id: UserId, participant_id: Option<ParticipantId>) -> Self {
        let role = if session.instructor_id == user_id {
            Role::Instructor
        } else {
            Role::Student
        };
        Self {
            user_id,
            participant_id,
            role,
        }
    }

    #[must_use]
    pub fn from_participant(participant: &Participant) -> Self {
        Self {
            user_id: participant.user_id,
            participant_id: Some(participant.id),
            role: participant.role,
        }
    }

    fn is(&self, target: &Participant) -> bool {
        self.participant_id == Some(target.id) || self.user_id == target.user_id
    }
}

/// Mute, unmute and kick.
pub fn authorize(actor: &Actor, target: &Participant, action: ModerationAction) -> Result<(), CcError> {
    let own = actor.is(target);
    match action {
        ModerationAction::Mute | ModerationAction::Unmute if own => Ok(()),
        ModerationAction::Kick if own => Err(CcError::InvalidArgument(
            "A participant cannot kick themselves".to_string(),
        )),
        ModerationAction::StartScreenShare | ModerationAction::StopScreenShare => {
            Err(CcError::Internal(format!(
                "{} is not a participant moderation action",
                action.as_str()
            )))
        }
        _ if actor.role == Role::Instructor => Ok(()),
        _ => Err(CcError::NotAuthorized(format!(
            "Only the instructor can {} other participants",
            action.as_str()
        ))),
    }
}

/// Starting a share. Students need `allow_screen_share`.
pub fn authorize_screen_share_start(actor: &Actor, session: &Session) -> Result<(), CcError> {
    if actor.role == Role::Student && !session.flags.allow_screen_share {
        return Err(CcError::NotAuthorized(
            "Screen sharing is disabled for students in this session".to_string(),
        ));
    }
    Ok(())
}

/// Stopping a share. Only the instructor may stop someone else's.
pub fn authorize_screen_share_stop(actor: &Actor, sharer: &Participant) -> Result<(), CcError> {
    if actor.is(sharer) || actor.role == Role::Instructor {
        return Ok(());
    }
    Err(CcError::NotAuthorized(
        "Only the instructor can stop another participant's screen share".to_string(),
    ))
}
