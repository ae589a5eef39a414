//! Binary media frames carried on the signaling socket.
//!
//! Inbound (client to server): `[role tag][payload]`.
//! Outbound (server to client): `[role tag][publisher id, 16 bytes][payload]`.
//!
//! Role tags: `0` microphone, `1` camera, `2` screen.

use super::router::TrackRole;
use crate::errors::CcError;

use bytes::{BufMut, Bytes, BytesMut};
use common::types::ParticipantId;
use uuid::Uuid;

const PUBLISHER_ID_LEN: usize = 16;

impl TrackRole {
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            TrackRole::Microphone => 0,
            TrackRole::Camera => 1,
            TrackRole::Screen => 2,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(TrackRole::Microphone),
            1 => Some(TrackRole::Camera),
            2 => Some(TrackRole::Screen),
            _ => None,
        }
    }
}

/// Split an inbound frame into its track role and payload.
pub fn decode_inbound(frame: Bytes) -> Result<(TrackRole, Bytes), CcError> {
    let Some(&tag) = frame.first() else {
        return Err(CcError::InvalidArgument("Empty media frame".to_string()));
    };
    let role = TrackRole::from_tag(tag)
        .ok_or_else(|| CcError::InvalidArgument(format!("Unknown track role tag {tag}")))?;
    Ok((role, frame.slice(1..)))
}

/// Frame relayed to a subscriber.
#[must_use]
pub fn encode_outbound(publisher: ParticipantId, role: TrackRole, payload: &Bytes) -> Bytes {
    let mut frame = BytesMut::with_capacity(1 + PUBLISHER_ID_LEN + payload.len());
    frame.put_u8(role.tag());
    frame.put_slice(publisher.as_uuid().as_bytes());
    frame.put_slice(payload);
    frame.freeze()
}

/// Inverse of [`encode_outbound`], for clients and tests.
pub fn decode_outbound(frame: &Bytes) -> Result<(TrackRole, ParticipantId, Bytes), CcError> {
    if frame.len() < 1 + PUBLISHER_ID_LEN {
        return Err(CcError::InvalidArgument("Truncated media frame".to_string()));
    }
    let role = TrackRole::from_tag(frame[0])
        .ok_or_else(|| CcError::InvalidArgument(format!("Unknown track role tag {}", frame[0])))?;
    let publisher = Uuid::from_slice(&frame[1..=PUBLISHER_ID_LEN])
        .map_err(|e| CcError::InvalidArgument(format!("Bad publisher id: {e}")))?;
    Ok((
        role,
        ParticipantId(publisher),
        frame.slice(1 + PUBLISHER_ID_LEN..),
    ))
}
