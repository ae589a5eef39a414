//! Real-time signaling: wire protocol and the WebSocket endpoint.

pub mod protocol;
pub mod ws;

pub use protocol::{parse_client_frame, ClientMessage, LeaveReason, ParticipantSummary, ServerMessage};
pub use ws::ws_handler;
