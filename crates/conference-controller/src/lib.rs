//! Conference Controller Service Library
//!
//! Core of a scheduled video-conferencing service:
//!
//! - Session scheduling, admission and lifecycle ([`registry`])
//! - WebSocket signaling between participants ([`signaling`])
//! - Selective forwarding of media frames ([`media`])
//! - Telemetry-driven video quality adaptation ([`quality`])
//! - Recording capture, upload and SLA watchdog ([`recording`])
//! - Instructor moderation ([`moderation`]) with an audit trail ([`audit`])
//! - RFC 5545 calendar invitations ([`calendar`])
//!
//! # Architecture
//!
//! ```text
//! SessionControllerActor (singleton)
//! └── supervises N SessionActors
//!     └── SessionActor (one per live session)
//!         ├── owns roster, media router, quality controller
//!         └── fans out to N ConnectionActors
//!             └── ConnectionActor (one per WebSocket)
//! ```
//!
//! The [`registry::SessionRegistry`] is the durable source of truth for
//! sessions and participants. Session actors hold the live view and write
//! through to it.

pub mod actors;
pub mod audit;
pub mod calendar;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod media;
pub mod middleware;
pub mod models;
pub mod moderation;
pub mod observability;
pub mod quality;
pub mod recording;
pub mod registry;
pub mod routes;
pub mod signaling;
