//! Actor hierarchy for live sessions.
//!
//! ```text
//! SessionControllerActor (singleton)
//! └── supervises N SessionActors
//!     └── SessionActor (one per live session)
//!         ├── owns the media router and quality task
//!         └── feeds N ConnectionActors
//!             └── ConnectionActor (one outbound writer per WebSocket)
//! ```
//!
//! - **Single writer**: every live mutation of a session goes through its actor
//! - **CancellationToken propagation**: parents hand child tokens to children
//! - **Mailbox monitoring**: depth thresholds with metrics (Session: 100/500, Connection: 32/56)
//!
//! # Modules
//!
//! - [`controller`] - `SessionControllerActor` that spawns and reaps session actors
//! - [`session`] - `SessionActor` per live session
//! - [`connection`] - `ConnectionActor` per WebSocket
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod controller;
pub mod messages;
pub mod metrics;
pub mod session;

pub use connection::{ConnectionActor, ConnectionActorHandle, OutboundError};
pub use controller::{SessionControllerActor, SessionControllerHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use session::{SessionActor, SessionActorHandle, SessionDeps, SessionSettings};
