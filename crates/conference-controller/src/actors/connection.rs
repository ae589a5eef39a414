//! `ConnectionActor`: outbound writer for one WebSocket.
//!
//! The session actor never awaits a client. It pushes frames with
//! [`ConnectionActorHandle::try_send`] into a bounded queue, and this actor
//! drains the queue into the socket sink. A full queue is reported back to the
//! caller, which treats the client as gone.
//!
//! The inbound side of the socket is read by the WebSocket handler, which
//! watches [`ConnectionActorHandle::closed`] to stop reading once the writer
//! has exited.

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::CcError;
use crate::signaling::protocol::ServerMessage;

use axum::extract::ws::{close_code, CloseFrame, Message};
use bytes::Bytes;
use common::types::SessionId;
use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info, instrument, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection id.
#[must_use]
pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundError {
    /// Queue at capacity. The client is not keeping up.
    Full,
    /// Writer has exited.
    Closed,
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: u64,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, message: ServerMessage) -> Result<(), OutboundError> {
        self.sender
            .try_send(ConnectionMessage::Send { message })
            .map_err(|e| match e {
                TrySendError::Full(_) => OutboundError::Full,
                TrySendError::Closed(_) => OutboundError::Closed,
            })
    }

    /// Queue a relayed media frame without waiting.
    pub fn try_send_media(&self, frame: Bytes) -> Result<(), OutboundError> {
        self.sender
            .try_send(ConnectionMessage::Media { frame })
            .map_err(|e| match e {
                TrySendError::Full(_) => OutboundError::Full,
                TrySendError::Closed(_) => OutboundError::Closed,
            })
    }

    /// Queue a frame, waiting for space. Used only before the connection is
    /// attached to a session.
    pub async fn send(&self, message: ServerMessage) -> Result<(), CcError> {
        self.sender
            .send(ConnectionMessage::Send { message })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Close after already queued frames. Falls back to cancelling when the
    /// queue is full.
    pub fn close(&self, reason: &str) {
        let message = ConnectionMessage::Close {
            reason: reason.to_string(),
        };
        if self.sender.try_send(message).is_err() {
            self.cancel_token.cancel();
        }
    }

    /// Stop immediately, dropping queued frames.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Resolves once the writer has stopped.
    #[must_use]
    pub fn closed(&self) -> WaitForCancellationFutureOwned {
        self.cancel_token.clone().cancelled_owned()
    }

    /// A handle with no writer behind it. Frames stay in the returned
    /// receiver.
    #[cfg(test)]
    pub(crate) fn detached(capacity: usize) -> (Self, mpsc::Receiver<ConnectionMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender,
                cancel_token: CancellationToken::new(),
                connection_id: next_connection_id(),
            },
            receiver,
        )
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor<S> {
    connection_id: u64,
    session_id: SessionId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    cancel_token: CancellationToken,
    sink: S,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl<S> ConnectionActor<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    /// Spawn a writer over `sink` with an outbound queue of `capacity`.
    pub fn spawn(
        session_id: SessionId,
        sink: S,
        capacity: usize,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection_id = next_connection_id();

        let actor = Self {
            connection_id,
            session_id,
            receiver,
            cancel_token: cancel_token.clone(),
            sink,
            metrics: Arc::clone(&metrics),
            mailbox: MailboxMonitor::new(ActorType::Connection, connection_id.to_string()),
        };
        metrics.connection_created();

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "cc.actor.connection",
        fields(connection_id = self.connection_id, session_id = %self.session_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "cc.actor.connection",
            connection_id = self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "cc.actor.connection",
                        connection_id = self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    let _ = self.sink.close().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.observe(self.receiver.len());
                            let should_exit = self.handle_message(message).await;

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "cc.actor.connection",
                                connection_id = self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            let _ = self.sink.close().await;
                            break;
                        }
                    }
                }
            }
        }

        // Tells the reader loop to stop.
        self.cancel_token.cancel();
        self.metrics.connection_closed();

        info!(
            target: "cc.actor.connection",
            connection_id = self.connection_id,
            messages_handled = self.mailbox.handled(),
            "ConnectionActor stopped"
        );
    }

    /// Returns true when the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Send { message } => {
                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(target: "cc.actor.connection", error = %e, "Dropping unencodable frame");
                        return false;
                    }
                };
                if let Err(e) = self.sink.send(Message::Text(json)).await {
                    debug!(
                        target: "cc.actor.connection",
                        connection_id = self.connection_id,
                        kind = message.kind(),
                        error = %e,
                        "Socket write failed"
                    );
                    return true;
                }
                false
            }
            ConnectionMessage::Media { frame } => {
                if let Err(e) = self.sink.send(Message::Binary(frame.to_vec())).await {
                    debug!(
                        target: "cc.actor.connection",
                        connection_id = self.connection_id,
                        error = %e,
                        "Socket write failed"
                    );
                    return true;
                }
                false
            }
            ConnectionMessage::Close { reason } => {
                debug!(
                    target: "cc.actor.connection",
                    connection_id = self.connection_id,
                    reason = %reason,
                    "Closing connection"
                );
                let frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: reason.into(),
                };
                let _ = self.sink.send(Message::Close(Some(frame))).await;
                let _ = self.sink.close().await;
                true
            }
        }
    }
}
