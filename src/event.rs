//! Session events: the reporting contract between the core and its observer.
//!
//! DESIGN
//! ======
//! The session never owns a logger. It emits discrete [`SessionEvent`] values
//! to an [`EventSink`] and the presentation layer decides what to do with
//! them. [`TracingSink`] renders them as structured `tracing` events, which is
//! what the CLI installs; tests plug in an unbounded channel and assert on the
//! stream.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wire::Action;

use crate::state::{ClientIdentity, ConnectionState};

/// Why a ready connection went away without the caller asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    PeerClosed,
    ReceiveFailed(String),
    SendFailed(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed the connection"),
            Self::ReceiveFailed(e) => write!(f, "receive failed: {e}"),
            Self::SendFailed(e) => write!(f, "send failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { from: ConnectionState, to: ConnectionState },
    ConnectAttempt { attempt: u32, max_attempts: u32, url: String },
    AttemptFailed { attempt: u32, state: ConnectionState, error: String },
    RetryScheduled { attempt: u32, delay: Duration },
    Connected { client_id: ClientIdentity, attempt: u32, elapsed: Duration },
    GaveUp { attempts: u32, elapsed: Duration },
    CommandSent { action: Action, pending: usize },
    CommandResolved { action: String, code: i64, elapsed: Duration },
    CommandTimedOut { action: Action, elapsed: Duration },
    /// A reply matched a request whose caller had already gone away.
    ReplyAbandoned { action: String },
    /// A reply arrived with no pending request for its action.
    UnmatchedReply { action: String },
    UnrecognizedFrame { raw: String },
    Disconnected { reason: DisconnectReason, failed_requests: usize },
    Closed { failed_requests: usize },
}

/// Receiver of session events. Called inline; implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SessionEvent) {}
}

impl EventSink for mpsc::UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// Renders events as structured `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    #[allow(clippy::cast_possible_truncation)]
    fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged { from, to } => debug!(%from, %to, "session: state changed"),
            SessionEvent::ConnectAttempt { attempt, max_attempts, url } => {
                info!(attempt, max_attempts, %url, "session: connection attempt");
            }
            SessionEvent::AttemptFailed { attempt, state, error } => {
                warn!(attempt, %state, %error, "session: connection attempt failed");
            }
            SessionEvent::RetryScheduled { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "session: retrying");
            }
            SessionEvent::Connected { client_id, attempt, elapsed } => {
                info!(%client_id, attempt, elapsed_ms = elapsed.as_millis() as u64, "session: connected");
            }
            SessionEvent::GaveUp { attempts, elapsed } => {
                warn!(attempts, elapsed_ms = elapsed.as_millis() as u64, "session: giving up");
            }
            SessionEvent::CommandSent { action, pending } => debug!(%action, pending, "session: command sent"),
            SessionEvent::CommandResolved { action, code, elapsed } => {
                info!(%action, code, elapsed_ms = elapsed.as_millis() as u64, "session: command resolved");
            }
            SessionEvent::CommandTimedOut { action, elapsed } => {
                warn!(%action, elapsed_ms = elapsed.as_millis() as u64, "session: command timed out");
            }
            SessionEvent::ReplyAbandoned { action } => debug!(%action, "session: reply for abandoned request"),
            SessionEvent::UnmatchedReply { action } => debug!(%action, "session: reply with no pending request"),
            SessionEvent::UnrecognizedFrame { raw } => debug!(%raw, "session: unrecognized frame"),
            SessionEvent::Disconnected { reason, failed_requests } => {
                warn!(%reason, failed_requests, "session: disconnected");
            }
            SessionEvent::Closed { failed_requests } => info!(failed_requests, "session: closed"),
        }
    }
}
