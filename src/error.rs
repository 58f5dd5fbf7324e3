//! Error taxonomy for the session core.
//!
//! Connection-level failures (`TransportError`, `HandshakeError`) are retried
//! by the session and only reach the caller wrapped in
//! [`SessionError::Connect`] once the retry budget is spent. Per-request
//! failures surface directly from `send_command`.

use std::time::Duration;

use tokio_tungstenite::tungstenite;
use wire::Action;

use crate::state::ConnectionState;

/// Failure of the raw websocket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(Box<tungstenite::Error>),
    #[error("websocket connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("websocket send failed: {0}")]
    Send(Box<tungstenite::Error>),
    #[error("websocket receive failed: {0}")]
    Receive(Box<tungstenite::Error>),
    /// The peer closed the socket, or it was already closed.
    #[error("websocket closed")]
    Closed,
}

/// Failure while waiting for the welcome frame.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// Server silence; upstream does this when overloaded.
    #[error("no welcome frame within {0:?}")]
    Timeout(Duration),
    #[error("handshake protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Why a single connection attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// Error returned by the public session API.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not connect after {attempts} attempt(s) in {elapsed:?} (last state {last_state}): {last_error}")]
    Connect { attempts: u32, elapsed: Duration, last_state: ConnectionState, last_error: Box<AttemptError> },

    #[error("no reply to {action} within {elapsed:?}")]
    Timeout { action: Action, elapsed: Duration },

    #[error("cannot send {action}: session is {state}")]
    NotConnected { action: Action, state: ConnectionState },

    #[error("connection lost while waiting {elapsed:?} for {action} (state {state})")]
    ConnectionLost { action: Action, elapsed: Duration, state: ConnectionState },

    #[error("cannot {operation}: session is {state}")]
    InvalidState { operation: &'static str, state: ConnectionState },

    #[error("failed to encode {action}: {source}")]
    Encode {
        action: Action,
        #[source]
        source: wire::CodecError,
    },
}

/// Error returned by [`crate::Device`] operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("reply did not include property {0}")]
    PropertyMissing(u32),

    #[error("property {property_id} has unexpected value {value}")]
    UnexpectedValue { property_id: u32, value: String },

    #[error("device rejected {action} with code {code}")]
    Rejected { action: Action, code: i64 },

    #[error("load output can only be switched in manual mode (current mode: {0})")]
    RequiresManualMode(wire::ChargeMode),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}
