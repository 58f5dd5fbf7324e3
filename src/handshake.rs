//! Handshake gate: the first frame on a fresh socket must be a welcome.

use std::time::Duration;

use wire::{CODE_OK, Envelope};

use crate::error::{HandshakeError, TransportError};
use crate::state::ClientIdentity;
use crate::transport::FrameStream;

/// Wait up to `timeout` for the welcome frame and return the client id it carries.
///
/// # Errors
///
/// - [`HandshakeError::Timeout`] when nothing arrives in time.
/// - [`HandshakeError::Protocol`] when the first frame is not a welcome, the
///   welcome carries a non-200 code or an empty id, or the peer closes first.
/// - [`HandshakeError::Transport`] on a receive failure.
pub async fn await_welcome(stream: &mut dyn FrameStream, timeout: Duration) -> Result<ClientIdentity, HandshakeError> {
    let received = tokio::time::timeout(timeout, stream.receive())
        .await
        .map_err(|_| HandshakeError::Timeout(timeout))?;

    let raw = match received {
        Ok(raw) => raw,
        Err(TransportError::Closed) => {
            return Err(HandshakeError::Protocol("connection closed before welcome".to_owned()));
        }
        Err(error) => return Err(error.into()),
    };

    match wire::decode_envelope(&raw) {
        Envelope::Welcome(welcome) if welcome.code != CODE_OK => {
            Err(HandshakeError::Protocol(format!("welcome rejected with code {}", welcome.code)))
        }
        Envelope::Welcome(welcome) if welcome.client_id.is_empty() => {
            Err(HandshakeError::Protocol("welcome carried an empty client_id".to_owned()))
        }
        Envelope::Welcome(welcome) => Ok(ClientIdentity::new(welcome.client_id)),
        other => Err(HandshakeError::Protocol(format!("expected welcome, got {} frame: {raw}", other.kind()))),
    }
}

#[cfg(test)]
#[path = "handshake_test.rs"]
mod tests;
