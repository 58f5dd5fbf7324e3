//! Transport: one websocket connection, split into write and read halves.
//!
//! DESIGN
//! ======
//! `Connector` opens a socket and hands back a [`Connection`]: a
//! [`FrameSink`] the session writes commands to, and a [`FrameStream`] the
//! read loop drains. Splitting lets the read loop run while callers send.
//! No retry logic lives here.
//!
//! Unsolicited closure shows up as [`TransportError::Closed`] from
//! `receive`; the session tells it apart from its own `close()` by its state.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::error::TransportError;

/// Opens websocket connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the socket cannot be opened.
    async fn open(&self, url: &str) -> Result<Connection, TransportError>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Send`] on a closed or broken socket.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Start a caller-initiated close.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Send`] if the close frame cannot be written.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once the socket is closed and
    /// [`TransportError::Receive`] on protocol or I/O failure.
    async fn receive(&mut self) -> Result<String, TransportError>;
}

/// An open connection.
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

// =============================================================================
// TUNGSTENITE
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Connection, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|error| TransportError::Connect(Box::new(error)))?;
        debug!(%url, "ws: socket open");

        let (sink, source) = stream.split();
        Ok(Connection { sink: Box::new(WsSink { inner: sink }), stream: Box::new(WsSource { inner: source }) })
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        debug!(frame = %text, "ws: send frame");
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| TransportError::Send(Box::new(error)))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(error) => Err(TransportError::Send(Box::new(error))),
        }
    }
}

struct WsSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsSource {
    async fn receive(&mut self) -> Result<String, TransportError> {
        loop {
            let Some(message) = self.inner.next().await else {
                return Err(TransportError::Closed);
            };
            match message {
                Ok(Message::Text(text)) => {
                    debug!(frame = %text.as_str(), "ws: recv frame");
                    return Ok(text.as_str().to_owned());
                }
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        debug!(frame = %text, "ws: recv binary frame");
                        return Ok(text);
                    }
                    Err(_) => debug!(len = bytes.len(), "ws: ignoring non-utf8 binary frame"),
                },
                Ok(Message::Close(_)) => return Err(TransportError::Closed),
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Err(TransportError::Closed);
                }
                Err(error) => return Err(TransportError::Receive(Box::new(error))),
            }
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
#[path = "transport_helpers_test.rs"]
pub mod test_helpers;
