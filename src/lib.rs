//! Session core for the charge controller websocket service.
//!
//! Opens a connection, gates on the server's welcome, correlates replies to
//! commands by action, and retries the whole handshake when the upstream
//! server is flaky. Reporting goes through [`EventSink`]; this crate never
//! installs a logger.

pub mod config;
pub mod correlator;
pub mod device;
pub mod error;
pub mod event;
pub mod handshake;
pub mod retry;
pub mod session;
pub mod state;
pub mod transport;

pub use config::SessionConfig;
pub use device::Device;
pub use error::{AttemptError, DeviceError, HandshakeError, SessionError, TransportError};
pub use event::{DisconnectReason, EventSink, NullSink, SessionEvent, TracingSink};
pub use retry::RetryPolicy;
pub use session::Session;
pub use state::{ClientIdentity, ConnectionState};
pub use transport::{Connection, Connector, FrameSink, FrameStream, WsConnector};
pub use wire;
