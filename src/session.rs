//! Session: connection lifecycle, retry loop, read loop, and command dispatch.
//!
//! DESIGN
//! ======
//! A session walks `Disconnected → Connecting → AwaitingWelcome → Ready`,
//! dropping back to `Disconnected` between failed attempts and landing in
//! `Failed` when the retry budget is spent. `close()` moves any state through
//! `Closing` to `Closed`, which nothing leaves.
//!
//! While Ready, a spawned read loop drains the socket into the correlator.
//! Callers write through a shared sink and suspend on their own oneshot slot,
//! so the read loop never waits on a caller's timeout.
//!
//! Each Ready connection gets a generation number. Teardown paths carry the
//! generation they observed and do nothing if a newer connection has since
//! been installed.
//!
//! ERROR HANDLING
//! ==============
//! Attempt failures (connect, handshake) are reported as events and retried;
//! only the final one reaches the caller, inside `SessionError::Connect`. A
//! send failure or unsolicited close fails every pending request with
//! `ConnectionLost` exactly once. Teardown errors while closing are traced at
//! debug level and otherwise ignored.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use wire::{Command, Envelope, Reply};

use crate::config::SessionConfig;
use crate::correlator::{Correlator, Routed, Ticket};
use crate::error::{AttemptError, SessionError, TransportError};
use crate::event::{DisconnectReason, EventSink, SessionEvent};
use crate::handshake::await_welcome;
use crate::state::{ClientIdentity, ConnectionState};
use crate::transport::{Connection, Connector, FrameSink, FrameStream, WsConnector};

use crate::state::ConnectionState::{AwaitingWelcome, Closed, Closing, Connecting, Disconnected, Failed, Ready};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Client session against one websocket endpoint.
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    events: Arc<dyn EventSink>,
    state: Mutex<ConnectionState>,
    client_id: Mutex<Option<ClientIdentity>>,
    correlator: Correlator,
    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    reader: Mutex<Option<ReadLoop>>,
    /// Serializes commands unless pipelining is on.
    gate: tokio::sync::Mutex<()>,
    connect_used: AtomicBool,
    unrecognized: AtomicU64,
    generation: AtomicU64,
}

struct ReadLoop {
    generation: u64,
    handle: JoinHandle<()>,
}

enum AttemptFailure {
    /// The attempt failed; retry per policy.
    Failed { error: AttemptError, state: ConnectionState },
    /// `close()` ran during the attempt.
    Interrupted(SessionError),
}

impl Session {
    /// Session over real websockets.
    #[must_use]
    pub fn new(config: SessionConfig, events: Arc<dyn EventSink>) -> Self {
        Self::with_connector(config, Arc::new(WsConnector), events)
    }

    #[must_use]
    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>, events: Arc<dyn EventSink>) -> Self {
        let inner = Inner {
            config,
            connector,
            events,
            state: Mutex::new(Disconnected),
            client_id: Mutex::new(None),
            correlator: Correlator::new(),
            sink: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
            gate: tokio::sync::Mutex::new(()),
            connect_used: AtomicBool::new(false),
            unrecognized: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Connect using the configured retry policy. Callable once per session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Connect`] once every attempt has failed.
    /// - [`SessionError::InvalidState`] on a second call, or if `close()` runs
    ///   while connecting.
    pub async fn connect(&self) -> Result<ClientIdentity, SessionError> {
        if self.inner.connect_used.swap(true, Ordering::SeqCst) {
            return Err(SessionError::InvalidState { operation: "connect", state: self.state() });
        }
        self.inner.advance("connect", &[Disconnected], Connecting)?;
        self.inner.establish().await
    }

    /// Connect again after a lost connection or an exhausted retry budget.
    /// Yields a fresh client identity.
    ///
    /// # Errors
    ///
    /// Same as [`Session::connect`]; `InvalidState` unless the session is
    /// `Disconnected` or `Failed`.
    pub async fn reconnect(&self) -> Result<ClientIdentity, SessionError> {
        self.inner.connect_used.store(true, Ordering::SeqCst);
        self.inner.advance("reconnect", &[Disconnected, Failed], Connecting)?;
        self.inner.establish().await
    }

    /// Send `command` and wait up to `timeout` for its correlated reply.
    ///
    /// In strict mode the wait for earlier commands counts against `timeout`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotConnected`] unless the session is Ready.
    /// - [`SessionError::Timeout`] when no reply arrives in time; the pending
    ///   request is removed, so a late reply is discarded.
    /// - [`SessionError::ConnectionLost`] when the connection drops first.
    /// - [`SessionError::Encode`] if the command cannot be encoded.
    pub async fn send_command(&self, command: &Command, timeout: Duration) -> Result<Reply, SessionError> {
        let inner = &self.inner;
        let started = Instant::now();
        let action = command.action();
        let text = wire::encode_command(command).map_err(|source| SessionError::Encode { action, source })?;
        inner.ensure_ready(command)?;

        let _turn = if inner.config.pipelining {
            None
        } else {
            let Ok(turn) = tokio::time::timeout(timeout, inner.gate.lock()).await else {
                let elapsed = started.elapsed();
                inner.emit(SessionEvent::CommandTimedOut { action, elapsed });
                return Err(SessionError::Timeout { action, elapsed });
            };
            inner.ensure_ready(command)?;
            Some(turn)
        };

        let mut waiter = inner.correlator.register(command);
        let _registered = Registered { correlator: &inner.correlator, ticket: waiter.ticket };
        let generation = inner.generation.load(Ordering::SeqCst);
        let sent = {
            let mut slot = inner.sink.lock().await;
            match slot.as_mut() {
                // close() may have started after the readiness check above.
                Some(sink) if inner.is_ready() => sink.send(text).await,
                _ => Err(TransportError::Closed),
            }
        };

        match sent {
            Ok(()) => inner.emit(SessionEvent::CommandSent { action, pending: inner.correlator.len() }),
            Err(error) => {
                let reason = DisconnectReason::SendFailed(error.to_string());
                if let Some(reader) = inner.connection_lost(generation, reason).await {
                    reader.abort();
                }
                // Not failed by the teardown above; fail it here.
                if inner.correlator.cancel(waiter.ticket) {
                    return Err(SessionError::ConnectionLost { action, elapsed: started.elapsed(), state: self.state() });
                }
            }
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, &mut waiter.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::ConnectionLost { action, elapsed: started.elapsed(), state: self.state() }),
            Err(_) => {
                if inner.correlator.cancel(waiter.ticket) {
                    let elapsed = started.elapsed();
                    inner.emit(SessionEvent::CommandTimedOut { action, elapsed });
                    return Err(SessionError::Timeout { action, elapsed });
                }
                // Resolved between the timer firing and the removal.
                match waiter.rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(SessionError::Timeout { action, elapsed: started.elapsed() }),
                }
            }
        }
    }

    /// [`Session::send_command`] with the configured command timeout.
    ///
    /// # Errors
    ///
    /// See [`Session::send_command`].
    pub async fn send_command_default(&self, command: &Command) -> Result<Reply, SessionError> {
        self.send_command(command, self.inner.config.command_timeout).await
    }

    /// Close the socket and fail every pending request with `ConnectionLost`.
    /// Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        let from = {
            let mut state = inner.lock_state();
            if state.is_closing() {
                return;
            }
            std::mem::replace(&mut *state, Closing)
        };
        inner.emit(SessionEvent::StateChanged { from, to: Closing });
        inner.set_client_id(None);

        // Take the sink first: a command that registers after fail_all below
        // then finds no sink and fails on its own.
        let sink = inner.sink.lock().await.take();
        let failed = inner.correlator.fail_all(|action, elapsed| SessionError::ConnectionLost {
            action,
            elapsed,
            state: Closing,
        });

        if let Some(sink) = sink {
            inner.close_sink(sink).await;
        }

        let reader = inner.lock_reader().take();
        if let Some(reader) = reader {
            let abort = reader.handle.abort_handle();
            if tokio::time::timeout(inner.config.close_timeout, reader.handle).await.is_err() {
                debug!("session: read loop did not stop in time; aborting");
                abort.abort();
            }
        }

        *inner.lock_state() = Closed;
        inner.emit(SessionEvent::StateChanged { from: Closing, to: Closed });
        inner.emit(SessionEvent::Closed { failed_requests: failed });
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.lock_state()
    }

    /// Identity of the current Ready connection.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientIdentity> {
        self.inner.client_id.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Requests waiting for a reply.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.correlator.len()
    }

    /// Frames discarded as unrecognized since the session was created.
    #[must_use]
    pub fn unrecognized_frames(&self) -> u64 {
        self.inner.unrecognized.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

// =============================================================================
// CONNECT LOOP
// =============================================================================

impl Inner {
    /// Run attempts until one succeeds or the retry policy gives up.
    /// Entered in `Connecting`.
    async fn establish(self: &Arc<Self>) -> Result<ClientIdentity, SessionError> {
        let started = Instant::now();
        let policy = self.config.retry;
        let max_attempts = policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.emit(SessionEvent::ConnectAttempt { attempt, max_attempts, url: self.config.url.clone() });

            let (error, last_state) = match self.attempt(attempt, started).await {
                Ok(identity) => return Ok(identity),
                Err(AttemptFailure::Interrupted(error)) => return Err(error),
                Err(AttemptFailure::Failed { error, state }) => (error, state),
            };
            self.emit(SessionEvent::AttemptFailed { attempt, state: last_state, error: error.to_string() });

            let Some(delay) = policy.next_delay(attempt) else {
                self.advance("connect", &[last_state], Failed)?;
                let elapsed = started.elapsed();
                self.emit(SessionEvent::GaveUp { attempts: attempt, elapsed });
                return Err(SessionError::Connect {
                    attempts: attempt,
                    elapsed,
                    last_state,
                    last_error: Box::new(error),
                });
            };

            self.advance("connect", &[last_state], Disconnected)?;
            self.emit(SessionEvent::RetryScheduled { attempt, delay });
            tokio::time::sleep(delay).await;
            self.advance("connect", &[Disconnected], Connecting)?;
        }
    }

    async fn attempt(self: &Arc<Self>, attempt: u32, started: Instant) -> Result<ClientIdentity, AttemptFailure> {
        let timeout = self.config.connect_timeout;
        let opened = tokio::time::timeout(timeout, self.connector.open(&self.config.url)).await;
        let Connection { sink, mut stream } = match opened {
            Ok(Ok(connection)) => connection,
            Ok(Err(error)) => return Err(AttemptFailure::Failed { error: error.into(), state: Connecting }),
            Err(_) => {
                let error = TransportError::ConnectTimeout(timeout);
                return Err(AttemptFailure::Failed { error: error.into(), state: Connecting });
            }
        };

        if let Err(error) = self.advance("connect", &[Connecting], AwaitingWelcome) {
            self.close_sink(sink).await;
            return Err(AttemptFailure::Interrupted(error));
        }

        let identity = match await_welcome(stream.as_mut(), self.config.handshake_timeout).await {
            Ok(identity) => identity,
            Err(error) => {
                self.close_sink(sink).await;
                return Err(AttemptFailure::Failed { error: error.into(), state: AwaitingWelcome });
            }
        };

        // Holding the sink slot orders this install against close() and
        // connection_lost(), which both take the slot.
        let mut slot = self.sink.lock().await;
        if let Err(error) = self.advance("connect", &[AwaitingWelcome], Ready) {
            drop(slot);
            self.close_sink(sink).await;
            return Err(AttemptFailure::Interrupted(error));
        }
        *slot = Some(sink);
        self.set_client_id(Some(identity.clone()));
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = tokio::spawn(read_loop(Arc::downgrade(self), generation, stream));
        *self.lock_reader() = Some(ReadLoop { generation, handle });
        drop(slot);

        self.emit(SessionEvent::Connected { client_id: identity.clone(), attempt, elapsed: started.elapsed() });
        Ok(identity)
    }

    // =========================================================================
    // CONNECTION LOSS
    // =========================================================================

    /// Tear down connection `generation` after an unsolicited close or a send
    /// failure. Returns the read loop handle so the caller can decide whether
    /// to abort it; the read loop itself must not.
    async fn connection_lost(self: &Arc<Self>, generation: u64, reason: DisconnectReason) -> Option<JoinHandle<()>> {
        let sink = {
            let mut slot = self.sink.lock().await;
            if self.generation.load(Ordering::SeqCst) != generation {
                return None;
            }
            if self.advance("disconnect", &[Ready], Disconnected).is_err() {
                return None;
            }
            slot.take()
        };
        self.set_client_id(None);

        let failed_requests = self.correlator.fail_all(|action, elapsed| SessionError::ConnectionLost {
            action,
            elapsed,
            state: Ready,
        });
        self.emit(SessionEvent::Disconnected { reason, failed_requests });

        if let Some(sink) = sink {
            self.close_sink(sink).await;
        }

        let reader = {
            let mut reader = self.lock_reader();
            match reader.as_ref() {
                Some(current) if current.generation == generation => reader.take(),
                _ => None,
            }
        };

        if self.config.auto_reconnect {
            self.spawn_reconnect();
        }
        reader.map(|reader| reader.handle)
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let task: BoxFuture = Box::pin(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.advance("reconnect", &[Disconnected], Connecting).is_err() {
                return;
            }
            if let Err(error) = inner.establish().await {
                debug!(%error, "session: background reconnect failed");
            }
        });
        tokio::spawn(task);
    }

    // =========================================================================
    // INBOUND FRAMES
    // =========================================================================

    fn dispatch(&self, raw: &str) {
        match wire::decode_envelope(raw) {
            Envelope::Ack(ack) => self.route(Reply::Ack(ack)),
            Envelope::Properties(batch) => self.route(Reply::Properties(batch)),
            // A second welcome on a Ready connection is not expected.
            Envelope::Welcome(_) | Envelope::Unrecognized(_) => {
                self.unrecognized.fetch_add(1, Ordering::SeqCst);
                self.emit(SessionEvent::UnrecognizedFrame { raw: raw.to_owned() });
            }
        }
    }

    fn route(&self, reply: Reply) {
        let action = reply.action().to_owned();
        let code = reply.code();
        let event = match self.correlator.route(reply) {
            Routed::Resolved { waited, .. } => SessionEvent::CommandResolved { action, code, elapsed: waited },
            Routed::Abandoned { .. } => SessionEvent::ReplyAbandoned { action },
            Routed::Unmatched => SessionEvent::UnmatchedReply { action },
        };
        self.emit(event);
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Move from one of `allowed` to `to`, or report the current state.
    fn advance(
        &self,
        operation: &'static str,
        allowed: &[ConnectionState],
        to: ConnectionState,
    ) -> Result<(), SessionError> {
        let from = {
            let mut state = self.lock_state();
            if !allowed.contains(&*state) {
                return Err(SessionError::InvalidState { operation, state: *state });
            }
            std::mem::replace(&mut *state, to)
        };
        self.emit(SessionEvent::StateChanged { from, to });
        Ok(())
    }

    fn is_ready(&self) -> bool {
        *self.lock_state() == Ready
    }

    fn ensure_ready(&self, command: &Command) -> Result<(), SessionError> {
        let state = *self.lock_state();
        if state == Ready {
            Ok(())
        } else {
            Err(SessionError::NotConnected { action: command.action(), state })
        }
    }

    async fn close_sink(&self, mut sink: Box<dyn FrameSink>) {
        match tokio::time::timeout(self.config.close_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => debug!(%error, "session: socket close failed"),
            Err(_) => debug!("session: socket close timed out"),
        }
    }

    fn set_client_id(&self, id: Option<ClientIdentity>) {
        *self.client_id.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    fn emit(&self, event: SessionEvent) {
        self.events.emit(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_reader(&self) -> MutexGuard<'_, Option<ReadLoop>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let reader = self.reader.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(reader) = reader {
            reader.handle.abort();
        }
    }
}

/// Removes a registered request when `send_command` returns or its future is
/// dropped early. Removing an already resolved request is a no-op.
struct Registered<'a> {
    correlator: &'a Correlator,
    ticket: Ticket,
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        self.correlator.cancel(self.ticket);
    }
}

/// Drain one connection until it closes. Holds the session weakly so a
/// dropped session stops the loop.
async fn read_loop(session: Weak<Inner>, generation: u64, mut stream: Box<dyn FrameStream>) {
    loop {
        let received = stream.receive().await;
        let Some(inner) = session.upgrade() else {
            return;
        };
        let reason = match received {
            Ok(raw) => {
                inner.dispatch(&raw);
                continue;
            }
            Err(TransportError::Closed) => DisconnectReason::PeerClosed,
            Err(error) => DisconnectReason::ReceiveFailed(error.to_string()),
        };
        // Our own handle; dropping it detaches rather than aborts.
        drop(inner.connection_lost(generation, reason).await);
        return;
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
