//! TCP session manager.
//!
//! A [`Session`] owns one outbound TCP connection to a fixed
//! [`SessionEndpoint`].  It does not retry on its own; the supervisor in
//! `application::supervise_session` decides when to call [`Session::connect`]
//! again.
//!
//! Architecture:
//! - `connect` performs one TCP handshake, stores the write half, emits
//!   [`SessionEvent::Connected`] and only then spawns the receive loop on the
//!   read half, so no inbound event can precede `Connected`.
//! - `send` writes a whole buffer while holding the write-half mutex.  The
//!   write races the state channel: once the session leaves `Connected` the
//!   write is abandoned and the mutex released, so `close` never waits on a
//!   peer that stopped reading.
//! - The receive loop emits [`SessionEvent`]s on the channel handed out by
//!   [`Session::new`] and tears the connection down on EOF or error.
//! - Every connection gets a generation number; a receive loop or failed
//!   send that belongs to an older connection cannot tear down a newer one.
//!
//! Connection state is published through a `watch` channel so supervisors
//! and diagnostics can observe it without polling.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bridge_core::{ConnectionState, DisconnectReason, SessionEndpoint};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, error, info, warn};

/// Bytes of inbound data delivered per [`SessionEvent::DataReceived`].
pub const DEFAULT_RECEIVE_CAPACITY: usize = 128;

/// Size of the scratch buffer handed to each socket read.  Equal to the
/// receive capacity, so by default no inbound byte is ever dropped.
pub const DEFAULT_READ_CHUNK_BYTES: usize = DEFAULT_RECEIVE_CAPACITY;

/// Errors that can occur in the session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The TCP handshake with the endpoint failed.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// The TCP handshake did not finish in time.
    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimedOut { addr: SocketAddr, timeout: Duration },
    /// `connect` was called while a connection is already open or opening.
    #[error("session is already {0}")]
    AlreadyActive(ConnectionState),
    /// `send` was called while the session is not connected.
    #[error("session is {0}, not connected")]
    NotConnected(ConnectionState),
    /// Writing to the socket failed; the session is now disconnected.
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),
    /// The connection went down while the write was in progress.  Part of
    /// the buffer may have reached the peer.
    #[error("send interrupted: session disconnected")]
    Interrupted,
}

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inbound bytes kept per read; the rest of a larger read is dropped
    /// and reported as [`SessionEvent::ReceiveOverflow`].
    pub receive_capacity: usize,
    /// Size of the buffer each socket read fills.
    pub read_chunk_bytes: usize,
    /// Upper bound on the TCP handshake.  `None` waits for the OS.
    pub connect_timeout: Option<Duration>,
    /// Capacity of the event channel returned by [`Session::new`].
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            receive_capacity: DEFAULT_RECEIVE_CAPACITY,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            connect_timeout: None,
            event_capacity: 64,
        }
    }
}

/// Events emitted by a session to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The TCP connection was established.
    Connected,
    /// The TCP connection was lost or closed.
    Disconnected(DisconnectReason),
    /// Bytes arrived from the remote host (at most `receive_capacity`).
    DataReceived(Vec<u8>),
    /// A read returned more than `receive_capacity` bytes; the excess was dropped.
    ReceiveOverflow { received: usize, dropped: usize },
}

struct Writer {
    generation: u64,
    half: OwnedWriteHalf,
}

/// The connection currently considered live.
struct Active {
    generation: u64,
    reader: Option<JoinHandle<()>>,
}

/// Who asked for a teardown.  The receive loop must not abort itself.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Origin {
    ReceiveLoop,
    Caller,
}

struct Inner {
    endpoint: SessionEndpoint,
    config: SessionConfig,
    state_tx: watch::Sender<ConnectionState>,
    writer: tokio::sync::Mutex<Option<Writer>>,
    active: Mutex<Option<Active>>,
    generation: AtomicU64,
    events: mpsc::Sender<SessionEvent>,
}

/// One persistent outbound TCP session.  Cheap to clone; clones share the
/// same socket and state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Creates a disconnected session and the receiver for its events.
    ///
    /// The receiver should be drained continuously: the receive loop waits
    /// for room in the channel before reading more from the socket.
    pub fn new(
        endpoint: SessionEndpoint,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, rx) = mpsc::channel(config.event_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Inner {
            endpoint,
            config,
            state_tx,
            writer: tokio::sync::Mutex::new(None),
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            events,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn endpoint(&self) -> &SessionEndpoint {
        &self.inner.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Returns a receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Makes one connection attempt.
    ///
    /// On success the session is `Connected`, [`SessionEvent::Connected`] has
    /// been queued and the receive loop is running.  On failure it is back to
    /// `Disconnected` and nothing was spawned.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyActive`] if the session is connecting or connected.
    /// - [`SessionError::ConnectFailed`] / [`SessionError::ConnectTimedOut`] if
    ///   the handshake fails.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let inner = &self.inner;

        let mut current = ConnectionState::Disconnected;
        inner.state_tx.send_if_modified(|state| {
            current = *state;
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if current != ConnectionState::Disconnected {
            return Err(SessionError::AlreadyActive(current));
        }

        let addr = inner.endpoint.addr();
        debug!("{}: connecting", inner.endpoint);

        let handshake = TcpStream::connect(addr);
        let stream = match connect_within(addr, inner.config.connect_timeout, handshake).await {
            Ok(stream) => stream,
            Err(e) => {
                inner.state_tx.send_replace(ConnectionState::Disconnected);
                warn!("{}: {e}", inner.endpoint);
                return Err(e);
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("{}: could not disable Nagle: {e}", inner.endpoint);
        }

        let (read_half, write_half) = stream.into_split();
        let generation = inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        *inner.writer.lock().await = Some(Writer {
            generation,
            half: write_half,
        });
        *inner.lock_active() = Some(Active {
            generation,
            reader: None,
        });
        inner.state_tx.send_replace(ConnectionState::Connected);
        info!("{}: connected to {addr}", inner.endpoint);

        inner.emit(SessionEvent::Connected).await;

        // Spawned under the lock so the loop cannot tear down before its
        // handle is stored.
        {
            let mut active = inner.lock_active();
            match active.as_mut() {
                Some(slot) if slot.generation == generation => {
                    slot.reader = Some(tokio::spawn(receive_loop(
                        Arc::clone(inner),
                        read_half,
                        generation,
                    )));
                }
                _ => debug!("{}: closed before the receive loop started", inner.endpoint),
            }
        }
        Ok(())
    }

    /// Writes all of `data` to the socket.
    ///
    /// On failure the session moves to `Disconnected`; nothing is retried
    /// and no partial delivery may be assumed.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotConnected`] if the session is not connected; the
    ///   state is left as it was.
    /// - [`SessionError::SendFailed`] if the write fails.
    /// - [`SessionError::Interrupted`] if the session was closed or lost
    ///   while the write was blocked.
    pub async fn send(&self, data: &[u8]) -> Result<(), SessionError> {
        let inner = &self.inner;

        let mut state = inner.state_tx.subscribe();
        let current = *state.borrow_and_update();
        if !current.is_connected() {
            return Err(SessionError::NotConnected(current));
        }

        let write = async {
            let mut writer = inner.writer.lock().await;
            match writer.as_mut() {
                Some(w) => Some((w.generation, w.half.write_all(data).await)),
                None => None,
            }
        };

        let outcome = tokio::select! {
            outcome = write => outcome,
            _ = state.wait_for(|s| !s.is_connected()) => {
                debug!("{}: send abandoned, session went down", inner.endpoint);
                return Err(SessionError::Interrupted);
            }
        };

        match outcome {
            None => Err(SessionError::NotConnected(self.state())),
            Some((_, Ok(()))) => Ok(()),
            Some((generation, Err(e))) => {
                error!("{}: send failed: {e}", inner.endpoint);
                inner
                    .tear_down(
                        generation,
                        DisconnectReason::WriteFailed(e.to_string()),
                        Origin::Caller,
                    )
                    .await;
                Err(SessionError::SendFailed(e))
            }
        }
    }

    /// Closes the connection if one is open.  Idempotent, and safe to call
    /// while a send or the receive loop is in flight: a blocked send is
    /// abandoned rather than waited for.
    pub async fn close(&self) {
        let generation = self.inner.lock_active().as_ref().map(|a| a.generation);
        if let Some(generation) = generation {
            self.inner
                .tear_down(generation, DisconnectReason::Closed, Origin::Caller)
                .await;
        }
    }

    #[cfg(test)]
    fn has_receive_loop(&self) -> bool {
        self.inner
            .lock_active()
            .as_ref()
            .and_then(|a| a.reader.as_ref())
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

/// Drives a TCP handshake, bounded by `timeout` when one is set.
async fn connect_within<F>(
    addr: SocketAddr,
    timeout: Option<Duration>,
    handshake: F,
) -> Result<TcpStream, SessionError>
where
    F: Future<Output = io::Result<TcpStream>>,
{
    let result = match timeout {
        Some(timeout) => time::timeout(timeout, handshake)
            .await
            .map_err(|_| SessionError::ConnectTimedOut { addr, timeout })?,
        None => handshake.await,
    };
    result.map_err(|source| SessionError::ConnectFailed { addr, source })
}

impl Inner {
    /// Marks connection `generation` disconnected, stops its receive loop
    /// and drops its write half.  A stale generation is ignored.
    ///
    /// The state flips before the write mutex is taken; that wakes any send
    /// blocked on this connection so the mutex comes free.
    async fn tear_down(&self, generation: u64, reason: DisconnectReason, origin: Origin) {
        {
            let mut active = self.lock_active();
            match active.as_ref() {
                Some(current) if current.generation == generation => {}
                _ => return,
            }
            if let Some(reader) = active.take().and_then(|a| a.reader) {
                if origin == Origin::Caller {
                    reader.abort();
                }
            }
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }

        {
            let mut writer = self.writer.lock().await;
            if writer.as_ref().is_some_and(|w| w.generation == generation) {
                writer.take();
            }
        }

        match reason {
            DisconnectReason::Closed => info!("{}: closed", self.endpoint),
            ref other => warn!("{}: disconnected: {other}", self.endpoint),
        }
        self.emit(SessionEvent::Disconnected(reason)).await;
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("{}: event receiver dropped", self.endpoint);
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reads from the socket until EOF or an error, then tears the connection down.
async fn receive_loop(inner: Arc<Inner>, mut reader: OwnedReadHalf, generation: u64) {
    let capacity = inner.config.receive_capacity;
    let mut scratch = vec![0u8; inner.config.read_chunk_bytes.max(1)];

    let reason = loop {
        let n = match reader.read(&mut scratch).await {
            Ok(0) => break DisconnectReason::PeerClosed,
            Ok(n) => n,
            Err(e) => break DisconnectReason::ReadFailed(e.to_string()),
        };

        let kept = n.min(capacity);
        if kept < n {
            warn!(
                "{}: receive overflow, dropped {} of {n} bytes",
                inner.endpoint,
                n - kept
            );
            inner
                .emit(SessionEvent::ReceiveOverflow {
                    received: n,
                    dropped: n - kept,
                })
                .await;
        }
        inner
            .emit(SessionEvent::DataReceived(scratch[..kept].to_vec()))
            .await;
    };

    debug!("{}: receive loop exiting", inner.endpoint);
    inner
        .tear_down(generation, reason, Origin::ReceiveLoop)
        .await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
