//! Session endpoint and connection state.
//!
//! # Connection lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──ok──► Connected
//!      ▲                          │                  │
//!      └────────── failed ────────┘                  │
//!      └──────────── send/receive failure, close() ──┘
//! ```
//!
//! There is no terminal state: a disconnected session can always be
//! connected again by whoever supervises it.

use std::fmt;
use std::net::SocketAddr;

/// The fixed remote end of one TCP session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionEndpoint {
    name: String,
    addr: SocketAddr,
}

impl SessionEndpoint {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for SessionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.addr)
    }
}

/// Current state of a session's TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No socket.  Initial state, and the state after any I/O failure.
    #[default]
    Disconnected,
    /// TCP handshake in progress.
    Connecting,
    /// Socket open; the only state in which sends are allowed.
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Why a connected session went back to [`ConnectionState::Disconnected`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote host closed the connection (read returned 0 bytes).
    PeerClosed,
    /// A read on the socket failed.
    ReadFailed(String),
    /// A write on the socket failed.
    WriteFailed(String),
    /// The session was closed locally.
    Closed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => f.write_str("peer closed the connection"),
            DisconnectReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            DisconnectReason::WriteFailed(e) => write!(f, "write failed: {e}"),
            DisconnectReason::Closed => f.write_str("closed locally"),
        }
    }
}
