//! bridge-node library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the bridge node do?
//!
//! The node runs on the controller that sits between the sensors and the
//! head controller.  It:
//!
//! 1. Opens one TCP session per configured endpoint and keeps it connected,
//!    retrying with a per-session policy.
//! 2. Reads each serial line on its own thread and feeds every chunk to the
//!    line's [`bridge_core::PacketFramer`].
//! 3. Forwards each completed packet to the session paired with its line.
//!    Packets that arrive while the session is down are dropped, not queued.
//! 4. Logs whatever the head controller sends back; inbound data is not
//!    forwarded anywhere.

/// Application layer: supervision, forwarding and heartbeat use cases.
pub mod application;

/// Infrastructure layer: TCP sessions, serial lines and configuration.
pub mod infrastructure;
