//! Application layer use cases for the bridge node.
//!
//! - **`supervise_session`** – Keeps one TCP session connected: retries
//!   failed connects on a [`supervise_session::RetryPolicy`] and, once an
//!   established session drops, either reconnects or ends the process
//!   according to its [`supervise_session::DisconnectPolicy`].
//!
//! - **`forward_packets`** – The bridge between a line's framer and its
//!   session: a one-slot [`forward_packets::ChannelSink`] hands packets from
//!   the serial thread to an async task that encodes and sends them.  Also
//!   drains each session's inbound events into the log.
//!
//! - **`heartbeat`** – Optional periodic uptime line sent to one session.

pub mod forward_packets;
pub mod heartbeat;
pub mod supervise_session;
