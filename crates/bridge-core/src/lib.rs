//! # bridge-core
//!
//! Shared library for the serial-to-TCP bridge containing the packet framing
//! engine and the domain types that describe a TCP session.
//!
//! This crate has zero dependencies on OS APIs, serial drivers, or network
//! sockets.  The `bridge-node` crate supplies all I/O.
//!
//! # Architecture overview
//!
//! The bridge sits on an embedded controller between one or more serial
//! lines (GPS, compass, other NMEA-style sensors) and one or more persistent
//! TCP sessions to a fixed remote host.  Data flows one way per line:
//!
//! ```text
//! serial bytes ─► PacketFramer ─► Packet ─► bridge ─► Session::send ─► TCP
//! ```
//!
//! This crate defines:
//!
//! - **`framing`** – Turns an unbounded byte stream into bounded packets,
//!   flushing on a delimiter (`\n`) or when the packet buffer is full.
//!
//! - **`domain`** – The immutable session endpoint, the connection state
//!   machine, and the reasons a session can drop.

pub mod domain;
pub mod framing;

// Re-export the most-used types at the crate root so callers can write
// `bridge_core::PacketFramer` instead of `bridge_core::framing::framer::PacketFramer`.
pub use domain::session::{ConnectionState, DisconnectReason, SessionEndpoint};
pub use framing::framer::{FramerConfig, FramerStats, FramingError, PacketFramer, PacketSink};
pub use framing::packet::{FlushReason, Packet, WireFormat};
