//! Domain types shared between the framing core and the network layer.
//!
//! Nothing here performs I/O.  The `bridge-node` crate drives these types
//! from its tokio-based session manager.

/// Session endpoint, connection state machine, and disconnect reasons.
pub mod session;
