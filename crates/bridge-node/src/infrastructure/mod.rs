//! Infrastructure layer: all I/O for the bridge node.
//!
//! - `session` – TCP session manager (tokio).
//! - `serial`  – serial line driver feeding the packet framer.
//! - `storage` – TOML configuration file.

pub mod serial;
pub mod session;
pub mod storage;
