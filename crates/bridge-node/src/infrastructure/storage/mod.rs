//! Storage infrastructure: the TOML configuration file.
//!
//! The `config` sub-module reads the file named on the command line (or in
//! `BRIDGE_CONFIG`), fills in defaults for every optional field and checks
//! that the sessions and lines it describes fit together.

pub mod config;
