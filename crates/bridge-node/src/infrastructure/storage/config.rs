//! TOML configuration for the bridge node.
//!
//! Example:
//!
//! ```toml
//! [bridge]
//! log_level = "info"
//! startup_timeout_ms = 10000
//!
//! [framing]
//! packet_capacity = 256
//! max_chunk_bytes = 256
//!
//! [[sessions]]
//! name = "ep0"
//! address = "192.168.45.116"
//! port = 3000
//! retry = { strategy = "fixed", delay_ms = 1000 }
//!
//! [[sessions]]
//! name = "ep1"
//! address = "192.168.45.116"
//! port = 3001
//! retry = { strategy = "fixed", delay_ms = 5000 }
//! on_disconnect = "exit"
//!
//! [[lines]]
//! name = "com1"
//! port = "/dev/ttyS0"
//! baud_rate = 4800
//! session = "ep0"
//!
//! [heartbeat]
//! session = "ep0"
//! interval_secs = 2
//! ```
//!
//! Every field annotated with `#[serde(default = ...)]` may be left out.
//! A missing file is reported as `Ok(None)` by [`load_config`]; the binary
//! then starts with the defaults (no sessions, no lines) and logs a warning.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bridge_core::{FramerConfig, SessionEndpoint, WireFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::session::{SessionConfig, DEFAULT_RECEIVE_CAPACITY};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but describes an unusable setup.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Framing defaults applied to every line unless overridden.
    #[serde(default)]
    pub framing: FramerConfig,
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
    #[serde(default)]
    pub lines: Vec<LineEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatConfig>,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How long startup waits for each session before opening serial lines.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

/// One outbound TCP session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEntry {
    pub name: String,
    /// IPv4 or IPv6 literal of the remote host.
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub on_disconnect: OnDisconnect,
    /// Inbound bytes kept per read.
    #[serde(default = "default_receive_capacity")]
    pub receive_capacity: usize,
    /// Upper bound on each TCP handshake.  Absent means the OS default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

/// How the supervisor spaces connection attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default)]
    pub strategy: RetryStrategy,
    /// Fixed delay, or the first delay of an exponential schedule.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    /// Ceiling for the exponential schedule.
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Give up after this many failed attempts.  Absent retries forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    #[default]
    Fixed,
    Exponential,
}

/// What to do once an established session is lost.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OnDisconnect {
    #[default]
    Reconnect,
    Exit,
}

/// One serial line and the session its packets go to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineEntry {
    pub name: String,
    /// Device path, e.g. `/dev/ttyUSB0` or `COM1`.
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Name of the `[[sessions]]` entry this line forwards to.
    pub session: String,
    #[serde(default)]
    pub wire_format: WireFormat,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framing: Option<FramingOverrides>,
}

/// Per-line replacements for the `[framing]` defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FramingOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunk_bytes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<u8>,
}

/// Periodic uptime line sent to one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub session: String,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_startup_timeout_ms() -> u64 {
    10_000
}
fn default_receive_capacity() -> usize {
    DEFAULT_RECEIVE_CAPACITY
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}
fn default_baud_rate() -> u32 {
    4800
}
fn default_read_timeout_ms() -> u64 {
    100
}
fn default_heartbeat_interval_secs() -> u64 {
    2
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            startup_timeout_ms: default_startup_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::default(),
            delay_ms: default_retry_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            max_attempts: None,
        }
    }
}

// ── Derived settings ──────────────────────────────────────────────────────────

impl BridgeConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

impl SessionEntry {
    /// Resolves the configured address into an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `address` is not an IP literal.
    pub fn endpoint(&self) -> Result<SessionEndpoint, ConfigError> {
        let ip: IpAddr = self.address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "session {}: '{}' is not an IP address",
                self.name, self.address
            ))
        })?;
        Ok(SessionEndpoint::new(
            self.name.clone(),
            SocketAddr::new(ip, self.port),
        ))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            receive_capacity: self.receive_capacity,
            read_chunk_bytes: self.receive_capacity,
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
            ..SessionConfig::default()
        }
    }
}

impl LineEntry {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl AppConfig {
    /// The framer settings for `line`: `[framing]` with the line's overrides applied.
    pub fn framer_config_for(&self, line: &LineEntry) -> FramerConfig {
        let mut cfg = self.framing.clone();
        if let Some(overrides) = &line.framing {
            if let Some(capacity) = overrides.packet_capacity {
                cfg.packet_capacity = capacity;
            }
            if let Some(chunk) = overrides.max_chunk_bytes {
                cfg.max_chunk_bytes = chunk;
            }
            if let Some(delimiter) = overrides.delimiter {
                cfg.delimiter = delimiter;
            }
        }
        cfg
    }

    /// Checks that the configuration describes a runnable bridge.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem found:
    /// duplicate names, lines or heartbeat pointing at unknown sessions,
    /// unparseable addresses, zero ports, a zero serial read timeout, or framing
/// sizes the framer rejects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut session_names = HashSet::new();
        for session in &self.sessions {
            if !session_names.insert(session.name.as_str()) {
                return Err(invalid(format!("duplicate session name '{}'", session.name)));
            }
            session.endpoint()?;
            if session.port == 0 {
                return Err(invalid(format!("session {}: port must not be 0", session.name)));
            }
            if session.receive_capacity == 0 {
                return Err(invalid(format!(
                    "session {}: receive_capacity must be at least 1",
                    session.name
                )));
            }
            let retry = &session.retry;
            if retry.strategy == RetryStrategy::Exponential
                && (retry.delay_ms == 0 || retry.max_delay_ms < retry.delay_ms)
            {
                return Err(invalid(format!(
                    "session {}: exponential retry needs 0 < delay_ms <= max_delay_ms",
                    session.name
                )));
            }
        }

        self.framing
            .validate()
            .map_err(|e| invalid(format!("[framing]: {e}")))?;

        let mut line_names = HashSet::new();
        for line in &self.lines {
            if !line_names.insert(line.name.as_str()) {
                return Err(invalid(format!("duplicate line name '{}'", line.name)));
            }
            if !session_names.contains(line.session.as_str()) {
                return Err(invalid(format!(
                    "line {}: unknown session '{}'",
                    line.name, line.session
                )));
            }
            if line.baud_rate == 0 {
                return Err(invalid(format!("line {}: baud_rate must not be 0", line.name)));
            }
            if line.read_timeout_ms == 0 {
                return Err(invalid(format!(
                    "line {}: read_timeout_ms must be at least 1",
                    line.name
                )));
            }
            self.framer_config_for(line)
                .validate()
                .map_err(|e| invalid(format!("line {}: {e}", line.name)))?;
        }

        if let Some(heartbeat) = &self.heartbeat {
            if !session_names.contains(heartbeat.session.as_str()) {
                return Err(invalid(format!(
                    "heartbeat: unknown session '{}'",
                    heartbeat.session
                )));
            }
            if heartbeat.interval_secs == 0 {
                return Err(invalid("heartbeat: interval_secs must be at least 1".to_string()));
            }
        }

        Ok(())
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Invalid(message)
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses and validates configuration text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed TOML and
/// [`ConfigError::Invalid`] if validation fails.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let cfg: AppConfig = toml::from_str(content)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Loads the configuration at `path`.  Returns `Ok(None)` if the file does
/// not exist; the caller decides whether defaults are acceptable.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed and
/// [`ConfigError::Invalid`] if validation fails.
pub fn load_config(path: &Path) -> Result<Option<AppConfig>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
