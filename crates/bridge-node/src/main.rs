//! Serial-to-TCP bridge node: entry point.
//!
//! # Usage
//!
//! ```text
//! bridge-node [OPTIONS]
//!
//! Options:
//!   --config    <PATH>    Configuration file [env: BRIDGE_CONFIG] [default: bridge.toml]
//!   --log-level <FILTER>  Log filter when RUST_LOG is unset (overrides [bridge].log_level)
//! ```
//!
//! # Startup order
//!
//! 1. Load the configuration and initialise logging.
//! 2. Create every session, start its supervisor and inbound logger.
//! 3. Wait (up to `startup_timeout_ms`) for each session to connect, so the
//!    serial input buffers are not overrunning while TCP is still coming up.
//! 4. Open the serial lines, each with its framer and forwarder.
//! 5. Start the heartbeat, if configured.
//!
//! The node then runs until Ctrl+C, or until a supervisor whose session is
//! configured `on_disconnect = "exit"` (or whose retries ran out) stops; in
//! that case the process exits with an error so a service manager can
//! restart it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use bridge_core::PacketFramer;
use clap::Parser;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bridge_node::application::forward_packets::{forward_packets, log_inbound, ChannelSink, ForwardStats};
use bridge_node::application::heartbeat::run_heartbeat;
use bridge_node::application::supervise_session::{
    wait_connected, SessionSupervisor, SupervisorConfig, SupervisorError,
};
use bridge_node::infrastructure::serial::{SerialError, SerialLine, SerialPortSource};
use bridge_node::infrastructure::session::Session;
use bridge_node::infrastructure::storage::config::{load_config, AppConfig};

/// How often the main task checks the shutdown flag.
const MAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Serial-to-TCP bridge node.
///
/// Reads NMEA-style sensor streams from serial lines and forwards each
/// framed packet over a persistent TCP session.
#[derive(Debug, Parser)]
#[command(
    name = "bridge-node",
    about = "Forwards framed serial packets over persistent TCP sessions",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// A missing file is not fatal: the node starts with no sessions and no
    /// lines, which is only useful for checking the installation.
    #[arg(long, default_value = "bridge.toml", env = "BRIDGE_CONFIG")]
    config: PathBuf,

    /// `tracing` filter used when `RUST_LOG` is not set.
    #[arg(long, env = "BRIDGE_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Picks the log filter: `--log-level`, then the config file, then `info`.
    fn log_filter(&self, config: Option<&AppConfig>) -> String {
        self.log_level
            .clone()
            .or_else(|| config.map(|c| c.bridge.log_level.clone()))
            .unwrap_or_else(|| "info".to_string())
    }
}

// ── Running bridge ────────────────────────────────────────────────────────────

/// Handles to everything started by [`start_bridge`].
struct Bridge {
    supervisors: JoinSet<Result<(), SupervisorError>>,
    lines: Vec<(String, thread::JoinHandle<Result<(), SerialError>>)>,
    forwarders: Vec<(String, JoinHandle<ForwardStats>)>,
    heartbeat: Option<JoinHandle<u64>>,
}

async fn start_bridge(config: &AppConfig, running: &Arc<AtomicBool>) -> anyhow::Result<Bridge> {
    let started = Instant::now();

    // ── TCP sessions first ────────────────────────────────────────────────────
    let mut sessions: HashMap<String, Session> = HashMap::new();
    let mut supervisors = JoinSet::new();
    for entry in &config.sessions {
        let endpoint = entry.endpoint()?;
        let (session, events) = Session::new(endpoint, entry.session_config());
        tokio::spawn(log_inbound(entry.name.clone(), events));
        let supervisor = SessionSupervisor::new(session.clone(), SupervisorConfig::from(entry));
        supervisors.spawn(supervisor.run(Arc::clone(running)));
        sessions.insert(entry.name.clone(), session);
    }

    let startup_timeout = config.bridge.startup_timeout();
    for entry in &config.sessions {
        if let Some(session) = sessions.get(&entry.name) {
            if let Err(e) = wait_connected(session, startup_timeout).await {
                warn!("{e}; opening serial lines anyway");
            }
        }
    }

    // ── Serial lines ──────────────────────────────────────────────────────────
    let mut lines = Vec::new();
    let mut forwarders = Vec::new();
    for line in &config.lines {
        let session = sessions
            .get(&line.session)
            .ok_or_else(|| anyhow!("line {}: unknown session '{}'", line.name, line.session))?;

        let (sink, packets) = ChannelSink::new(line.name.clone());
        let framer = PacketFramer::new(
            line.name.clone(),
            config.framer_config_for(line),
            Box::new(sink),
        )
        .with_context(|| format!("line {}", line.name))?;
        let source = SerialPortSource::open(&line.port, line.baud_rate, line.read_timeout())
            .with_context(|| format!("line {}", line.name))?;

        forwarders.push((
            line.name.clone(),
            tokio::spawn(forward_packets(
                line.name.clone(),
                packets,
                session.clone(),
                line.wire_format,
            )),
        ));
        let handle = SerialLine::new(source, Arc::new(framer))
            .spawn(Arc::clone(running))
            .with_context(|| format!("failed to start thread for line {}", line.name))?;
        lines.push((line.name.clone(), handle));
    }

    // ── Heartbeat ─────────────────────────────────────────────────────────────
    let heartbeat = match &config.heartbeat {
        Some(hb) => {
            let session = sessions
                .get(&hb.session)
                .ok_or_else(|| anyhow!("heartbeat: unknown session '{}'", hb.session))?;
            Some(tokio::spawn(run_heartbeat(
                session.clone(),
                Duration::from_secs(hb.interval_secs),
                started,
                Arc::clone(running),
            )))
        }
        None => None,
    };

    Ok(Bridge {
        supervisors,
        lines,
        forwarders,
        heartbeat,
    })
}

impl Bridge {
    /// Runs until shutdown is requested or a supervisor gives up.  Returns
    /// the supervisor error that ended the run, if any.
    async fn wait(&mut self, running: &AtomicBool) -> Option<SupervisorError> {
        while running.load(Ordering::Relaxed) {
            tokio::select! {
                Some(joined) = self.supervisors.join_next() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Some(e),
                    Err(e) => error!("supervisor task failed: {e}"),
                },
                _ = time::sleep(MAIN_POLL_INTERVAL) => {}
            }
        }
        None
    }

    /// Stops every task and thread.  `running` must already be cleared.
    async fn shut_down(mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }

        // Supervisors close their sessions first.  That abandons any send
        // blocked on a peer that stopped reading, so a forwarder cannot keep
        // a serial thread parked in its packet handoff.
        while let Some(joined) = self.supervisors.join_next().await {
            if let Ok(Err(e)) = joined {
                warn!("{e}");
            }
        }

        // Serial threads notice the cleared flag within one read timeout.
        for (name, handle) in self.lines.drain(..) {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(_)) => {}
                _ => error!("line {name}: thread panicked"),
            }
        }

        // With the framers gone the packet channels close and forwarders finish.
        for (name, handle) in self.forwarders.drain(..) {
            if let Err(e) = handle.await {
                error!("line {name}: forwarder task failed: {e}");
            }
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load first so the config file's log level can seed the filter.
    let loaded = load_config(&cli.config);
    let filter = cli.log_filter(loaded.as_ref().ok().and_then(Option::as_ref));
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = match loaded.with_context(|| format!("loading {}", cli.config.display()))? {
        Some(config) => config,
        None => {
            warn!(
                "config file {} not found; starting with defaults (no sessions, no lines)",
                cli.config.display()
            );
            AppConfig::default()
        }
    };

    info!(
        "bridge node starting: {} session(s), {} line(s)",
        config.sessions.len(),
        config.lines.len()
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let mut bridge = match start_bridge(&config, &running).await {
        Ok(bridge) => bridge,
        Err(e) => {
            running.store(false, Ordering::Relaxed);
            return Err(e);
        }
    };

    let failure = bridge.wait(&running).await;
    running.store(false, Ordering::Relaxed);
    bridge.shut_down().await;

    match failure {
        Some(e) => Err(anyhow::Error::new(e).context("bridge node stopped")),
        None => {
            info!("bridge node stopped");
            Ok(())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_config_path() {
        // Arrange / Act
        let cli = Cli::parse_from(["bridge-node"]);

        // Assert
        assert_eq!(cli.config, PathBuf::from("bridge.toml"));
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn test_cli_config_override() {
        let cli = Cli::parse_from(["bridge-node", "--config", "/etc/bridge/node.toml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/bridge/node.toml"));
    }

    #[test]
    fn test_log_filter_prefers_cli_over_config() {
        let cli = Cli::parse_from(["bridge-node", "--log-level", "debug"]);
        let mut config = AppConfig::default();
        config.bridge.log_level = "warn".to_string();
        assert_eq!(cli.log_filter(Some(&config)), "debug");
    }

    #[test]
    fn test_log_filter_falls_back_to_config_then_info() {
        let cli = Cli::parse_from(["bridge-node"]);
        let mut config = AppConfig::default();
        config.bridge.log_level = "warn".to_string();
        assert_eq!(cli.log_filter(Some(&config)), "warn");
        assert_eq!(cli.log_filter(None), "info");
    }

    #[tokio::test]
    async fn test_start_bridge_with_default_config_starts_nothing() {
        let running = Arc::new(AtomicBool::new(true));
        let bridge = start_bridge(&AppConfig::default(), &running).await.unwrap();
        assert!(bridge.lines.is_empty());
        assert!(bridge.forwarders.is_empty());
        assert!(bridge.heartbeat.is_none());
        running.store(false, Ordering::Relaxed);
        bridge.shut_down().await;
    }
}
