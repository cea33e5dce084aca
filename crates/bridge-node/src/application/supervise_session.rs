//! SessionSupervisor: keeps one TCP session connected.
//!
//! The supervisor owns recovery for its [`Session`]:
//!
//! 1. Connect, retrying on the session's [`RetryPolicy`] until a connect
//!    succeeds, `max_attempts` is exhausted, or shutdown is requested.
//! 2. Wait until the session leaves `Connected`.
//! 3. Apply the [`DisconnectPolicy`]: reconnect (back to 1), or stop with
//!    [`SupervisorError::SessionLost`] so the process can exit.
//!
//! Shutdown is signalled through the shared `running` flag used by every
//! long-lived task in the node.  Sleeps and waits are sliced so a cleared
//! flag is noticed within [`SHUTDOWN_POLL_INTERVAL`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_core::{ConnectionState, SessionEndpoint};
use thiserror::Error;
use tokio::{task::JoinHandle, time};
use tracing::{debug, error, info, warn};

use crate::infrastructure::session::Session;
use crate::infrastructure::storage::config::{OnDisconnect, RetryConfig, RetryStrategy, SessionEntry};

/// Upper bound on how long the supervisor takes to notice a shutdown request.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Error type for session supervision.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{endpoint}: giving up after {attempts} failed connection attempts")]
    GaveUp {
        endpoint: SessionEndpoint,
        attempts: u32,
    },
    #[error("{endpoint}: session lost and on_disconnect is exit")]
    SessionLost { endpoint: SessionEndpoint },
    #[error("{endpoint}: not connected within {timeout:?}")]
    NotConnectedWithin {
        endpoint: SessionEndpoint,
        timeout: Duration,
    },
}

/// Delay between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// The same delay after every failed attempt.
    Fixed { delay: Duration },
    /// `initial`, doubled after every failed attempt, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed { delay } => delay,
            RetryPolicy::Exponential { initial, max } => {
                let shift = attempt.saturating_sub(1).min(30);
                initial.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed {
            delay: Duration::from_secs(1),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        match cfg.strategy {
            RetryStrategy::Fixed => RetryPolicy::Fixed {
                delay: Duration::from_millis(cfg.delay_ms),
            },
            RetryStrategy::Exponential => RetryPolicy::Exponential {
                initial: Duration::from_millis(cfg.delay_ms),
                max: Duration::from_millis(cfg.max_delay_ms),
            },
        }
    }
}

/// What the supervisor does once an established session is lost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisconnectPolicy {
    #[default]
    Reconnect,
    Exit,
}

impl From<OnDisconnect> for DisconnectPolicy {
    fn from(value: OnDisconnect) -> Self {
        match value {
            OnDisconnect::Reconnect => DisconnectPolicy::Reconnect,
            OnDisconnect::Exit => DisconnectPolicy::Exit,
        }
    }
}

/// Settings for one supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub retry: RetryPolicy,
    /// Failed connects tolerated per outage.  `None` retries forever.
    pub max_attempts: Option<u32>,
    pub on_disconnect: DisconnectPolicy,
}

impl From<&SessionEntry> for SupervisorConfig {
    fn from(entry: &SessionEntry) -> Self {
        Self {
            retry: RetryPolicy::from(&entry.retry),
            max_attempts: entry.retry.max_attempts,
            on_disconnect: entry.on_disconnect.into(),
        }
    }
}

/// Drives connect / reconnect for one session.
pub struct SessionSupervisor {
    session: Session,
    config: SupervisorConfig,
}

impl SessionSupervisor {
    pub fn new(session: Session, config: SupervisorConfig) -> Self {
        Self { session, config }
    }

    /// Runs the supervisor on the tokio runtime.
    pub fn spawn(self, running: Arc<AtomicBool>) -> JoinHandle<Result<(), SupervisorError>> {
        tokio::spawn(self.run(running))
    }

    /// Supervises the session until shutdown or a policy says stop.  The
    /// session is closed on every exit path.
    ///
    /// # Errors
    ///
    /// - [`SupervisorError::GaveUp`] when `max_attempts` connects fail in a row.
    /// - [`SupervisorError::SessionLost`] when the session drops under
    ///   [`DisconnectPolicy::Exit`].
    pub async fn run(self, running: Arc<AtomicBool>) -> Result<(), SupervisorError> {
        let result = self.supervise(&running).await;
        self.session.close().await;
        if let Err(e) = &result {
            error!("{e}");
        }
        result
    }

    async fn supervise(&self, running: &AtomicBool) -> Result<(), SupervisorError> {
        let endpoint = self.session.endpoint();
        let mut state = self.session.subscribe_state();

        while running.load(Ordering::Relaxed) {
            if !self.connect_with_retry(running).await? {
                break;
            }

            // Wait for the session to leave Connected.
            loop {
                if !running.load(Ordering::Relaxed) {
                    return Ok(());
                }
                match time::timeout(
                    SHUTDOWN_POLL_INTERVAL,
                    state.wait_for(|s| !s.is_connected()),
                )
                .await
                {
                    Ok(Ok(_)) => break,
                    // The session owns the sender, so this only happens on teardown.
                    Ok(Err(_)) => return Ok(()),
                    Err(_) => continue,
                }
            }

            if !running.load(Ordering::Relaxed) {
                break;
            }
            match self.config.on_disconnect {
                DisconnectPolicy::Reconnect => info!("{endpoint}: session lost; reconnecting"),
                DisconnectPolicy::Exit => {
                    return Err(SupervisorError::SessionLost {
                        endpoint: endpoint.clone(),
                    })
                }
            }
        }

        debug!("{endpoint}: supervisor stopping");
        Ok(())
    }

    /// Returns `Ok(true)` once connected, `Ok(false)` if shutdown was
    /// requested first.
    async fn connect_with_retry(&self, running: &AtomicBool) -> Result<bool, SupervisorError> {
        let endpoint = self.session.endpoint();
        let mut attempt: u32 = 0;

        while running.load(Ordering::Relaxed) {
            attempt = attempt.saturating_add(1);
            let err = match self.session.connect().await {
                Ok(()) => return Ok(true),
                Err(e) => e,
            };

            if let Some(max) = self.config.max_attempts {
                if attempt >= max {
                    return Err(SupervisorError::GaveUp {
                        endpoint: endpoint.clone(),
                        attempts: attempt,
                    });
                }
            }

            let delay = self.config.retry.delay_for(attempt);
            warn!("{endpoint}: attempt {attempt} failed ({err}); retrying in {delay:?}");
            if !sleep_while_running(delay, running).await {
                break;
            }
        }
        Ok(false)
    }
}

/// Sleeps for `duration` in slices, returning `false` early if `running` clears.
async fn sleep_while_running(duration: Duration, running: &AtomicBool) -> bool {
    let deadline = time::Instant::now() + duration;
    loop {
        if !running.load(Ordering::Relaxed) {
            return false;
        }
        let now = time::Instant::now();
        if now >= deadline {
            return true;
        }
        time::sleep((deadline - now).min(SHUTDOWN_POLL_INTERVAL)).await;
    }
}

/// Waits until `session` is connected, for at most `timeout`.
///
/// Used at startup so serial lines only open once their session is up.
///
/// # Errors
///
/// Returns [`SupervisorError::NotConnectedWithin`] if the deadline passes first.
pub async fn wait_connected(session: &Session, timeout: Duration) -> Result<(), SupervisorError> {
    let mut state = session.subscribe_state();
    let reached = matches!(
        time::timeout(timeout, state.wait_for(|s| *s == ConnectionState::Connected)).await,
        Ok(Ok(_))
    );
    if reached {
        Ok(())
    } else {
        Err(SupervisorError::NotConnectedWithin {
            endpoint: session.endpoint().clone(),
            timeout,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
