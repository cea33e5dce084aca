//! Periodic uptime line sent to one session.
//!
//! Lets the head controller tell a quiet bridge (no sensor traffic) from a
//! dead one.  Each tick sends `UP <seconds>s\n` if the target session is
//! connected and skips the tick otherwise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::infrastructure::session::Session;

/// Encodes the heartbeat line for `uptime`.
pub fn heartbeat_line(uptime: Duration) -> Vec<u8> {
    format!("UP {}s\n", uptime.as_secs()).into_bytes()
}

/// Sends a heartbeat every `interval` until `running` clears.  Returns the
/// number of heartbeats sent.
pub async fn run_heartbeat(
    session: Session,
    interval: Duration,
    started: Instant,
    running: Arc<AtomicBool>,
) -> u64 {
    let mut ticker = time::interval_at(started + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sent = 0;

    info!("heartbeat to {} every {interval:?}", session.endpoint());
    loop {
        ticker.tick().await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
        if !session.state().is_connected() {
            continue;
        }
        match session.send(&heartbeat_line(started.elapsed())).await {
            Ok(()) => sent += 1,
            Err(e) => debug!("{}: heartbeat skipped: {e}", session.endpoint()),
        }
    }
    sent
}

// ── Tests ─────────────────────────────────────────────────────────────────────
