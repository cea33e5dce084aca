//! The bridge: framer output → TCP session, and session input → log.
//!
//! Each serial line gets a [`ChannelSink`] registered with its framer and a
//! [`forward_packets`] task that owns the receiving end.  The channel holds
//! a single packet by default, so the serial thread blocks inside
//! `packet_ready` until the forwarder has taken the previous packet.  That
//! is the only backpressure in the pipeline: packets are never queued for a
//! session that is down; they are dropped and counted.
//!
//! Inbound bytes from the remote host are not re-framed or forwarded;
//! [`log_inbound`] drains a session's event channel and logs them.

use bridge_core::{Packet, PacketSink, WireFormat};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::infrastructure::session::{Session, SessionError, SessionEvent};

/// Packets buffered between a line's framer and its forwarder.
pub const DEFAULT_HANDOFF_CAPACITY: usize = 1;

/// [`PacketSink`] that hands packets to an async forwarder.
///
/// `packet_ready` uses `blocking_send`, so the framer feeding this sink
/// must run on a plain OS thread (the serial line thread), never on a
/// tokio worker.
pub struct ChannelSink {
    line: String,
    tx: mpsc::Sender<Packet>,
}

impl ChannelSink {
    /// Creates a single-slot sink and the receiver for its forwarder.
    pub fn new(line: impl Into<String>) -> (Self, mpsc::Receiver<Packet>) {
        Self::with_capacity(line, DEFAULT_HANDOFF_CAPACITY)
    }

    pub fn with_capacity(
        line: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                line: line.into(),
                tx,
            },
            rx,
        )
    }
}

impl PacketSink for ChannelSink {
    fn packet_ready(&self, packet: Packet) {
        let sequence = packet.sequence();
        if self.tx.blocking_send(packet).is_err() {
            debug!("{}: forwarder stopped; packet #{sequence} dropped", self.line);
        }
    }
}

/// Per-line forwarding counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub forwarded: u64,
    /// Packets dropped because the session was not connected.
    pub dropped_disconnected: u64,
    pub send_failures: u64,
}

/// Sends every packet from `packets` to `session` until the channel closes.
///
/// The channel closes when the line's framer (and with it the sink) is
/// dropped, i.e. after the serial thread exits.
pub async fn forward_packets(
    line: String,
    mut packets: mpsc::Receiver<Packet>,
    session: Session,
    format: WireFormat,
) -> ForwardStats {
    let mut stats = ForwardStats::default();
    let endpoint = session.endpoint().clone();

    while let Some(packet) = packets.recv().await {
        let wire = packet.to_wire(format);
        match session.send(&wire).await {
            Ok(()) => {
                stats.forwarded += 1;
                debug!(
                    "{line} → {endpoint}: packet #{} ({} bytes on the wire)",
                    packet.sequence(),
                    wire.len()
                );
            }
            Err(SessionError::NotConnected(state)) => {
                stats.dropped_disconnected += 1;
                debug!(
                    "{line}: {endpoint} is {state}; dropped packet #{}",
                    packet.sequence()
                );
            }
            Err(e) => {
                stats.send_failures += 1;
                error!("{line}: packet #{} not sent: {e}", packet.sequence());
            }
        }
    }

    info!(
        "{line}: forwarder finished ({} forwarded, {} dropped while disconnected, {} failed)",
        stats.forwarded, stats.dropped_disconnected, stats.send_failures
    );
    stats
}

/// Per-session inbound counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundStats {
    pub bytes_received: u64,
    pub overflow_bytes: u64,
    pub connects: u64,
    pub disconnects: u64,
}

/// Drains a session's event channel into the log until the session is dropped.
pub async fn log_inbound(name: String, mut events: mpsc::Receiver<SessionEvent>) -> InboundStats {
    let mut stats = InboundStats::default();

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Connected => {
                stats.connects += 1;
                info!("{name}: session up");
            }
            SessionEvent::Disconnected(reason) => {
                stats.disconnects += 1;
                warn!("{name}: session down ({reason})");
            }
            SessionEvent::DataReceived(bytes) => {
                stats.bytes_received += bytes.len() as u64;
                debug!("{name}: received {:?}", String::from_utf8_lossy(&bytes));
            }
            SessionEvent::ReceiveOverflow { received, dropped } => {
                stats.overflow_bytes += dropped as u64;
                warn!("{name}: inbound read of {received} bytes overflowed, {dropped} dropped");
            }
        }
    }

    stats
}

// ── Tests ─────────────────────────────────────────────────────────────────────
