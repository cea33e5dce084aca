//! The per-line packet framer.
//!
//! A [`PacketFramer`] owns two fixed-size buffers for one serial line:
//!
//! - the **receive buffer** (capacity C₁) holding the chunk most recently
//!   delivered by the serial driver, and
//! - the **prepared-packet buffer** (capacity C₂) holding the packet being
//!   assembled, plus the write offset `o` of its next free slot.
//!
//! Both live behind one mutex, so "copy chunk in → run framing → emit" is a
//! single critical section per line.  Completed packets are copied out while
//! the lock is still held and handed to the registered [`PacketSink`] as an
//! owned [`Packet`]; the consumer never sees the live buffer.
//!
//! # Framing rules (per byte, in arrival order)
//!
//! 1. Write the byte at `o` and advance `o`.
//! 2. If the byte is the delimiter, append the terminator at `o`, emit
//!    `[0, o)` as a [`FlushReason::Delimiter`] packet and reset `o := 0`.
//! 3. Otherwise, if `o` reached the last slot (C₂ − 1), append the
//!    terminator there, emit a [`FlushReason::Forced`] packet and reset.
//!
//! The forced flush fires as soon as the last data slot is filled, so a
//! stream without delimiters yields one packet per C₂ − 1 bytes and the
//! final byte of each packet is never held back waiting for a successor.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::packet::{FlushReason, Packet};
use super::{DEFAULT_DELIMITER, DEFAULT_MAX_CHUNK_BYTES, DEFAULT_PACKET_CAPACITY, TERMINATOR};

/// Largest packet buffer whose data length still fits the 2-byte length prefix.
const MAX_PACKET_CAPACITY: usize = u16::MAX as usize + 1;

/// Errors reported by the framer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The chunk is larger than the receive buffer and was discarded whole.
    #[error("chunk of {len} bytes exceeds receive buffer capacity of {capacity}")]
    ChunkTooLarge { len: usize, capacity: usize },

    /// The framer configuration is unusable.
    #[error("invalid framer configuration: {0}")]
    InvalidConfig(String),
}

/// Consumer of completed packets.
///
/// Registered once when the framer is built.  `packet_ready` runs on the
/// thread that called [`PacketFramer::ingest`], inside the line's critical
/// section, so implementations that block (e.g. a one-slot channel) apply
/// backpressure to the serial reader.
#[cfg_attr(test, mockall::automock)]
pub trait PacketSink: Send + Sync {
    fn packet_ready(&self, packet: Packet);
}

/// Buffer sizes and delimiter for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramerConfig {
    /// Prepared-packet buffer size C₂, including the terminator slot.
    #[serde(default = "default_packet_capacity")]
    pub packet_capacity: usize,
    /// Receive buffer size C₁: the largest chunk accepted by `ingest`.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
    /// Byte value that ends a packet early.
    #[serde(default = "default_delimiter")]
    pub delimiter: u8,
}

fn default_packet_capacity() -> usize {
    DEFAULT_PACKET_CAPACITY
}
fn default_max_chunk_bytes() -> usize {
    DEFAULT_MAX_CHUNK_BYTES
}
fn default_delimiter() -> u8 {
    DEFAULT_DELIMITER
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            packet_capacity: default_packet_capacity(),
            max_chunk_bytes: default_max_chunk_bytes(),
            delimiter: default_delimiter(),
        }
    }
}

impl FramerConfig {
    /// Checks the buffer sizes.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::InvalidConfig`] if the packet buffer cannot
    /// hold at least one data byte plus the terminator, exceeds what the
    /// length prefix can describe, or the chunk capacity is zero.
    pub fn validate(&self) -> Result<(), FramingError> {
        if self.packet_capacity < 2 {
            return Err(FramingError::InvalidConfig(format!(
                "packet_capacity must be at least 2, got {}",
                self.packet_capacity
            )));
        }
        if self.packet_capacity > MAX_PACKET_CAPACITY {
            return Err(FramingError::InvalidConfig(format!(
                "packet_capacity must be at most {MAX_PACKET_CAPACITY}, got {}",
                self.packet_capacity
            )));
        }
        if self.max_chunk_bytes == 0 {
            return Err(FramingError::InvalidConfig(
                "max_chunk_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Data bytes per packet (C₂ − 1).
    pub fn max_packet_len(&self) -> usize {
        self.packet_capacity - 1
    }
}

/// Counters for one line, readable at any time via [`PacketFramer::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub chunks_ingested: u64,
    pub bytes_ingested: u64,
    pub delimited_packets: u64,
    pub forced_packets: u64,
    pub overflows: u64,
    /// Packets whose data contains the NUL terminator value.
    pub ambiguous_packets: u64,
}

struct FramerState {
    receive: Box<[u8]>,
    prepared: Box<[u8]>,
    offset: usize,
    next_sequence: u64,
    stats: FramerStats,
}

/// Segments one serial line's byte stream into packets.
pub struct PacketFramer {
    name: String,
    config: FramerConfig,
    state: Mutex<FramerState>,
    sink: Box<dyn PacketSink>,
}

impl PacketFramer {
    /// Creates a framer for the line called `name`, emitting into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        name: impl Into<String>,
        config: FramerConfig,
        sink: Box<dyn PacketSink>,
    ) -> Result<Self, FramingError> {
        config.validate()?;
        let state = FramerState {
            receive: vec![0u8; config.max_chunk_bytes].into_boxed_slice(),
            prepared: vec![0u8; config.packet_capacity].into_boxed_slice(),
            offset: 0,
            next_sequence: 0,
            stats: FramerStats::default(),
        };
        Ok(Self {
            name: name.into(),
            config,
            state: Mutex::new(state),
            sink,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &FramerConfig {
        &self.config
    }

    /// Ingests one chunk from the transport driver and returns the number of
    /// packets it completed.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::ChunkTooLarge`] when `chunk` is longer than
    /// the receive buffer.  The chunk is dropped whole and the packet being
    /// assembled is left untouched.
    pub fn ingest(&self, chunk: &[u8]) -> Result<usize, FramingError> {
        let mut guard = self.lock();

        if chunk.len() > self.config.max_chunk_bytes {
            guard.stats.overflows += 1;
            warn!(
                "{}: receive overflow, dropped {} byte chunk (capacity {})",
                self.name,
                chunk.len(),
                self.config.max_chunk_bytes
            );
            return Err(FramingError::ChunkTooLarge {
                len: chunk.len(),
                capacity: self.config.max_chunk_bytes,
            });
        }
        if chunk.is_empty() {
            return Ok(0);
        }

        guard.stats.chunks_ingested += 1;
        guard.stats.bytes_ingested += chunk.len() as u64;

        let len = chunk.len();
        let last_slot = self.config.max_packet_len();
        let delimiter = self.config.delimiter;
        let mut emitted = 0;

        let FramerState {
            receive,
            prepared,
            offset,
            next_sequence,
            stats,
        } = &mut *guard;

        receive[..len].copy_from_slice(chunk);

        for &byte in receive[..len].iter() {
            prepared[*offset] = byte;
            *offset += 1;

            let reason = if byte == delimiter {
                FlushReason::Delimiter
            } else if *offset == last_slot {
                FlushReason::Forced
            } else {
                continue;
            };

            prepared[*offset] = TERMINATOR;
            let packet = Packet::new(prepared[..*offset].to_vec(), reason, *next_sequence);
            *next_sequence += 1;
            *offset = 0;

            match reason {
                FlushReason::Delimiter => stats.delimited_packets += 1,
                FlushReason::Forced => stats.forced_packets += 1,
            }
            if packet.contains_terminator_byte() {
                stats.ambiguous_packets += 1;
                warn!(
                    "{}: packet #{} carries a NUL data byte; NUL-terminated receivers will truncate it",
                    self.name,
                    packet.sequence()
                );
            }
            debug!(
                "{}: packet #{} ready ({} bytes, {:?})",
                self.name,
                packet.sequence(),
                packet.len(),
                reason
            );

            self.sink.packet_ready(packet);
            emitted += 1;
        }

        Ok(emitted)
    }

    /// Discards the partially assembled packet.
    pub fn reset(&self) {
        let mut guard = self.lock();
        if guard.offset > 0 {
            debug!("{}: discarding {} pending bytes", self.name, guard.offset);
        }
        guard.offset = 0;
    }

    /// Number of data bytes waiting for a delimiter or a full buffer.
    pub fn pending_len(&self) -> usize {
        self.lock().offset
    }

    pub fn stats(&self) -> FramerStats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FramerState> {
        // A panicking sink must not wedge the line; the buffers stay consistent
        // because the offset is reset before the sink runs.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::function;
    use std::sync::Arc;

    /// Sink that records every packet it receives.
    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<Packet>>>);

    impl PacketSink for Collect {
        fn packet_ready(&self, packet: Packet) {
            self.0.lock().unwrap().push(packet);
        }
    }

    impl Collect {
        fn take(&self) -> Vec<Packet> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn framer_with(config: FramerConfig) -> (PacketFramer, Collect) {
        let sink = Collect::default();
        let framer = PacketFramer::new("test", config, Box::new(sink.clone())).unwrap();
        (framer, sink)
    }

    fn framer() -> (PacketFramer, Collect) {
        framer_with(FramerConfig::default())
    }

    #[test]
    fn test_delimiter_emits_packet_and_resets_offset() {
        // Arrange
        let (framer, sink) = framer();

        // Act
        let emitted = framer.ingest(b"GPRMC\n").unwrap();

        // Assert
        assert_eq!(emitted, 1);
        let packets = sink.take();
        assert_eq!(packets[0].data(), b"GPRMC\n");
        assert_eq!(packets[0].reason(), FlushReason::Delimiter);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_partial_line_is_held_until_delimiter() {
        let (framer, sink) = framer();
        assert_eq!(framer.ingest(b"$HCHDG,").unwrap(), 0);
        assert_eq!(framer.pending_len(), 7);
        assert_eq!(framer.ingest(b"12.5\n").unwrap(), 1);
        assert_eq!(sink.take()[0].data(), b"$HCHDG,12.5\n");
    }

    #[test]
    fn test_multiple_delimiters_in_one_chunk_emit_in_order() {
        let (framer, sink) = framer();
        framer.ingest(b"A\nBB\nCCC").unwrap();
        let packets = sink.take();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].data(), b"A\n");
        assert_eq!(packets[1].data(), b"BB\n");
        assert_eq!(packets[0].sequence(), 0);
        assert_eq!(packets[1].sequence(), 1);
        assert_eq!(framer.pending_len(), 3);
    }

    #[test]
    fn test_forced_flush_after_capacity_minus_one_bytes() {
        // Arrange: tiny buffer so the forced path is easy to reach
        let (framer, sink) = framer_with(FramerConfig {
            packet_capacity: 4,
            max_chunk_bytes: 16,
            delimiter: b'\n',
        });

        // Act
        framer.ingest(b"abcdefg").unwrap();

        // Assert: two forced packets of 3 bytes, one byte pending
        let packets = sink.take();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].data(), b"abc");
        assert_eq!(packets[1].data(), b"def");
        assert!(packets.iter().all(|p| p.reason() == FlushReason::Forced));
        assert_eq!(framer.pending_len(), 1);
    }

    #[test]
    fn test_delimiter_in_last_slot_counts_as_delimiter_flush() {
        let (framer, sink) = framer_with(FramerConfig {
            packet_capacity: 4,
            max_chunk_bytes: 16,
            delimiter: b'\n',
        });
        framer.ingest(b"ab\n").unwrap();
        let packets = sink.take();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].reason(), FlushReason::Delimiter);
        assert_eq!(packets[0].data(), b"ab\n");
    }

    #[test]
    fn test_oversized_chunk_is_rejected_without_touching_pending_packet() {
        // Arrange
        let (framer, sink) = framer();
        framer.ingest(b"$GPGGA").unwrap();
        let big = vec![b'x'; DEFAULT_MAX_CHUNK_BYTES + 1];

        // Act
        let result = framer.ingest(&big);

        // Assert
        assert_eq!(
            result,
            Err(FramingError::ChunkTooLarge {
                len: DEFAULT_MAX_CHUNK_BYTES + 1,
                capacity: DEFAULT_MAX_CHUNK_BYTES
            })
        );
        assert_eq!(framer.pending_len(), 6);
        assert!(sink.take().is_empty());
        assert_eq!(framer.stats().overflows, 1);

        framer.ingest(b"\n").unwrap();
        assert_eq!(sink.take()[0].data(), b"$GPGGA\n");
    }

    #[test]
    fn test_chunk_of_exactly_capacity_is_accepted() {
        let (framer, _sink) = framer();
        let chunk = vec![b'y'; DEFAULT_MAX_CHUNK_BYTES];
        assert!(framer.ingest(&chunk).is_ok());
    }

    #[test]
    fn test_empty_chunk_is_a_no_op() {
        let (framer, sink) = framer();
        assert_eq!(framer.ingest(b"").unwrap(), 0);
        assert!(sink.take().is_empty());
        assert_eq!(framer.stats().chunks_ingested, 0);
    }

    #[test]
    fn test_custom_delimiter() {
        let (framer, sink) = framer_with(FramerConfig {
            delimiter: b'*',
            ..FramerConfig::default()
        });
        framer.ingest(b"abc\ndef*").unwrap();
        assert_eq!(sink.take()[0].data(), b"abc\ndef*");
    }

    #[test]
    fn test_nul_data_byte_is_counted_as_ambiguous() {
        let (framer, sink) = framer();
        framer.ingest(b"$GPGSV,\0\n").unwrap();
        assert!(sink.take()[0].contains_terminator_byte());
        assert_eq!(framer.stats().ambiguous_packets, 1);
    }

    #[test]
    fn test_reset_discards_pending_bytes() {
        let (framer, sink) = framer();
        framer.ingest(b"stale").unwrap();
        framer.reset();
        framer.ingest(b"ok\n").unwrap();
        assert_eq!(sink.take()[0].data(), b"ok\n");
    }

    #[test]
    fn test_stats_track_packets_by_reason() {
        let (framer, _sink) = framer_with(FramerConfig {
            packet_capacity: 3,
            max_chunk_bytes: 16,
            delimiter: b'\n',
        });
        framer.ingest(b"a\nbcd").unwrap();
        let stats = framer.stats();
        assert_eq!(stats.delimited_packets, 1);
        assert_eq!(stats.forced_packets, 1);
        assert_eq!(stats.chunks_ingested, 1);
        assert_eq!(stats.bytes_ingested, 5);
    }

    #[test]
    fn test_sink_is_called_once_per_packet() {
        // Arrange
        let mut sink = MockPacketSink::new();
        sink.expect_packet_ready()
            .with(function(|p: &Packet| p.data() == b"$GPVTG\n"))
            .times(1)
            .return_const(());
        let framer = PacketFramer::new("mock", FramerConfig::default(), Box::new(sink)).unwrap();

        // Act / Assert (expectations are verified on drop)
        framer.ingest(b"$GPVTG\n").unwrap();
    }

    #[test]
    fn test_sink_is_not_called_without_a_complete_packet() {
        let mut sink = MockPacketSink::new();
        sink.expect_packet_ready().never();
        let framer = PacketFramer::new("mock", FramerConfig::default(), Box::new(sink)).unwrap();
        framer.ingest(b"no newline yet").unwrap();
    }

    #[test]
    fn test_config_rejects_packet_capacity_below_two() {
        let cfg = FramerConfig {
            packet_capacity: 1,
            ..FramerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(FramingError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_zero_chunk_capacity() {
        let cfg = FramerConfig {
            max_chunk_bytes: 0,
            ..FramerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_rejects_capacity_beyond_length_prefix() {
        let cfg = FramerConfig {
            packet_capacity: MAX_PACKET_CAPACITY + 1,
            ..FramerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_defaults_match_device_constants() {
        let cfg = FramerConfig::default();
        assert_eq!(cfg.packet_capacity, 256);
        assert_eq!(cfg.max_chunk_bytes, 256);
        assert_eq!(cfg.delimiter, b'\n');
        assert_eq!(cfg.max_packet_len(), 255);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let cfg = FramerConfig {
            packet_capacity: 0,
            ..FramerConfig::default()
        };
        assert!(PacketFramer::new("bad", cfg, Box::new(Collect::default())).is_err());
    }
}
