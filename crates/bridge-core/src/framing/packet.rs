//! Completed packets and their on-the-wire encodings.
//!
//! # Wire formats
//!
//! ```text
//! NulTerminated:   [data:N][0x00]
//! LengthPrefixed:  [len:2 big-endian][data:N]
//! ```
//!
//! `NulTerminated` is the format the remote head controller has always
//! consumed and stays the default.  It is ambiguous: NMEA sentences may carry
//! NUL bytes for "no data", and a receiver splitting on 0x00 will cut such a
//! packet short.  [`Packet::contains_terminator_byte`] flags those packets so
//! the collision is visible in the logs.  Lines whose consumer can parse it
//! should use `LengthPrefixed`, which never depends on the payload content.

use serde::{Deserialize, Serialize};

use super::TERMINATOR;

/// Why the framer emitted a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// The delimiter byte was seen; the packet ends with it.
    Delimiter,
    /// The packet buffer filled up before any delimiter arrived.
    Forced,
}

/// Encoding applied to a packet before it is written to a TCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireFormat {
    /// Data followed by a single 0x00 terminator byte.
    #[default]
    NulTerminated,
    /// Two-byte big-endian length followed by the data.
    LengthPrefixed,
}

/// One completed packet, owned by whoever received it from the framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
    reason: FlushReason,
    sequence: u64,
}

impl Packet {
    pub(crate) fn new(data: Vec<u8>, reason: FlushReason, sequence: u64) -> Self {
        Self {
            data,
            reason,
            sequence,
        }
    }

    /// The bytes accumulated since the previous emit, without any terminator.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn reason(&self) -> FlushReason {
        self.reason
    }

    /// Per-line emit counter, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns `true` when a data byte equals the NUL terminator, i.e. the
    /// packet cannot be delimited unambiguously in [`WireFormat::NulTerminated`].
    pub fn contains_terminator_byte(&self) -> bool {
        self.data.contains(&TERMINATOR)
    }

    /// Encodes the packet for transmission.
    pub fn to_wire(&self, format: WireFormat) -> Vec<u8> {
        match format {
            WireFormat::NulTerminated => {
                let mut buf = Vec::with_capacity(self.data.len() + 1);
                buf.extend_from_slice(&self.data);
                buf.push(TERMINATOR);
                buf
            }
            WireFormat::LengthPrefixed => {
                // FramerConfig caps the packet capacity so the length fits in u16.
                let len = self.data.len() as u16;
                let mut buf = Vec::with_capacity(self.data.len() + 2);
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(&self.data);
                buf
            }
        }
    }
}
