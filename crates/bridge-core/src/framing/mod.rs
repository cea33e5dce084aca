//! Packet framing: segmenting a raw serial byte stream into packets.

pub mod framer;
pub mod packet;

/// Packet buffer size: 255 data bytes plus one terminator slot.
pub const DEFAULT_PACKET_CAPACITY: usize = 256;

/// Largest chunk a transport driver may hand to the framer at once.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 256;

/// Byte that triggers an immediate packet emission.
pub const DEFAULT_DELIMITER: u8 = b'\n';

/// Byte appended after the data of every NUL-terminated packet.
pub const TERMINATOR: u8 = 0x00;

pub use framer::{FramerConfig, FramerStats, FramingError, PacketFramer, PacketSink};
pub use packet::{FlushReason, Packet, WireFormat};
