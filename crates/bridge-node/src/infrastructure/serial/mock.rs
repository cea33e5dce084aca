//! Scripted chunk source for unit testing.
//!
//! Replays a fixed list of chunks, as if each had arrived in one read, and
//! then reports the source as closed so the line's run loop ends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{ChunkSource, SerialError};

/// A [`ChunkSource`] that replays scripted chunks.
pub struct ScriptedChunkSource {
    name: String,
    pending: VecDeque<u8>,
    chunks: VecDeque<Vec<u8>>,
    discards: Arc<AtomicUsize>,
}

impl ScriptedChunkSource {
    pub fn new(name: impl Into<String>, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            pending: VecDeque::new(),
            chunks: chunks.into(),
            discards: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter incremented on every [`ChunkSource::discard_input`] call.
    pub fn discard_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.discards)
    }
}

impl ChunkSource for ScriptedChunkSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        if self.pending.is_empty() {
            match self.chunks.pop_front() {
                Some(chunk) => self.pending.extend(chunk),
                None => return Err(SerialError::Closed(self.name.clone())),
            }
        }
        let n = self.pending.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn discard_input(&mut self) -> Result<(), SerialError> {
        self.pending.clear();
        self.discards.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_replays_chunks_then_closes() {
        let mut src = ScriptedChunkSource::new("m", vec![b"ab".to_vec(), b"c".to_vec()]);
        let mut buf = [0u8; 8];
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 1);
        assert!(matches!(src.read_chunk(&mut buf), Err(SerialError::Closed(_))));
    }

    #[test]
    fn test_mock_splits_chunk_larger_than_buffer() {
        let mut src = ScriptedChunkSource::new("m", vec![b"abcdef".to_vec()]);
        let mut buf = [0u8; 4];
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 4);
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn test_discard_drops_remaining_bytes_of_current_chunk() {
        let mut src = ScriptedChunkSource::new("m", vec![b"abcdef".to_vec(), b"g".to_vec()]);
        let mut buf = [0u8; 4];
        src.read_chunk(&mut buf).unwrap();
        src.discard_input().unwrap();
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'g');
        assert_eq!(src.discard_counter().load(Ordering::Relaxed), 1);
    }
}
