//! Serial line driver.
//!
//! Each configured line runs [`SerialLine::run`] on a dedicated OS thread:
//! the serial port API is blocking, and the framer's sink may block too
//! while the forwarding task is busy with the previous packet.
//!
//! Every non-empty read becomes one chunk for the line's
//! [`PacketFramer`].  A chunk larger than the framer's receive buffer is
//! rejected by the framer; the driver then also discards whatever is still
//! queued in the OS input buffer so the line resynchronises on fresh data.
//!
//! # Testability
//!
//! The [`ChunkSource`] trait lets tests feed scripted chunks through
//! [`mock::ScriptedChunkSource`] without a serial device.  Unit tests that
//! need to inject read errors use the `mockall`-generated `MockChunkSource`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use bridge_core::{FramingError, PacketFramer};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub mod mock;
pub mod port;

pub use port::SerialPortSource;

/// Bytes requested from the port per read.  Larger than the framer's chunk
/// capacity on purpose, so a backlog shows up as an overflow instead of
/// being silently split.
pub const DEFAULT_READ_BUFFER_BYTES: usize = 1024;

/// Error type for serial line operations.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("read from {port} failed: {source}")]
    Read {
        port: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to discard input on {port}: {source}")]
    Discard {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial source {0} is closed")]
    Closed(String),
}

/// A byte source delivering chunks as they arrive on the wire.
#[cfg_attr(test, mockall::automock)]
pub trait ChunkSource: Send {
    /// Human-readable port name used in log messages.
    fn name(&self) -> &str;

    /// Reads whatever is available into `buf`.  Returns `Ok(0)` when nothing
    /// arrived within the source's read timeout.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, SerialError>;

    /// Drops any bytes queued in the receive path.
    fn discard_input(&mut self) -> Result<(), SerialError>;
}

/// One serial line wired to its framer.
pub struct SerialLine<S: ChunkSource> {
    source: S,
    framer: Arc<PacketFramer>,
    read_buffer_bytes: usize,
}

impl<S: ChunkSource> SerialLine<S> {
    pub fn new(source: S, framer: Arc<PacketFramer>) -> Self {
        Self {
            source,
            framer,
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
        }
    }

    /// Overrides the per-read buffer size.
    pub fn with_read_buffer(mut self, bytes: usize) -> Self {
        self.read_buffer_bytes = bytes.max(1);
        self
    }

    /// Reads and frames until `running` is cleared or the source fails.
    ///
    /// # Errors
    ///
    /// Returns the [`SerialError`] that stopped the line.  Overflows are not
    /// errors; they are logged and the line keeps running.
    pub fn run(mut self, running: Arc<AtomicBool>) -> Result<(), SerialError> {
        let mut scratch = vec![0u8; self.read_buffer_bytes];
        info!(
            "{}: listening for line {}",
            self.source.name(),
            self.framer.name()
        );

        while running.load(Ordering::Relaxed) {
            let n = self.source.read_chunk(&mut scratch)?;
            if n == 0 {
                continue;
            }

            match self.framer.ingest(&scratch[..n]) {
                Ok(_) => {}
                Err(FramingError::ChunkTooLarge { len, capacity }) => {
                    warn!(
                        "{}: {len} byte chunk exceeds {capacity}; discarding input buffer",
                        self.source.name()
                    );
                    if let Err(e) = self.source.discard_input() {
                        warn!("{e}");
                    }
                }
                Err(e) => warn!("{}: {e}", self.source.name()),
            }
        }

        debug!("{}: line stopped", self.source.name());
        Ok(())
    }
}

impl<S: ChunkSource + 'static> SerialLine<S> {
    /// Runs the line on a named OS thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn(
        self,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<thread::JoinHandle<Result<(), SerialError>>> {
        thread::Builder::new()
            .name(format!("serial-{}", self.framer.name()))
            .spawn(move || {
                let result = self.run(running);
                if let Err(e) = &result {
                    error!("{e}");
                }
                result
            })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
