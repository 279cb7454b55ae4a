use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use dbgwire_transport::Link;
use tracing::warn;

use crate::assembler::DefaultRingBuffer;
use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};
use crate::message::Message;

const READ_CHUNK_SIZE: usize = 512;

/// Reads complete messages from any `Read` stream.
///
/// Bytes are pushed through the same ring-buffer assembler the target uses, so
/// garbage, truncated and corrupt frames are skipped. Callers only ever see
/// valid messages.
pub struct FrameReader<T> {
    inner: T,
    ring: Box<DefaultRingBuffer>,
    ready: VecDeque<Message>,
    config: FrameConfig,
    dropped_bytes: u64,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            ring: Box::default(),
            ready: VecDeque::new(),
            config,
            dropped_bytes: 0,
        }
    }

    /// Read the next valid message (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached. A read
    /// timeout on the underlying stream surfaces as `FrameError::Io` with kind
    /// `WouldBlock` or `TimedOut`; bytes received so far are kept.
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(msg) = self.ready.pop_front() {
                return Ok(msg);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.feed(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> FrameReader<T> {
    /// Push raw bytes received out of band and assemble any complete messages.
    pub fn feed(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while !rest.is_empty() {
            let accepted = self.ring.push(rest);
            rest = &rest[accepted..];
            self.drain();
            if accepted == 0 {
                break;
            }
        }

        if !rest.is_empty() {
            self.dropped_bytes += rest.len() as u64;
            warn!(dropped = rest.len(), "assembler overrun; dropping input");
        }
        self.ring.take_overrun();
    }

    /// Messages assembled but not yet returned.
    pub fn buffered(&self) -> usize {
        self.ready.len()
    }

    /// Total bytes dropped because the assembler was full.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn drain(&mut self) {
        while let Some(msg) = self.ring.try_decode_next() {
            self.ready.push_back(msg);
        }
    }
}

impl FrameReader<Link> {
    /// Create a frame reader for a TCP [`Link`] and apply the read timeout from config.
    pub fn with_config_link(inner: Link, config: FrameConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
