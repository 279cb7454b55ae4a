use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use tracing::warn;

use crate::error::Result;

/// Source of received bytes, polled one byte at a time.
///
/// On a target this is typically a UART data register read from the tick
/// interrupt. `None` means nothing is pending right now; it is not an error.
pub trait ByteSource {
    fn get_byte(&mut self) -> Option<u8>;
}

/// Sink for encoded frames.
///
/// Writes are fire-and-forget: the protocol has no delivery guarantee, so a
/// sink that cannot deliver simply drops the data.
pub trait ByteSink {
    fn write_data(&mut self, data: &[u8]);
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn get_byte(&mut self) -> Option<u8> {
        (**self).get_byte()
    }
}

impl<S: ByteSink + ?Sized> ByteSink for &mut S {
    fn write_data(&mut self, data: &[u8]) {
        (**self).write_data(data)
    }
}

impl ByteSource for VecDeque<u8> {
    fn get_byte(&mut self) -> Option<u8> {
        self.pop_front()
    }
}

impl ByteSink for Vec<u8> {
    fn write_data(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }
}

impl ByteSink for VecDeque<u8> {
    fn write_data(&mut self, data: &[u8]) {
        self.extend(data.iter().copied());
    }
}

/// Adapts any `std::io::Write` into a [`ByteSink`].
///
/// The first write failure is latched and every later write is skipped, so a
/// broken connection is reported once instead of once per frame.
#[derive(Debug)]
pub struct IoSink<W> {
    inner: W,
    error: Option<std::io::Error>,
}

impl<W: Write> IoSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, error: None }
    }

    /// The latched write error, if any. Clears the latch.
    pub fn take_error(&mut self) -> Option<std::io::Error> {
        self.error.take()
    }

    /// True once a write has failed and not been taken.
    pub fn is_broken(&self) -> bool {
        self.error.is_some()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ByteSink for IoSink<W> {
    fn write_data(&mut self, data: &[u8]) {
        if self.error.is_some() {
            return;
        }
        let result = self.inner.write_all(data).and_then(|()| self.inner.flush());
        if let Err(err) = result {
            warn!(error = %err, len = data.len(), "byte sink write failed; dropping output");
            self.error = Some(err);
        }
    }
}

/// A connected, bidirectional byte link (TCP).
pub struct Link {
    stream: TcpStream,
}

impl Link {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.stream.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Switch the link between blocking and non-blocking reads.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.stream.set_nonblocking(nonblocking).map_err(Into::into)
    }

    /// Try to clone this link (creates a new socket handle).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self::from_tcp(self.stream.try_clone()?))
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream.peer_addr().map_err(Into::into)
    }

    /// Close both directions of the link.
    pub fn shutdown(&self) -> Result<()> {
        self.stream.shutdown(Shutdown::Both).map_err(Into::into)
    }

    /// Non-blocking poll for whatever bytes are already available.
    ///
    /// Returns `Ok(0)` when nothing is pending. End of stream is reported as
    /// `ErrorKind::UnexpectedEof`.
    pub fn read_available(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(std::io::Error::from(ErrorKind::UnexpectedEof)),
            Ok(n) => Ok(n),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }
}

impl Read for Link {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Link {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("type", &"tcp")
            .field("peer", &self.stream.peer_addr().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vecdeque_source_yields_in_order() {
        let mut source: VecDeque<u8> = [1u8, 2, 3].into_iter().collect();
        assert_eq!(source.get_byte(), Some(1));
        assert_eq!(source.get_byte(), Some(2));
        assert_eq!(source.get_byte(), Some(3));
        assert_eq!(source.get_byte(), None);
    }

    #[test]
    fn vec_sink_appends() {
        let mut sink = Vec::new();
        sink.write_data(&[0x55, 0x01]);
        sink.write_data(&[0xAA]);
        assert_eq!(sink, vec![0x55, 0x01, 0xAA]);
    }

    #[test]
    fn io_sink_latches_first_error() {
        struct Failing {
            attempts: usize,
        }

        impl Write for Failing {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                self.attempts += 1;
                Err(std::io::Error::from(ErrorKind::BrokenPipe))
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut sink = IoSink::new(Failing { attempts: 0 });
        sink.write_data(b"one");
        sink.write_data(b"two");

        assert!(sink.is_broken());
        assert_eq!(sink.get_ref().attempts, 1);
        let err = sink.take_error().unwrap();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
        assert!(!sink.is_broken());
    }

    #[test]
    fn io_sink_forwards_bytes() {
        let mut sink = IoSink::new(Vec::new());
        sink.write_data(&[1, 2]);
        sink.write_data(&[3]);
        assert_eq!(sink.into_inner(), vec![1, 2, 3]);
    }
}
