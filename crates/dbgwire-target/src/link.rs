//! Serve a [`DebugTarget`] over a TCP [`Link`].

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dbgwire_frame::DEFAULT_RING_CAPACITY;
use dbgwire_transport::{IoSink, Link};
use tracing::{debug, info};

use crate::dispatcher::DebugTarget;
use crate::error::{Result, TargetError};
use crate::memory::{Memory, RegisterResolver};

const READ_CHUNK_SIZE: usize = 256;
const MIN_READ_WAIT: Duration = Duration::from_millis(1);

/// Received bytes held for the tick interrupt. Reading pauses at this level
/// and the rest stays in the socket.
pub const MAX_RX_BACKLOG: usize = DEFAULT_RING_CAPACITY;

/// How a served target is clocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeConfig {
    /// Period of the simulated tick interrupt.
    pub tick: Duration,
    /// Received bytes the simulated interrupt may pull per tick.
    ///
    /// A real UART delivers one byte per interrupt; raising this lets an
    /// emulator keep up with bursts while keeping the same code path.
    pub bytes_per_tick: usize,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(1),
            bytes_per_tick: 1,
        }
    }
}

/// Drive `target` from `link` until the peer disconnects or `stop` is set.
///
/// Each tick pulls received bytes through [`DebugTarget::on_tick`], runs
/// `on_tick` so the caller can update device state, and then polls the
/// target with the link as its byte sink.
pub fn serve<M, R, F>(
    target: &mut DebugTarget<M, R>,
    link: Link,
    config: ServeConfig,
    stop: &AtomicBool,
    mut on_tick: F,
) -> Result<()>
where
    M: Memory,
    R: RegisterResolver,
    F: FnMut(&mut DebugTarget<M, R>),
{
    let peer = link.peer_addr().ok();
    link.set_read_timeout(Some(config.tick.max(MIN_READ_WAIT)))?;
    let mut rx_link = link.try_clone()?;
    let mut sink = IoSink::new(link);
    let mut rx = VecDeque::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut next_tick = Instant::now();

    info!(peer = ?peer, node_id = target.config().node_id, "serving debug target");

    while !stop.load(Ordering::Relaxed) {
        match fill_rx(&mut rx_link, &mut rx, &mut chunk) {
            Ok(_) => {}
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::UnexpectedEof
                        | ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                ) =>
            {
                debug!(peer = ?peer, "host disconnected");
                return Ok(());
            }
            Err(err) => return Err(TargetError::Io(err)),
        }

        for _ in 0..config.bytes_per_tick.max(1) {
            target.on_tick(&mut rx);
        }
        on_tick(target);
        target.poll(&mut sink);

        if let Some(err) = sink.take_error() {
            if matches!(
                err.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
            ) {
                debug!(peer = ?peer, "host disconnected");
                return Ok(());
            }
            return Err(TargetError::Io(err));
        }

        next_tick += config.tick;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }

    Ok(())
}

/// Read whatever the link has, up to [`MAX_RX_BACKLOG`] buffered bytes.
fn fill_rx(link: &mut Link, rx: &mut VecDeque<u8>, chunk: &mut [u8]) -> std::io::Result<usize> {
    let room = MAX_RX_BACKLOG.saturating_sub(rx.len()).min(chunk.len());
    if room == 0 {
        return Ok(0);
    }
    let n = link.read_available(&mut chunk[..room])?;
    rx.extend(&chunk[..n]);
    Ok(n)
}
