use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use dbgwire_frame::{
    FrameConfig, FrameError, FrameReader, FrameWriter, RegisterSpec, TracingRequest, UpdateMode,
    QUERY_VALUE_LEN,
};
use dbgwire_transport::{Link, TcpEndpoint};
use tracing::debug;

use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::events::HostEvent;
use crate::mirror::HostMirror;

/// Read timeout used by [`HostSession::connect`], bounding one poll.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Blocking driver that connects a [`HostMirror`] to a byte stream.
///
/// Every poll flushes the mirror's outbox and reads at most one message.
/// Requests that expect an ack wait for it with a deadline; nothing is
/// retried.
pub struct HostSession<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    mirror: HostMirror,
}

impl HostSession<Link, Link> {
    /// Connect to a target listening on `addr`.
    pub fn connect(addr: &str, connect_timeout: Duration, config: HostConfig) -> Result<Self> {
        let link = TcpEndpoint::connect_timeout(addr, connect_timeout)?;
        let reader_link = link.try_clone()?;

        let frame_config = FrameConfig {
            read_timeout: Some(POLL_INTERVAL),
            write_timeout: Some(connect_timeout),
        };
        let reader = FrameReader::with_config_link(reader_link, frame_config.clone())?;
        let writer = FrameWriter::with_config_link(link, frame_config)?;
        Ok(Self::new(reader, writer, config))
    }
}

impl<R: Read, W: Write> HostSession<R, W> {
    pub fn new(reader: FrameReader<R>, writer: FrameWriter<W>, config: HostConfig) -> Self {
        Self {
            reader,
            writer,
            mirror: HostMirror::new(config),
        }
    }

    pub fn mirror(&self) -> &HostMirror {
        &self.mirror
    }

    pub fn mirror_mut(&mut self) -> &mut HostMirror {
        &mut self.mirror
    }

    /// Write every queued message. Returns how many were sent.
    pub fn flush(&mut self) -> Result<usize> {
        let mut sent = 0;
        while let Some(msg) = self.mirror.pop_outgoing() {
            self.writer.write_message(&msg)?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Flush, then read and handle at most one message.
    ///
    /// Returns `Ok(None)` when the read timed out.
    pub fn poll(&mut self) -> Result<Option<HostEvent>> {
        self.flush()?;
        self.mirror.advance();

        match self.reader.read_message() {
            Ok(msg) => Ok(Some(self.mirror.handle(&msg))),
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(FrameError::ConnectionClosed) => Err(HostError::Disconnected(
                "connection closed by target".to_string(),
            )),
            Err(err) => Err(HostError::Frame(err)),
        }
    }

    /// Poll until `select` picks a value out of an event, or `timeout` passes.
    pub fn wait_for<T, F>(&mut self, timeout: Duration, mut select: F) -> Result<T>
    where
        F: FnMut(&HostEvent) -> Option<T>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(HostError::Timeout(timeout));
            }
            if let Some(event) = self.poll()? {
                if let Some(found) = select(&event) {
                    return Ok(found);
                }
            }
        }
    }

    /// [`Self::wait_for`] the reply to request `msg_id`. On timeout the
    /// request is dropped from the mirror's pending list.
    fn wait_reply<T, F>(&mut self, node: u8, msg_id: u8, timeout: Duration, select: F) -> Result<T>
    where
        F: FnMut(&HostEvent) -> Option<T>,
    {
        let result = self.wait_for(timeout, select);
        if matches!(result, Err(HostError::Timeout(_))) && self.mirror.cancel(node, msg_id).is_some()
        {
            debug!(node_id = node, msg_id, "reply timed out");
        }
        result
    }

    /// Poll for `duration` and return every event seen.
    pub fn collect_for(&mut self, duration: Duration) -> Result<Vec<HostEvent>> {
        let deadline = Instant::now() + duration;
        let mut events = Vec::new();
        while Instant::now() < deadline {
            if let Some(event) = self.poll()? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Broadcast a scan and listen for `listen`. Returns the ids of nodes
    /// that answered.
    pub fn scan(&mut self, listen: Duration) -> Result<Vec<u8>> {
        self.mirror.scan();
        let mut found = Vec::new();
        for event in self.collect_for(listen)? {
            if let HostEvent::NodeDiscovered { node, .. } = event {
                if !found.contains(&node) {
                    found.push(node);
                }
            }
        }
        debug!(nodes = found.len(), "scan finished");
        Ok(found)
    }

    /// Read a register. Values shorter than 4 bytes come back zero-filled.
    pub fn query_register(
        &mut self,
        node: u8,
        spec: RegisterSpec,
        timeout: Duration,
    ) -> Result<[u8; QUERY_VALUE_LEN]> {
        let msg_id = self.mirror.query_register(node, spec)?;
        self.wait_reply(node, msg_id, timeout, |event| match event {
            HostEvent::RegisterValue {
                node: from,
                msg_id: id,
                value,
                ..
            } if *from == node && *id == msg_id => Some(*value),
            _ => None,
        })
    }

    /// Write a register and wait for the ack when one is expected.
    pub fn write_register(
        &mut self,
        node: u8,
        spec: RegisterSpec,
        value: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let msg_id = self.mirror.write_register(node, spec, value)?;
        self.await_ack(node, msg_id, timeout, |event| {
            matches!(event, HostEvent::WriteAck { .. })
        })
    }

    /// Configure a debug channel and wait for the target to confirm it.
    pub fn configure_channel(
        &mut self,
        node: u8,
        spec: RegisterSpec,
        mode: UpdateMode,
        timeout: Duration,
    ) -> Result<Option<u8>> {
        let Some(request) = self.mirror.configure_channel(node, spec, mode)? else {
            return Ok(None);
        };
        self.wait_reply(node, request.msg_id, timeout, |event| match event {
            HostEvent::ChannelConfig {
                node: from,
                msg_id,
                slot,
                ..
            } if *from == node && *msg_id == request.msg_id && *slot == request.slot => Some(()),
            _ => None,
        })?;
        Ok(Some(request.slot))
    }

    /// Set the decimation, or read it back when `decimation` is `None`.
    pub fn decimation(
        &mut self,
        node: u8,
        decimation: Option<u8>,
        timeout: Duration,
    ) -> Result<u8> {
        let msg_id = match decimation {
            Some(value) => self.mirror.set_decimation(node, value)?,
            None => self.mirror.query_decimation(node)?,
        };
        self.wait_reply(node, msg_id, timeout, |event| match event {
            HostEvent::Decimation {
                node: from,
                decimation,
            } if *from == node => Some(*decimation),
            _ => None,
        })
    }

    /// Reset the tick counter of one node, or broadcast to all.
    pub fn reset_time(&mut self, node: Option<u8>, timeout: Duration) -> Result<()> {
        let msg_id = self.mirror.reset_time(node)?;
        match node {
            Some(node) => self.await_ack(node, msg_id, timeout, |event| {
                matches!(event, HostEvent::TimeReset { .. })
            }),
            None => self.flush().map(|_| ()),
        }
    }

    pub fn set_tracing(&mut self, node: u8, request: TracingRequest) -> Result<()> {
        self.mirror.set_tracing(node, request)?;
        self.flush().map(|_| ())
    }

    /// Wait for the ack of request `msg_id`. A zero id gets no ack, so only
    /// the outbox is flushed.
    fn await_ack<F>(&mut self, node: u8, msg_id: u8, timeout: Duration, is_ack: F) -> Result<()>
    where
        F: Fn(&HostEvent) -> bool,
    {
        if msg_id == 0 {
            return self.flush().map(|_| ());
        }
        self.wait_reply(node, msg_id, timeout, |event| {
            let matches_id = match event {
                HostEvent::WriteAck { msg_id: id, .. } | HostEvent::TimeReset { msg_id: id, .. } => {
                    *id == msg_id
                }
                _ => false,
            };
            (event.node() == node && matches_id && is_ack(event)).then_some(())
        })
    }

    /// Split the session into its parts.
    pub fn into_parts(self) -> (FrameReader<R>, FrameWriter<W>, HostMirror) {
        (self.reader, self.writer, self.mirror)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use dbgwire_frame::{Command, ControlByte, Direction, Message, SourceKind, BROADCAST_NODE};
    use dbgwire_target::{
        serve, Address, DebugTarget, OffsetTable, ServeConfig, SimulatedMemory, TargetConfig,
    };

    use super::*;

    const NODE: u8 = 12;
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn handwritten(offset: u32, size: u8) -> RegisterSpec {
        RegisterSpec::new(
            offset,
            ControlByte::new(Direction::Read, SourceKind::HandwrittenOffset, 0),
            size,
        )
    }

    /// Serve a target with one 4-byte variable at handwritten offset 0x10,
    /// which the tick hook increments.
    fn with_target<F: FnOnce(&str)>(client: F) {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let addr = endpoint.local_addr().to_string();
        let stop = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                let link = endpoint.accept().unwrap();
                let mut memory = SimulatedMemory::new();
                let counter: Address = memory.alloc_value(&0u32.to_le_bytes());
                let mut table = OffsetTable::new();
                table.insert(SourceKind::HandwrittenOffset, 0x10, counter);

                let config = TargetConfig {
                    node_id: NODE,
                    node_name: String::from("bench"),
                    ..TargetConfig::default()
                };
                let mut target = DebugTarget::new(config, memory, table).unwrap();
                let serve_config = ServeConfig {
                    bytes_per_tick: 64,
                    ..ServeConfig::default()
                };
                serve(&mut target, link, serve_config, &stop, |t| {
                    let mut bytes = t.memory().load(counter, 4).unwrap();
                    let next = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) + 1;
                    bytes.copy_from_slice(&next.to_le_bytes());
                    t.memory_mut().store(counter, &bytes).unwrap();
                })
                .unwrap();
            });

            client(&addr);
            stop.store(true, Ordering::Relaxed);
        });
    }

    #[test]
    fn scan_query_and_trace_over_tcp() {
        with_target(|addr| {
            let mut session =
                HostSession::connect(addr, TIMEOUT, HostConfig::default()).unwrap();

            let nodes = session.scan(Duration::from_millis(500)).unwrap();
            assert_eq!(nodes, vec![NODE]);
            let cpu = session.mirror().node(NODE).unwrap();
            assert_eq!(cpu.version.name, "bench");

            let value = session
                .query_register(NODE, handwritten(0x10, 4), TIMEOUT)
                .unwrap();
            assert!(u32::from_le_bytes(value) > 0);

            session
                .configure_channel(NODE, handwritten(0x10, 4), UpdateMode::OnChange, TIMEOUT)
                .unwrap();
            let telemetry = session
                .wait_for(TIMEOUT, |event| match event {
                    HostEvent::Telemetry(t) => Some(t.clone()),
                    _ => None,
                })
                .unwrap();
            assert_eq!(telemetry.mask, 1);
            assert_eq!(telemetry.samples[0].value.len(), 4);
        });
    }

    #[test]
    fn decimation_write_and_reset_acks() {
        with_target(|addr| {
            let mut session =
                HostSession::connect(addr, TIMEOUT, HostConfig::default()).unwrap();
            session.scan(Duration::from_millis(300)).unwrap();

            assert_eq!(session.decimation(NODE, Some(0), TIMEOUT).unwrap(), 1);
            assert_eq!(session.decimation(NODE, None, TIMEOUT).unwrap(), 1);

            session
                .write_register(NODE, handwritten(0x10, 4), &[0, 0, 0, 0], TIMEOUT)
                .unwrap();
            session.reset_time(Some(NODE), TIMEOUT).unwrap();
            assert!(session.mirror().pending().is_empty());
        });
    }

    #[test]
    fn wait_times_out_without_reply() {
        with_target(|addr| {
            let mut session =
                HostSession::connect(addr, TIMEOUT, HostConfig::default()).unwrap();
            // Node 99 does not exist, so nothing answers.
            let err = session
                .query_register(99, handwritten(0x10, 4), Duration::from_millis(200))
                .unwrap_err();
            assert!(matches!(err, HostError::Timeout(_)));
        });
    }

    /// A stream that never delivers a byte.
    struct Silent;

    impl Read for Silent {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(ErrorKind::WouldBlock.into())
        }
    }

    #[test]
    fn timed_out_requests_do_not_accumulate() {
        let mut session = HostSession::new(
            FrameReader::new(Silent),
            FrameWriter::new(Vec::new()),
            HostConfig::default(),
        );
        let mut target = DebugTarget::new(
            TargetConfig {
                node_id: NODE,
                ..TargetConfig::default()
            },
            SimulatedMemory::new(),
            OffsetTable::new(),
        )
        .unwrap();
        let version = target
            .handle_message(&Message::new(BROADCAST_NODE, 0, Command::GetVersion))
            .unwrap();
        session.mirror_mut().handle(&version);
        session.mirror_mut().stale_pending(0);

        for _ in 0..300 {
            let err = session
                .decimation(NODE, Some(2), Duration::from_millis(1))
                .unwrap_err();
            assert!(matches!(err, HostError::Timeout(_)));
        }
        let err = session
            .query_register(NODE, handwritten(0x10, 4), Duration::from_millis(5))
            .unwrap_err();
        assert!(matches!(err, HostError::Timeout(_)));

        assert!(session.mirror().pending().is_empty());
        assert!(!session.writer.get_ref().is_empty());
    }
}
