//! Target-side protocol engine.
//!
//! [`DebugTarget`] owns everything one debug endpoint needs: the inbound
//! assembler, channel registry, timing state and text ring, plus the memory
//! and register-lookup collaborators. It is driven from two places:
//! - [`DebugTarget::on_tick`] from the periodic interrupt (advance time, pull
//!   at most one received byte),
//! - [`DebugTarget::poll`] from the main loop (dispatch complete messages,
//!   then send telemetry if due).

use dbgwire_frame::{
    Command, ControlByte, DefaultRingBuffer, Message, MessageBuilder, RegisterSpec, TracingRequest, UpdateMode,
    CHANNEL_COUNT, INFO_TIMESTAMP_TYPE, MAX_PARAMS, PROTOCOL_VERSION, QUERY_VALUE_LEN, RS,
};
use dbgwire_transport::{ByteSink, ByteSource};
use tracing::{debug, trace, warn};

use crate::channel::DebugChannel;
use crate::config::TargetConfig;
use crate::error::Result;
use crate::memory::{Memory, RegisterResolver};
use crate::registry::{ChannelRegistry, ScanTrigger};
use crate::state::EndpointState;
use crate::text::TextRing;

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetStats {
    pub messages_handled: u64,
    pub messages_ignored: u64,
    pub replies_sent: u64,
    pub telemetry_sent: u64,
    pub overruns: u64,
}

/// One debug protocol endpoint in the target role.
pub struct DebugTarget<M, R> {
    config: TargetConfig,
    state: EndpointState,
    channels: ChannelRegistry,
    ring: DefaultRingBuffer,
    text: TextRing,
    memory: M,
    resolver: R,
    stats: TargetStats,
}

impl<M: Memory, R: RegisterResolver> DebugTarget<M, R> {
    /// Create a target. Fails if the configured identity does not fit the wire format.
    pub fn new(config: TargetConfig, memory: M, resolver: R) -> Result<Self> {
        config.validate()?;
        debug!(node_id = config.node_id, name = %config.node_name, "debug target ready");
        Ok(Self {
            config,
            state: EndpointState::default(),
            channels: ChannelRegistry::new(),
            ring: DefaultRingBuffer::new(),
            text: TextRing::new(),
            memory,
            resolver,
            stats: TargetStats::default(),
        })
    }

    /// Push received bytes into the assembler. Returns how many were accepted.
    pub fn receive(&mut self, bytes: &[u8]) -> usize {
        self.ring.push(bytes)
    }

    /// One interrupt tick: advance time and pull at most one byte from `source`.
    pub fn on_tick<S: ByteSource + ?Sized>(&mut self, source: &mut S) {
        self.state.time_ticks = self.state.time_ticks.wrapping_add(1);
        if let Some(byte) = source.get_byte() {
            self.receive(&[byte]);
        }
    }

    /// One main-loop iteration: dispatch every complete message, then send
    /// telemetry if it is due.
    pub fn poll<W: ByteSink + ?Sized>(&mut self, sink: &mut W) {
        while let Some(msg) = self.ring.try_decode_next() {
            if let Some(reply) = self.handle_message(&msg) {
                send(&reply, sink);
                self.stats.replies_sent += 1;
            }
        }

        if self.ring.take_overrun() {
            self.stats.overruns += 1;
            warn!(node_id = self.config.node_id, "receive buffer overrun; input dropped");
        }

        if let Some(telemetry) = self.service_telemetry() {
            send(&telemetry, sink);
            self.stats.telemetry_sent += 1;
        }
    }

    /// Execute one decoded message and build the reply to send, if any.
    ///
    /// Messages for another node, unknown commands and malformed params are
    /// ignored without a reply. Otherwise a reply is produced when the request
    /// carried a nonzero msg id or the reply has a body.
    pub fn handle_message(&mut self, msg: &Message) -> Option<Message> {
        if !msg.is_for(self.config.node_id) {
            trace!(node_id = msg.node_id, "message for another node");
            return None;
        }

        let mut reply = MessageBuilder::reply_to(msg, self.config.node_id);
        let params = msg.params.as_slice();
        let handled = match msg.command {
            Command::GetVersion => self.cmd_version(&mut reply),
            Command::GetInfo => self.cmd_info(&mut reply),
            Command::WriteRegister => self.cmd_write_register(params),
            Command::QueryRegister => self.cmd_query_register(params, &mut reply),
            Command::ConfigChannel => self.cmd_config_channel(params, &mut reply),
            Command::Decimation => self.cmd_decimation(params, &mut reply),
            Command::ResetTime => self.cmd_reset_time(),
            Command::ReadChannelData => self.cmd_read_channel_data(params),
            Command::DebugString => self.cmd_debug_string(params),
            Command::Other(_) => None,
        };

        if handled.is_none() {
            self.stats.messages_ignored += 1;
            debug!(
                msg_id = msg.msg_id,
                command = %msg.command,
                len = params.len(),
                "ignoring message"
            );
            return None;
        }
        self.stats.messages_handled += 1;

        let reply = match reply.finish() {
            Ok(reply) => reply,
            Err(err) => {
                warn!(command = %msg.command, error = %err, "reply does not fit in a frame");
                return None;
            }
        };

        if reply.msg_id != 0 || !reply.params.is_empty() {
            Some(reply)
        } else {
            None
        }
    }

    /// Run the telemetry scheduler once and build a frame if any channel
    /// contributes.
    pub fn service_telemetry(&mut self) -> Option<Message> {
        if !self.state.fast_update_due() {
            return None;
        }

        let now = self.state.time_ticks;
        let trigger = ScanTrigger {
            slow: self.state.slow_update_due(self.config.slow_interval_ticks),
            once: self.state.tracing_once,
        };

        let mut builder = MessageBuilder::new(self.config.node_id, 0, Command::ReadChannelData);
        builder.push_u24_le(now).push_u16_le(0);
        let mask = self.channels.scan(&self.memory, trigger, &mut builder);

        self.state.last_fast_update = now;
        if trigger.slow {
            self.state.last_slow_update = now;
        }
        self.state.tracing_once = false;

        if mask == 0 {
            return None;
        }
        builder.patch(3, &mask.to_le_bytes());

        match builder.finish() {
            Ok(msg) => {
                trace!(time = now, mask = format_args!("{mask:#06x}"), "telemetry frame");
                Some(msg)
            }
            Err(err) => {
                warn!(error = %err, "telemetry frame overflow");
                None
            }
        }
    }

    /// Send `text` to the host as DebugString messages.
    pub fn trace<W: ByteSink + ?Sized>(&self, text: &str, sink: &mut W) {
        for chunk in text.as_bytes().chunks(MAX_PARAMS) {
            match Message::with_params(self.config.node_id, 0, Command::DebugString, chunk) {
                Ok(msg) => send(&msg, sink),
                Err(err) => warn!(error = %err, "debug string dropped"),
            }
        }
    }

    /// Report a failed assertion to the host.
    pub fn report_assertion<W: ByteSink + ?Sized>(
        &self,
        expression: &str,
        file: &str,
        line: u32,
        sink: &mut W,
    ) {
        let text = format!("Assert fail: '{expression}' (file: {file}, line: {line})\r\n");
        self.trace(&text, sink);
    }

    /// Next character the host sent through DebugString.
    pub fn get_char(&mut self) -> Option<u8> {
        self.text.pop()
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn state(&self) -> &EndpointState {
        &self.state
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn stats(&self) -> TargetStats {
        self.stats
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn resolver_mut(&mut self) -> &mut R {
        &mut self.resolver
    }

    fn cmd_version(&mut self, reply: &mut MessageBuilder) -> Option<()> {
        reply
            .push_bytes(&PROTOCOL_VERSION)
            .push_bytes(&self.config.app_version)
            .push_len_prefixed(self.config.node_name.as_bytes())
            .push_len_prefixed(self.config.serial_number.as_bytes());
        Some(())
    }

    fn cmd_info(&mut self, reply: &mut MessageBuilder) -> Option<()> {
        let info = &self.config.type_info;
        for (type_id, size) in (0u8..).zip(info.sizes()) {
            reply.push_bytes(&[type_id, size, RS]);
        }
        reply
            .push_u8(INFO_TIMESTAMP_TYPE)
            .push_u32_le(info.tick_us);
        Some(())
    }

    fn cmd_write_register(&mut self, params: &[u8]) -> Option<()> {
        let (spec, value) = RegisterSpec::parse(params)?;
        if !spec.has_valid_size() || value.len() < usize::from(spec.size) {
            return None;
        }

        let channel = DebugChannel::bind(spec, self.resolver.resolve_spec(&spec));
        if !channel.write(&mut self.memory, value) {
            debug!(offset = spec.offset, "register write skipped (unresolved)");
        }
        Some(())
    }

    fn cmd_query_register(&mut self, params: &[u8], reply: &mut MessageBuilder) -> Option<()> {
        let (spec, _) = RegisterSpec::parse(params)?;
        if !spec.has_valid_size() {
            return None;
        }

        let mut channel = DebugChannel::bind(spec, self.resolver.resolve_spec(&spec));
        let mut value = [0u8; QUERY_VALUE_LEN];
        match channel.read(&self.memory) {
            Some(reading) => {
                let bytes = reading.value.as_slice();
                let n = bytes.len().min(QUERY_VALUE_LEN);
                value[..n].copy_from_slice(&bytes[..n]);
            }
            None => debug!(offset = spec.offset, "register query unresolved"),
        }

        reply.push_bytes(&spec.to_bytes()).push_bytes(&value);
        Some(())
    }

    fn cmd_config_channel(&mut self, params: &[u8], reply: &mut MessageBuilder) -> Option<()> {
        let (&index, rest) = params.split_first()?;
        if usize::from(index) >= CHANNEL_COUNT {
            return None;
        }

        match rest.len() {
            0 => {
                let channel = self.channels.get(index)?;
                reply
                    .push_u8(index)
                    .push_u8(channel.mode().as_u8())
                    .push_bytes(&channel.spec().to_bytes());
            }
            1 => {
                let mode = UpdateMode::from_u8(rest[0])?;
                self.channels.get_mut(index)?.set_mode(mode);
                self.note_send_once(mode);
                reply.push_u8(index).push_u8(mode.as_u8());
            }
            n if n >= RegisterSpec::LEN => {
                let mode = UpdateMode::from_u8(rest[0])?;
                let spec = match RegisterSpec::parse(&rest[1..]) {
                    Some((spec, _)) => spec,
                    // No size byte: the slot keeps its current size.
                    None => {
                        let [o0, o1, o2, o3, control] = <[u8; 5]>::try_from(&rest[1..]).ok()?;
                        RegisterSpec::new(
                            u32::from_le_bytes([o0, o1, o2, o3]),
                            ControlByte::from_raw(control),
                            self.channels.get(index)?.spec().size,
                        )
                    }
                };
                if !spec.has_valid_size() {
                    return None;
                }

                let address = self.resolver.resolve_spec(&spec);
                let mut channel = DebugChannel::bind(spec, address);
                channel.set_mode(mode);
                channel.force_change(&self.memory);
                self.channels.replace(index, channel);
                self.note_send_once(mode);

                debug!(
                    channel = index,
                    %mode,
                    offset = spec.offset,
                    resolved = address.is_some(),
                    "channel configured"
                );
                reply.push_u8(index);
            }
            _ => return None,
        }
        Some(())
    }

    fn note_send_once(&mut self, mode: UpdateMode) {
        if mode == UpdateMode::SendOnce {
            self.state.tracing_once = true;
        }
    }

    fn cmd_decimation(&mut self, params: &[u8], reply: &mut MessageBuilder) -> Option<()> {
        // Any other length is a query.
        if let [decimation] = params {
            self.state.set_decimation(u32::from(*decimation));
        }
        reply.push_u8(u8::try_from(self.state.decimation).unwrap_or(u8::MAX));
        Some(())
    }

    fn cmd_reset_time(&mut self) -> Option<()> {
        self.state.reset_time();
        Some(())
    }

    fn cmd_read_channel_data(&mut self, params: &[u8]) -> Option<()> {
        let &raw = params.first()?;
        match TracingRequest::from_u8(raw) {
            TracingRequest::Off => self.state.tracing_on = false,
            TracingRequest::On => self.state.tracing_on = true,
            TracingRequest::Once => self.state.tracing_once = true,
        }
        Some(())
    }

    fn cmd_debug_string(&mut self, params: &[u8]) -> Option<()> {
        let stored = self.text.push(params);
        if stored < params.len() {
            debug!(dropped = params.len() - stored, "debug text ring full");
        }
        Some(())
    }
}

fn send<W: ByteSink + ?Sized>(msg: &Message, sink: &mut W) {
    match msg.encode() {
        Ok(wire) => sink.write_data(&wire),
        Err(err) => warn!(command = %msg.command, error = %err, "failed to encode message"),
    }
}

impl<M, R> std::fmt::Debug for DebugTarget<M, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugTarget")
            .field("node_id", &self.config.node_id)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
