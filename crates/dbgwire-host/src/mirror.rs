//! Host-side protocol state.
//!
//! [`HostMirror`] is transport-agnostic: commands are queued in an outbox as
//! [`Message`]s and replies are fed back through [`HostMirror::handle`]. The
//! mirror keeps one [`CpuNode`] per discovered target, including the host's
//! copy of each node's channel table, which telemetry decoding depends on.

use std::collections::{BTreeMap, VecDeque};

use dbgwire_frame::{
    Command, Message, RegisterSpec, TracingRequest, UpdateMode, BROADCAST_NODE, CHANNEL_COUNT,
    MAX_PARAMS, MAX_VALUE_SIZE, QUERY_VALUE_LEN,
};
use tracing::{debug, info, trace, warn};

use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::events::{HostEvent, InvalidReason, Sample, Telemetry};
use crate::node::{CpuNode, DeviceInfo, HostChannel, VersionInfo};

/// An outgoing request still waiting for its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub message: Message,
    /// Value of the poll counter when the request was queued.
    pub queued_at: u64,
}

/// A queued ConfigChannel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRequest {
    pub slot: u8,
    pub msg_id: u8,
}

/// Host view of every node on one link.
#[derive(Debug, Default)]
pub struct HostMirror {
    config: HostConfig,
    nodes: BTreeMap<u8, CpuNode>,
    outbox: VecDeque<Message>,
    pending: Vec<PendingRequest>,
    polls: u64,
}

impl HostMirror {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Known nodes, ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = &CpuNode> {
        self.nodes.values()
    }

    pub fn node(&self, id: u8) -> Option<&CpuNode> {
        self.nodes.get(&id)
    }

    /// Next message to put on the wire.
    pub fn pop_outgoing(&mut self) -> Option<Message> {
        self.outbox.pop_front()
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Requests with a nonzero msg id whose reply has not arrived.
    pub fn pending(&self) -> &[PendingRequest] {
        &self.pending
    }

    /// Advance the poll counter used to age pending requests.
    pub fn advance(&mut self) {
        self.polls += 1;
    }

    /// Remove and return pending requests queued at least `age` polls ago.
    ///
    /// Nothing is re-sent automatically; the caller decides what to do with them.
    pub fn stale_pending(&mut self, age: u64) -> Vec<Message> {
        let now = self.polls;
        let (stale, fresh): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|p| now.saturating_sub(p.queued_at) >= age);
        self.pending = fresh;
        stale.into_iter().map(|p| p.message).collect()
    }

    /// Forget the request `msg_id` sent to `node`, typically after its
    /// reply timed out. Returns the request if it was still pending.
    pub fn cancel(&mut self, node: u8, msg_id: u8) -> Option<Message> {
        if msg_id == 0 {
            return None;
        }
        let index = self
            .pending
            .iter()
            .rposition(|p| p.message.node_id == node && p.message.msg_id == msg_id)?;
        Some(self.pending.remove(index).message)
    }

    /// Broadcast GetVersion to find every node on the link.
    pub fn scan(&mut self) {
        self.queue(Message::new(BROADCAST_NODE, 0, Command::GetVersion));
    }

    pub fn request_info(&mut self, node: u8) -> Result<u8> {
        self.request(node, Command::GetInfo, &[])
    }

    /// Queue a QueryRegister. Returns the msg id used.
    pub fn query_register(&mut self, node: u8, spec: RegisterSpec) -> Result<u8> {
        check_size(spec)?;
        self.request(node, Command::QueryRegister, &spec.to_bytes())
    }

    /// Queue a WriteRegister. `value` must be exactly `spec.size` bytes.
    pub fn write_register(&mut self, node: u8, spec: RegisterSpec, value: &[u8]) -> Result<u8> {
        check_size(spec)?;
        if value.len() != usize::from(spec.size) {
            return Err(HostError::InvalidValue(format!(
                "{} value bytes for a {}-byte register",
                value.len(),
                spec.size
            )));
        }
        let mut params = spec.to_bytes().to_vec();
        params.extend_from_slice(value);
        self.request(node, Command::WriteRegister, &params)
    }

    /// Bind `spec` to a debug channel of `node` with `mode`.
    ///
    /// A register that already has a channel only gets its mode updated.
    /// Otherwise the lowest free slot is configured in full. `Off` releases
    /// the slot. Returns `None` when switching off a register that had no
    /// channel.
    pub fn configure_channel(
        &mut self,
        node: u8,
        spec: RegisterSpec,
        mode: UpdateMode,
    ) -> Result<Option<ChannelRequest>> {
        check_size(spec)?;
        let max = self.config.max_debug_channels.min(CHANNEL_COUNT);
        let cpu = self
            .nodes
            .get_mut(&node)
            .ok_or(HostError::UnknownNode(node))?;

        if let Some(slot) = cpu.channel_for(&spec).map(|c| c.slot) {
            if mode == UpdateMode::Off {
                cpu.remove_channel(slot);
            } else if let Some(channel) = cpu.channel_mut(slot) {
                channel.mode = mode;
            }
            let msg_id = self.request(node, Command::ConfigChannel, &[slot, mode.as_u8()])?;
            return Ok(Some(ChannelRequest { slot, msg_id }));
        }

        if mode == UpdateMode::Off {
            return Ok(None);
        }

        let slot = cpu
            .free_slot(max)
            .ok_or(HostError::NoFreeChannel { node, max })?;
        cpu.upsert_channel(HostChannel {
            slot,
            spec,
            mode,
            last_value: None,
        });

        let mut params = vec![slot, mode.as_u8()];
        params.extend_from_slice(&spec.to_bytes());
        let msg_id = self.request(node, Command::ConfigChannel, &params)?;
        debug!(node_id = node, channel = slot, %mode, offset = spec.offset, "channel allocated");
        Ok(Some(ChannelRequest { slot, msg_id }))
    }

    /// Ask `node` for the configuration of `slot`.
    pub fn query_channel(&mut self, node: u8, slot: u8) -> Result<u8> {
        self.request(node, Command::ConfigChannel, &[slot])
    }

    pub fn set_decimation(&mut self, node: u8, decimation: u8) -> Result<u8> {
        self.request(node, Command::Decimation, &[decimation])
    }

    pub fn query_decimation(&mut self, node: u8) -> Result<u8> {
        self.request(node, Command::Decimation, &[])
    }

    /// Reset the tick counter of `node`, or of every node when `None`.
    pub fn reset_time(&mut self, node: Option<u8>) -> Result<u8> {
        match node {
            Some(node) => self.request(node, Command::ResetTime, &[]),
            None => Ok(self.queue(Message::new(BROADCAST_NODE, 0, Command::ResetTime))),
        }
    }

    pub fn set_tracing(&mut self, node: u8, request: TracingRequest) -> Result<u8> {
        self.request(node, Command::ReadChannelData, &[request.as_u8()])
    }

    /// Send text to the target's input ring, split across messages as needed.
    pub fn send_text(&mut self, node: u8, text: &str) -> Result<()> {
        for chunk in text.as_bytes().chunks(MAX_PARAMS) {
            let msg = Message::with_params(node, 0, Command::DebugString, chunk)?;
            self.queue(msg);
        }
        Ok(())
    }

    /// Update the mirror from one incoming message.
    pub fn handle(&mut self, msg: &Message) -> HostEvent {
        self.resolve_pending(msg);

        if msg.command == Command::GetVersion {
            return self.on_version(msg);
        }

        let Some(cpu) = self.nodes.get_mut(&msg.node_id) else {
            debug!(node_id = msg.node_id, command = %msg.command, "message from unknown node");
            return HostEvent::Invalid {
                node: msg.node_id,
                command: msg.command,
                reason: InvalidReason::UnknownNode,
            };
        };

        match decode_reply(cpu, msg) {
            Ok(event) => {
                cpu.messages += 1;
                event
            }
            Err(reason) => {
                cpu.invalid_messages += 1;
                debug!(
                    node_id = msg.node_id,
                    msg_id = msg.msg_id,
                    command = %msg.command,
                    len = msg.params.len(),
                    %reason,
                    "invalid message"
                );
                HostEvent::Invalid {
                    node: msg.node_id,
                    command: msg.command,
                    reason,
                }
            }
        }
    }

    fn on_version(&mut self, msg: &Message) -> HostEvent {
        let id = msg.node_id;
        let Some(version) = VersionInfo::parse(&msg.params) else {
            if let Some(cpu) = self.nodes.get_mut(&id) {
                cpu.invalid_messages += 1;
            }
            return HostEvent::Invalid {
                node: id,
                command: msg.command,
                reason: InvalidReason::Malformed,
            };
        };

        let first_seen = match self.nodes.get_mut(&id) {
            Some(cpu) => {
                cpu.version = version.clone();
                cpu.messages += 1;
                false
            }
            None => {
                info!(
                    node_id = id,
                    name = %version.name,
                    serial = %version.serial,
                    "node discovered"
                );
                let mut cpu = CpuNode::new(id, version.clone());
                cpu.messages = 1;
                self.nodes.insert(id, cpu);
                true
            }
        };

        if first_seen {
            if let Err(err) = self.request_info(id) {
                warn!(node_id = id, error = %err, "failed to queue GetInfo");
            }
            self.switch_all_off(id);
        }

        HostEvent::NodeDiscovered {
            node: id,
            version,
            first_seen,
        }
    }

    /// Queue a mode-only Off for every slot of `node`.
    fn switch_all_off(&mut self, node: u8) {
        for slot in 0..CHANNEL_COUNT as u8 {
            match Message::with_params(
                node,
                0,
                Command::ConfigChannel,
                &[slot, UpdateMode::Off.as_u8()],
            ) {
                Ok(msg) => {
                    self.queue(msg);
                }
                Err(err) => warn!(node_id = node, error = %err, "failed to queue channel reset"),
            }
        }
    }

    fn request(&mut self, node: u8, command: Command, params: &[u8]) -> Result<u8> {
        let msg_id = self
            .nodes
            .get_mut(&node)
            .map_or(0, CpuNode::next_msg_id);
        let msg = Message::with_params(node, msg_id, command, params)?;
        Ok(self.queue(msg))
    }

    fn queue(&mut self, msg: Message) -> u8 {
        let msg_id = msg.msg_id;
        trace!(node_id = msg.node_id, msg_id, command = %msg.command, "queued");
        if msg_id != 0 {
            // A wrapped msg id makes an older entry with the same id unanswerable.
            self.pending
                .retain(|p| p.message.node_id != msg.node_id || p.message.msg_id != msg_id);
            if self.pending.len() >= self.config.max_pending.max(1) {
                let dropped = self.pending.remove(0);
                warn!(
                    node_id = dropped.message.node_id,
                    msg_id = dropped.message.msg_id,
                    command = %dropped.message.command,
                    "pending request dropped unanswered"
                );
            }
            self.pending.push(PendingRequest {
                message: msg.clone(),
                queued_at: self.polls,
            });
        }
        self.outbox.push_back(msg);
        msg_id
    }

    fn resolve_pending(&mut self, reply: &Message) {
        if reply.msg_id == 0 {
            return;
        }
        if let Some(index) = self.pending.iter().rposition(|p| {
            p.message.node_id == reply.node_id
                && p.message.msg_id == reply.msg_id
                && p.message.command == reply.command
        }) {
            self.pending.remove(index);
        }
    }
}

fn check_size(spec: RegisterSpec) -> Result<()> {
    if spec.has_valid_size() {
        Ok(())
    } else {
        Err(HostError::InvalidValue(format!(
            "register size {} exceeds {MAX_VALUE_SIZE}",
            spec.size
        )))
    }
}

fn decode_reply(
    cpu: &mut CpuNode,
    msg: &Message,
) -> std::result::Result<HostEvent, InvalidReason> {
    let node = msg.node_id;
    let msg_id = msg.msg_id;
    let params = msg.params.as_slice();

    match msg.command {
        Command::GetInfo => {
            let info = DeviceInfo::parse(params).ok_or(InvalidReason::Malformed)?;
            cpu.info = Some(info.clone());
            Ok(HostEvent::InfoReceived { node, info })
        }
        Command::QueryRegister => {
            let (spec, rest) = RegisterSpec::parse(params).ok_or(InvalidReason::Malformed)?;
            let value: [u8; QUERY_VALUE_LEN] =
                rest.try_into().map_err(|_| InvalidReason::Malformed)?;
            Ok(HostEvent::RegisterValue {
                node,
                msg_id,
                spec,
                value,
            })
        }
        Command::WriteRegister if params.is_empty() => Ok(HostEvent::WriteAck { node, msg_id }),
        Command::ConfigChannel => decode_channel_config(cpu, msg_id, params),
        Command::Decimation => match params {
            [decimation] => {
                cpu.decimation = Some(*decimation);
                Ok(HostEvent::Decimation {
                    node,
                    decimation: *decimation,
                })
            }
            _ => Err(InvalidReason::Malformed),
        },
        Command::ResetTime if params.is_empty() => Ok(HostEvent::TimeReset { node, msg_id }),
        Command::ReadChannelData if params.is_empty() => Ok(HostEvent::Ack {
            node,
            msg_id,
            command: msg.command,
        }),
        Command::ReadChannelData => decode_telemetry(cpu, params).map(HostEvent::Telemetry),
        Command::DebugString if params.is_empty() => Ok(HostEvent::Ack {
            node,
            msg_id,
            command: msg.command,
        }),
        Command::DebugString => Ok(HostEvent::DebugText {
            node,
            text: String::from_utf8_lossy(params).into_owned(),
        }),
        Command::WriteRegister | Command::ResetTime => Err(InvalidReason::Malformed),
        Command::GetVersion | Command::Other(_) => Err(InvalidReason::Unexpected),
    }
}

fn decode_channel_config(
    cpu: &mut CpuNode,
    msg_id: u8,
    params: &[u8],
) -> std::result::Result<HostEvent, InvalidReason> {
    let (&slot, rest) = params.split_first().ok_or(InvalidReason::Malformed)?;
    let (mode, spec) = match rest {
        [] => (None, None),
        [raw_mode, tail @ ..] => {
            let mode = UpdateMode::from_u8(*raw_mode).ok_or(InvalidReason::Malformed)?;
            let spec = match RegisterSpec::parse(tail) {
                Some((spec, [])) => Some(spec),
                None if tail.is_empty() => None,
                _ => return Err(InvalidReason::Malformed),
            };
            (Some(mode), spec)
        }
    };

    if let (Some(mode), Some(channel)) = (mode, cpu.channel_mut(slot)) {
        channel.mode = mode;
    }

    Ok(HostEvent::ChannelConfig {
        node: cpu.id,
        msg_id,
        slot,
        mode,
        spec,
    })
}

/// Decode a telemetry body against the node's channel table.
///
/// Mask bits are walked from 15 down to 0, the order the target appends
/// values in. Each set bit consumes as many bytes as the host's channel in
/// that slot is wide.
fn decode_telemetry(
    cpu: &mut CpuNode,
    params: &[u8],
) -> std::result::Result<Telemetry, InvalidReason> {
    let [t0, t1, t2, m0, m1, values @ ..] = params else {
        return Err(InvalidReason::Malformed);
    };
    let time = u32::from_le_bytes([*t0, *t1, *t2, 0]);
    let mask = u16::from_le_bytes([*m0, *m1]);

    let mut rest = values;
    let mut samples = Vec::new();
    for slot in (0..CHANNEL_COUNT as u8).rev() {
        if mask & (1u16 << slot) == 0 {
            continue;
        }
        let channel = cpu
            .channel(slot)
            .ok_or(InvalidReason::UnconfiguredChannel(slot))?;
        let size = usize::from(channel.spec.size);
        if rest.len() < size {
            return Err(InvalidReason::Malformed);
        }
        let (value, tail) = rest.split_at(size);
        samples.push(Sample {
            slot,
            spec: channel.spec,
            value: value.to_vec(),
        });
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(InvalidReason::Malformed);
    }

    for sample in &samples {
        if let Some(channel) = cpu.channel_mut(sample.slot) {
            channel.last_value = Some(sample.value.clone());
        }
    }

    Ok(Telemetry {
        node: cpu.id,
        time,
        mask,
        samples,
    })
}
