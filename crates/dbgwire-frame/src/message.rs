//! Logical messages carried inside frames.
//!
//! A decoded frame body is `node_id, msg_id, command, params...`. The command
//! is a single ASCII tag.

use std::fmt;

use crate::codec::{decode_frame, encode_frame, put_frame, WireFrame, MAX_PAYLOAD_LEN};
use crate::error::{FrameError, Result};

/// Node id every endpoint accepts.
pub const BROADCAST_NODE: u8 = 0xFF;

/// Bytes in front of the params: node id, msg id, command.
pub const HEADER_LEN: usize = 3;

/// Largest params block a message can carry.
pub const MAX_PARAMS: usize = MAX_PAYLOAD_LEN - HEADER_LEN;

/// Bounded parameter bytes of a message.
pub type Params = heapless::Vec<u8, MAX_PARAMS>;

/// Command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Command {
    GetVersion,
    GetInfo,
    WriteRegister,
    QueryRegister,
    ConfigChannel,
    Decimation,
    ResetTime,
    ReadChannelData,
    DebugString,
    /// A tag this implementation does not know. Kept so it can be logged and ignored.
    Other(u8),
}

impl Command {
    pub const fn tag(self) -> u8 {
        match self {
            Command::GetVersion => b'V',
            Command::GetInfo => b'I',
            Command::WriteRegister => b'W',
            Command::QueryRegister => b'Q',
            Command::ConfigChannel => b'C',
            Command::Decimation => b'D',
            Command::ResetTime => b'T',
            Command::ReadChannelData => b'R',
            Command::DebugString => b'S',
            Command::Other(tag) => tag,
        }
    }

    pub const fn from_tag(tag: u8) -> Self {
        match tag {
            b'V' => Command::GetVersion,
            b'I' => Command::GetInfo,
            b'W' => Command::WriteRegister,
            b'Q' => Command::QueryRegister,
            b'C' => Command::ConfigChannel,
            b'D' => Command::Decimation,
            b'T' => Command::ResetTime,
            b'R' => Command::ReadChannelData,
            b'S' => Command::DebugString,
            other => Command::Other(other),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Command::GetVersion => "get_version",
            Command::GetInfo => "get_info",
            Command::WriteRegister => "write_register",
            Command::QueryRegister => "query_register",
            Command::ConfigChannel => "config_channel",
            Command::Decimation => "decimation",
            Command::ResetTime => "reset_time",
            Command::ReadChannelData => "read_channel_data",
            Command::DebugString => "debug_string",
            Command::Other(_) => "unknown",
        }
    }
}

impl From<u8> for Command {
    fn from(tag: u8) -> Self {
        Command::from_tag(tag)
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> Self {
        cmd.tag()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Other(tag) => write!(f, "unknown(0x{tag:02X})"),
            known => write!(f, "{}('{}')", known.name(), known.tag() as char),
        }
    }
}

/// A decoded logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub node_id: u8,
    pub msg_id: u8,
    pub command: Command,
    pub params: Params,
}

impl Message {
    /// A message without params.
    pub fn new(node_id: u8, msg_id: u8, command: Command) -> Self {
        Self {
            node_id,
            msg_id,
            command,
            params: Params::new(),
        }
    }

    /// A message with params. Fails if the params do not fit in one frame.
    pub fn with_params(node_id: u8, msg_id: u8, command: Command, params: &[u8]) -> Result<Self> {
        let params = Params::from_slice(params).map_err(|()| FrameError::PayloadTooLarge {
            size: params.len(),
            max: MAX_PARAMS,
        })?;
        Ok(Self {
            node_id,
            msg_id,
            command,
            params,
        })
    }

    /// Split a decoded frame body into header fields and params.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        match payload {
            [node_id, msg_id, tag, params @ ..] => {
                Self::with_params(*node_id, *msg_id, Command::from_tag(*tag), params)
            }
            _ => Err(FrameError::TooShort {
                len: payload.len() + 1,
            }),
        }
    }

    /// Decode a message from one wire frame.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        Self::from_payload(&decode_frame(frame)?)
    }

    /// Encode this message into wire bytes.
    pub fn encode(&self) -> Result<WireFrame> {
        let mut payload = heapless::Vec::<u8, MAX_PAYLOAD_LEN>::new();
        self.write_payload(&mut payload);
        encode_frame(&payload)
    }

    /// Encode this message and append the wire bytes to `dst`.
    pub fn encode_into(&self, dst: &mut impl bytes::BufMut) -> Result<()> {
        let mut payload = heapless::Vec::<u8, MAX_PAYLOAD_LEN>::new();
        self.write_payload(&mut payload);
        put_frame(&payload, dst)
    }

    fn write_payload(&self, payload: &mut heapless::Vec<u8, MAX_PAYLOAD_LEN>) {
        // Params are bounded by MAX_PARAMS, so the header always fits.
        let _ = payload.extend_from_slice(&[self.node_id, self.msg_id, self.command.tag()]);
        let _ = payload.extend_from_slice(&self.params);
    }

    /// True if the message is addressed to every node.
    pub fn is_broadcast(&self) -> bool {
        self.node_id == BROADCAST_NODE
    }

    /// True if a node with id `node_id` should process this message.
    pub fn is_for(&self, node_id: u8) -> bool {
        self.node_id == node_id || self.is_broadcast()
    }
}

/// Accumulates params for an outgoing message.
///
/// Appends never fail individually. An append that does not fit latches an
/// overflow, and [`finish`](MessageBuilder::finish) reports it.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    node_id: u8,
    msg_id: u8,
    command: Command,
    params: Params,
    overflow: usize,
}

impl MessageBuilder {
    pub fn new(node_id: u8, msg_id: u8, command: Command) -> Self {
        Self {
            node_id,
            msg_id,
            command,
            params: Params::new(),
            overflow: 0,
        }
    }

    /// Start a reply to `request`, keeping its msg id and command.
    pub fn reply_to(request: &Message, own_node_id: u8) -> Self {
        Self::new(own_node_id, request.msg_id, request.command)
    }

    pub fn push_u8(&mut self, value: u8) -> &mut Self {
        self.push_bytes(&[value])
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> &mut Self {
        if self.overflow > 0 || self.params.extend_from_slice(data).is_err() {
            self.overflow += data.len();
        }
        self
    }

    pub fn push_u16_le(&mut self, value: u16) -> &mut Self {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Low three bytes of `value`, little-endian.
    pub fn push_u24_le(&mut self, value: u32) -> &mut Self {
        self.push_bytes(&value.to_le_bytes()[..3])
    }

    pub fn push_u32_le(&mut self, value: u32) -> &mut Self {
        self.push_bytes(&value.to_le_bytes())
    }

    /// One length byte followed by `data`.
    pub fn push_len_prefixed(&mut self, data: &[u8]) -> &mut Self {
        match u8::try_from(data.len()) {
            Ok(len) => self.push_u8(len).push_bytes(data),
            Err(_) => {
                self.overflow += data.len() + 1;
                self
            }
        }
    }

    /// Overwrite already pushed bytes starting at `index`.
    ///
    /// Used to fill in fields whose value is known only after later bytes were
    /// appended, like the telemetry channel mask.
    pub fn patch(&mut self, index: usize, data: &[u8]) -> &mut Self {
        if let Some(slot) = self.params.get_mut(index..index + data.len()) {
            slot.copy_from_slice(data);
        }
        self
    }

    /// Bytes pushed so far.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Bytes that can still be pushed without overflowing.
    pub fn remaining(&self) -> usize {
        if self.overflow > 0 {
            0
        } else {
            MAX_PARAMS - self.params.len()
        }
    }

    pub fn finish(self) -> Result<Message> {
        if self.overflow > 0 {
            return Err(FrameError::PayloadTooLarge {
                size: self.params.len() + self.overflow,
                max: MAX_PARAMS,
            });
        }
        Ok(Message {
            node_id: self.node_id,
            msg_id: self.msg_id,
            command: self.command,
            params: self.params,
        })
    }
}
