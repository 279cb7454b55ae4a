//! Protocol field types shared by target and host.

use std::fmt;

use crate::message::MessageBuilder;

/// Debug protocol version reported in the GetVersion reply: major, minor, build (LE).
pub const PROTOCOL_VERSION: [u8; 4] = [0x00, 0x05, 0x00, 0x00];

/// Number of debug channel slots per node.
pub const CHANNEL_COUNT: usize = 16;

/// Largest value a channel or register access moves, in bytes.
pub const MAX_VALUE_SIZE: usize = 8;

/// Value bytes carried by a QueryRegister reply.
pub const QUERY_VALUE_LEN: usize = 4;

/// Type id of the timestamp record in the GetInfo reply.
pub const INFO_TIMESTAMP_TYPE: u8 = 10;

/// Per-channel telemetry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum UpdateMode {
    #[default]
    Off = 0,
    /// Sent whenever the value differs from the last scan.
    OnChange = 1,
    /// Sent on every slow boundary.
    Periodic = 2,
    /// Sent on the next scan while the endpoint's send-once flag is set.
    SendOnce = 3,
    /// Sent on every scan.
    SendAll = 4,
}

impl UpdateMode {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(UpdateMode::Off),
            1 => Some(UpdateMode::OnChange),
            2 => Some(UpdateMode::Periodic),
            3 => Some(UpdateMode::SendOnce),
            4 => Some(UpdateMode::SendAll),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            UpdateMode::Off => "off",
            UpdateMode::OnChange => "on-change",
            UpdateMode::Periodic => "periodic",
            UpdateMode::SendOnce => "send-once",
            UpdateMode::SendAll => "send-all",
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameter of the ReadChannelData command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingRequest {
    Off,
    On,
    Once,
}

impl TracingRequest {
    /// 1 turns tracing on, 2 requests one shot, anything else turns it off.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => TracingRequest::On,
            2 => TracingRequest::Once,
            _ => TracingRequest::Off,
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            TracingRequest::Off => 0,
            TracingRequest::On => 1,
            TracingRequest::Once => 2,
        }
    }
}

/// Access direction, bit 7 of the control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Where the register offset comes from, bits 6..4 of the control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    HandwrittenOffset,
    HandwrittenIndex,
    GeneratedApiOffset,
    GeneratedApiIndex,
    AbsoluteAddress,
    /// A bit pattern with no assigned meaning.
    Reserved(u8),
}

impl SourceKind {
    const fn bits(self) -> u8 {
        match self {
            SourceKind::HandwrittenOffset => 0x00,
            SourceKind::HandwrittenIndex => 0x10,
            SourceKind::GeneratedApiOffset => 0x40,
            SourceKind::GeneratedApiIndex => 0x50,
            SourceKind::AbsoluteAddress => 0x70,
            SourceKind::Reserved(bits) => bits & 0x70,
        }
    }

    const fn from_bits(bits: u8) -> Self {
        match bits & 0x70 {
            0x00 => SourceKind::HandwrittenOffset,
            0x10 => SourceKind::HandwrittenIndex,
            0x40 => SourceKind::GeneratedApiOffset,
            0x50 => SourceKind::GeneratedApiIndex,
            0x70 => SourceKind::AbsoluteAddress,
            other => SourceKind::Reserved(other),
        }
    }
}

/// Packed direction / source kind / dereference depth.
///
/// ```text
/// bit  7     6..4         3..0
///      dir   source kind  dereference depth
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ControlByte(u8);

impl ControlByte {
    const DIRECTION_BIT: u8 = 0x80;
    const DEPTH_MASK: u8 = 0x0F;

    pub const fn new(direction: Direction, source: SourceKind, depth: u8) -> Self {
        let dir = match direction {
            Direction::Read => 0,
            Direction::Write => Self::DIRECTION_BIT,
        };
        Self(dir | source.bits() | (depth & Self::DEPTH_MASK))
    }

    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn direction(self) -> Direction {
        if self.0 & Self::DIRECTION_BIT != 0 {
            Direction::Write
        } else {
            Direction::Read
        }
    }

    pub const fn source(self) -> SourceKind {
        SourceKind::from_bits(self.0)
    }

    /// Number of pointer hops before the value is reached (0..=15).
    pub const fn depth(self) -> u8 {
        self.0 & Self::DEPTH_MASK
    }
}

impl fmt::Debug for ControlByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlByte")
            .field("raw", &format_args!("0x{:02X}", self.0))
            .field("direction", &self.direction())
            .field("source", &self.source())
            .field("depth", &self.depth())
            .finish()
    }
}

impl From<u8> for ControlByte {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

/// Register reference used by WriteRegister, QueryRegister and ConfigChannel:
/// 4-byte little-endian offset, control byte, size byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterSpec {
    pub offset: u32,
    pub control: ControlByte,
    pub size: u8,
}

impl RegisterSpec {
    /// Encoded length.
    pub const LEN: usize = 6;

    pub const fn new(offset: u32, control: ControlByte, size: u8) -> Self {
        Self {
            offset,
            control,
            size,
        }
    }

    /// Parse the leading 6 bytes of `params`, returning the rest.
    pub fn parse(params: &[u8]) -> Option<(Self, &[u8])> {
        match params {
            [o0, o1, o2, o3, control, size, rest @ ..] => Some((
                Self {
                    offset: u32::from_le_bytes([*o0, *o1, *o2, *o3]),
                    control: ControlByte(*control),
                    size: *size,
                },
                rest,
            )),
            _ => None,
        }
    }

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let o = self.offset.to_le_bytes();
        [o[0], o[1], o[2], o[3], self.control.raw(), self.size]
    }

    pub fn push_to(self, builder: &mut MessageBuilder) {
        builder.push_bytes(&self.to_bytes());
    }

    /// True if the size fits the value buffers of both ends.
    pub fn has_valid_size(self) -> bool {
        usize::from(self.size) <= MAX_VALUE_SIZE
    }
}
