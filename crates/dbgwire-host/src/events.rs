use std::fmt;

use dbgwire_frame::{Command, RegisterSpec, UpdateMode, QUERY_VALUE_LEN};

use crate::node::{DeviceInfo, VersionInfo};

/// One value carried by a telemetry frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub slot: u8,
    pub spec: RegisterSpec,
    pub value: Vec<u8>,
}

/// A decoded telemetry frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telemetry {
    pub node: u8,
    /// Target tick count, 24 bits.
    pub time: u32,
    pub mask: u16,
    /// Samples in wire order, highest slot first.
    pub samples: Vec<Sample>,
}

/// Why an incoming message was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// From a node that has not answered a scan.
    UnknownNode,
    /// Body does not match the command's layout.
    Malformed,
    /// Telemetry mask names a slot the host never configured.
    UnconfiguredChannel(u8),
    /// Command the host never expects from a target.
    Unexpected,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode => f.write_str("unknown node"),
            Self::Malformed => f.write_str("malformed body"),
            Self::UnconfiguredChannel(slot) => write!(f, "unconfigured channel {slot}"),
            Self::Unexpected => f.write_str("unexpected command"),
        }
    }
}

/// What the host learned from one incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    NodeDiscovered {
        node: u8,
        version: VersionInfo,
        /// False when an already known node answered again.
        first_seen: bool,
    },
    InfoReceived {
        node: u8,
        info: DeviceInfo,
    },
    RegisterValue {
        node: u8,
        msg_id: u8,
        spec: RegisterSpec,
        value: [u8; QUERY_VALUE_LEN],
    },
    WriteAck {
        node: u8,
        msg_id: u8,
    },
    /// Reply to ConfigChannel. `mode` and `spec` are present when the reply
    /// carried them.
    ChannelConfig {
        node: u8,
        msg_id: u8,
        slot: u8,
        mode: Option<UpdateMode>,
        spec: Option<RegisterSpec>,
    },
    Decimation {
        node: u8,
        decimation: u8,
    },
    TimeReset {
        node: u8,
        msg_id: u8,
    },
    /// Empty ack for a tracing request or debug text.
    Ack {
        node: u8,
        msg_id: u8,
        command: Command,
    },
    Telemetry(Telemetry),
    DebugText {
        node: u8,
        text: String,
    },
    Invalid {
        node: u8,
        command: Command,
        reason: InvalidReason,
    },
}

impl HostEvent {
    /// Node the event came from.
    pub fn node(&self) -> u8 {
        match self {
            Self::NodeDiscovered { node, .. }
            | Self::InfoReceived { node, .. }
            | Self::RegisterValue { node, .. }
            | Self::WriteAck { node, .. }
            | Self::ChannelConfig { node, .. }
            | Self::Decimation { node, .. }
            | Self::TimeReset { node, .. }
            | Self::Ack { node, .. }
            | Self::DebugText { node, .. }
            | Self::Invalid { node, .. } => *node,
            Self::Telemetry(t) => t.node,
        }
    }
}
