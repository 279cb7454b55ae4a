//! Byte-stuffed, CRC-8 protected framing for the dbgwire debug protocol.
//!
//! Every frame on the wire looks like:
//! - a start sentinel `STX` (0x55)
//! - the payload (node id, msg id, command, params) with reserved bytes escaped
//! - one CRC-8 byte over the payload, escaped the same way
//! - an end sentinel `ETX` (0xAA)
//!
//! Both the target and the host run this same crate. Corrupt or truncated
//! frames are dropped, never surfaced as messages.

pub mod assembler;
#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod control;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use assembler::{Consumer, DefaultRingBuffer, Producer, RingBuffer, DEFAULT_RING_CAPACITY};
#[cfg(feature = "async")]
pub use async_codec::DebugCodec;
pub use codec::{
    crc8, crc8_add, decode_frame, encode_frame, put_frame, FrameConfig, FrameScanner, Payload, Unstuffer,
    WireFrame, CRC_TABLE, ESC, ETX, MAX_DECODED_LEN, MAX_PAYLOAD_LEN, MAX_WIRE_LEN,
    MIN_DECODED_LEN, RS, STX,
};
pub use control::{
    ControlByte, Direction, RegisterSpec, SourceKind, TracingRequest, UpdateMode, CHANNEL_COUNT,
    INFO_TIMESTAMP_TYPE, MAX_VALUE_SIZE, PROTOCOL_VERSION, QUERY_VALUE_LEN,
};
pub use error::{FrameError, Result};
pub use message::{Command, Message, MessageBuilder, Params, BROADCAST_NODE, MAX_PARAMS};
pub use reader::FrameReader;
pub use writer::FrameWriter;
