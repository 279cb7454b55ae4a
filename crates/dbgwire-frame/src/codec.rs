use bytes::BufMut;
use tracing::debug;

use crate::error::{FrameError, Result};

/// Start-of-frame sentinel.
pub const STX: u8 = 0x55;

/// End-of-frame sentinel.
pub const ETX: u8 = 0xAA;

/// Escape marker. A reserved byte `b` travels as `ESC, b ^ ESC`.
pub const ESC: u8 = 0x66;

/// Record separator used inside the GetInfo reply body. Not a frame sentinel.
pub const RS: u8 = 0x33;

/// Smallest decodable frame body: node id, msg id, command, crc.
pub const MIN_DECODED_LEN: usize = 4;

/// Largest decodable frame body, crc included.
pub const MAX_DECODED_LEN: usize = 128;

/// Largest logical payload (node id, msg id, command, params) a frame carries.
pub const MAX_PAYLOAD_LEN: usize = MAX_DECODED_LEN - 1;

/// Worst-case wire size: both sentinels plus every body byte escaped.
pub const MAX_WIRE_LEN: usize = 2 + 2 * MAX_DECODED_LEN;

/// Encoded frame bytes, including sentinels.
pub type WireFrame = heapless::Vec<u8, MAX_WIRE_LEN>;

/// Decoded frame body with the crc byte stripped.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD_LEN>;

/// CRC-8 lookup table (Dallas/Maxim polynomial, reflected). Seed is 0.
///
/// Both ends of the link must use this exact table.
pub const CRC_TABLE: [u8; 256] = [
    0, 94, 188, 226, 97, 63, 221, 131, 194, 156, 126, 32, 163, 253, 31, 65, //
    157, 195, 33, 127, 252, 162, 64, 30, 95, 1, 227, 189, 62, 96, 130, 220, //
    35, 125, 159, 193, 66, 28, 254, 160, 225, 191, 93, 3, 128, 222, 60, 98, //
    190, 224, 2, 92, 223, 129, 99, 61, 124, 34, 192, 158, 29, 67, 161, 255, //
    70, 24, 250, 164, 39, 121, 155, 197, 132, 218, 56, 102, 229, 187, 89, 7, //
    219, 133, 103, 57, 186, 228, 6, 88, 25, 71, 165, 251, 120, 38, 196, 154, //
    101, 59, 217, 135, 4, 90, 184, 230, 167, 249, 27, 69, 198, 152, 122, 36, //
    248, 166, 68, 26, 153, 199, 37, 123, 58, 100, 134, 216, 91, 5, 231, 185, //
    140, 210, 48, 110, 237, 179, 81, 15, 78, 16, 242, 172, 47, 113, 147, 205, //
    17, 79, 173, 243, 112, 46, 204, 146, 211, 141, 111, 49, 178, 236, 14, 80, //
    175, 241, 19, 77, 206, 144, 114, 44, 109, 51, 209, 143, 12, 82, 176, 238, //
    50, 108, 142, 208, 83, 13, 239, 177, 240, 174, 76, 18, 145, 207, 45, 115, //
    202, 148, 118, 40, 171, 245, 23, 73, 8, 86, 180, 234, 105, 55, 213, 139, //
    87, 9, 235, 181, 54, 104, 138, 212, 149, 203, 41, 119, 244, 170, 72, 22, //
    233, 183, 85, 11, 136, 214, 52, 106, 43, 117, 151, 201, 74, 20, 246, 168, //
    116, 42, 200, 150, 21, 75, 169, 247, 182, 232, 10, 84, 215, 137, 107, 53, //
];

/// Fold one byte into a running crc.
#[inline]
pub const fn crc8_add(crc: u8, byte: u8) -> u8 {
    CRC_TABLE[(crc ^ byte) as usize]
}

/// CRC-8 of `bytes`, seeded with 0.
pub fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, &b| crc8_add(crc, b))
}

/// True for byte values that must be escaped on the wire.
#[inline]
pub const fn is_reserved(byte: u8) -> bool {
    matches!(byte, STX | ETX | ESC)
}

fn stuff(bytes: &[u8], emit: &mut impl FnMut(u8)) {
    for &b in bytes {
        if is_reserved(b) {
            emit(ESC);
            emit(b ^ ESC);
        } else {
            emit(b);
        }
    }
}

fn check_payload_len(payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}

fn encode_with(payload: &[u8], emit: &mut impl FnMut(u8)) {
    emit(STX);
    stuff(payload, emit);
    stuff(&[crc8(payload)], emit);
    emit(ETX);
}

/// Encode a logical payload into a wire frame.
///
/// Wire format:
/// ```text
/// ┌──────┬───────────────────────┬───────────────┬──────┐
/// │ STX  │ payload (escaped)     │ crc8 (escaped) │ ETX  │
/// │ 0x55 │ node, msg, cmd, params │               │ 0xAA │
/// └──────┴───────────────────────┴───────────────┴──────┘
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<WireFrame> {
    check_payload_len(payload)?;
    let mut wire = WireFrame::new();
    // Capacity covers the worst case, so pushes cannot fail once the length is checked.
    encode_with(payload, &mut |b| {
        let _ = wire.push(b);
    });
    Ok(wire)
}

/// Encode a logical payload and append the wire bytes to `dst`.
pub fn put_frame(payload: &[u8], dst: &mut impl BufMut) -> Result<()> {
    check_payload_len(payload)?;
    encode_with(payload, &mut |b| dst.put_u8(b));
    Ok(())
}

/// Incremental unescaper for the bytes between STX and ETX.
///
/// Feed it every raw byte after a start sentinel, then call [`finish`] when the
/// end sentinel arrives. The crc is accumulated while bytes are fed, so a frame
/// is walked exactly once.
///
/// [`finish`]: Unstuffer::finish
#[derive(Debug, Clone, Default)]
pub struct Unstuffer {
    decoded: heapless::Vec<u8, MAX_DECODED_LEN>,
    crc: u8,
    escape_pending: bool,
    overflowed: bool,
}

impl Unstuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially decoded frame.
    pub fn reset(&mut self) {
        self.decoded.clear();
        self.crc = 0;
        self.escape_pending = false;
        self.overflowed = false;
    }

    /// Feed one raw byte (never STX or ETX).
    pub fn feed(&mut self, raw: u8) {
        if self.overflowed {
            return;
        }
        if !self.escape_pending && raw == ESC {
            self.escape_pending = true;
            return;
        }
        let byte = if self.escape_pending { raw ^ ESC } else { raw };
        self.escape_pending = false;
        if self.decoded.push(byte).is_err() {
            self.overflowed = true;
            return;
        }
        self.crc = crc8_add(self.crc, byte);
    }

    /// True once more bytes were fed than a frame can hold.
    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    /// Number of unescaped bytes so far, crc included.
    pub fn len(&self) -> usize {
        self.decoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoded.is_empty()
    }

    /// Validate the accumulated frame and return its payload.
    ///
    /// The unstuffer is reset afterwards regardless of the outcome.
    pub fn finish(&mut self) -> Result<Payload> {
        let result = self.validate();
        self.reset();
        result
    }

    fn validate(&self) -> Result<Payload> {
        if self.overflowed {
            return Err(FrameError::TooLong {
                max: MAX_DECODED_LEN,
            });
        }
        if self.escape_pending {
            return Err(FrameError::DanglingEscape);
        }
        let len = self.decoded.len();
        if len < MIN_DECODED_LEN {
            return Err(FrameError::TooShort { len });
        }
        if self.crc != 0 {
            return Err(FrameError::CrcMismatch { residue: self.crc });
        }
        Payload::from_slice(&self.decoded[..len - 1]).map_err(|()| FrameError::TooLong {
            max: MAX_DECODED_LEN,
        })
    }
}

/// Byte-at-a-time frame scanner shared by every decoder.
///
/// A start sentinel opens a frame, restarting any frame in progress. An end
/// sentinel closes it. Bytes outside a frame are skipped. A frame that grows
/// past [`MAX_DECODED_LEN`] is closed early with [`FrameError::TooLong`].
#[derive(Debug, Clone, Default)]
pub struct FrameScanner {
    in_frame: bool,
    unstuffer: Unstuffer,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a start sentinel has been seen and its end sentinel has not.
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Abandon any frame in progress.
    pub fn reset(&mut self) {
        self.unstuffer.reset();
        self.in_frame = false;
    }

    /// Feed one raw byte. Returns the decoded payload, or why it was
    /// rejected, whenever a frame closes.
    pub fn step(&mut self, byte: u8) -> Option<Result<Payload>> {
        match byte {
            STX => {
                if self.in_frame {
                    debug!("start sentinel inside frame; restarting");
                }
                self.unstuffer.reset();
                self.in_frame = true;
                None
            }
            ETX if self.in_frame => {
                self.in_frame = false;
                Some(self.unstuffer.finish())
            }
            _ if self.in_frame => {
                self.unstuffer.feed(byte);
                if !self.unstuffer.is_overflowed() {
                    return None;
                }
                self.reset();
                Some(Err(FrameError::TooLong {
                    max: MAX_DECODED_LEN,
                }))
            }
            _ => None,
        }
    }
}

/// Decode one wire frame.
///
/// `frame` must begin with STX. Decoding stops at the first ETX; a later STX
/// before that ETX restarts the frame, as the stream assembler does. Bytes after
/// the ETX are ignored.
pub fn decode_frame(frame: &[u8]) -> Result<Payload> {
    if frame.first() != Some(&STX) {
        return Err(FrameError::MissingStart);
    }

    let mut scanner = FrameScanner::new();
    frame
        .iter()
        .find_map(|&b| scanner.step(b))
        .unwrap_or(Err(FrameError::Unterminated))
}

/// Configuration for the blocking frame reader/writer.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}
