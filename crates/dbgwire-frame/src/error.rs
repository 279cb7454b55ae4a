/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The candidate frame does not begin with a start sentinel.
    #[error("frame does not begin with STX (0x55)")]
    MissingStart,

    /// No end sentinel follows the start sentinel.
    #[error("frame is not terminated by ETX (0xAA)")]
    Unterminated,

    /// The last byte before ETX is an escape marker with nothing to escape.
    #[error("frame ends with a dangling escape byte")]
    DanglingEscape,

    /// Fewer than 4 unescaped bytes (node id, msg id, command, crc).
    #[error("frame too short ({len} decoded bytes, min 4)")]
    TooShort { len: usize },

    /// More unescaped bytes than a frame can carry.
    #[error("frame too long (more than {max} decoded bytes)")]
    TooLong { max: usize },

    /// The running CRC over payload and CRC byte did not reduce to zero.
    #[error("crc mismatch (residue 0x{residue:02X})")]
    CrcMismatch { residue: u8 },

    /// The payload exceeds what fits in a single frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

impl From<dbgwire_transport::TransportError> for FrameError {
    fn from(err: dbgwire_transport::TransportError) -> Self {
        use dbgwire_transport::TransportError;

        match err {
            TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
            TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
                FrameError::Io(source)
            }
            other => FrameError::Io(std::io::Error::other(other.to_string())),
        }
    }
}
