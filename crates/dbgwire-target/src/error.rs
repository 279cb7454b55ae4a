/// Errors that can occur while setting up or driving a debug target.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// A configured string does not fit its length-prefixed wire field.
    #[error("{field} is {len} bytes long (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// A memory access fell outside the backing store.
    #[error("memory access out of bounds (address 0x{address:X}, {len} bytes)")]
    OutOfBounds { address: usize, len: usize },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] dbgwire_transport::TransportError),

    /// The link failed while serving.
    #[error("link i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] dbgwire_frame::FrameError),
}

pub type Result<T> = std::result::Result<T, TargetError>;
