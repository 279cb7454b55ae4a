use std::time::Duration;

/// Errors that can occur on the host side.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] dbgwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] dbgwire_frame::FrameError),

    /// The node has not answered a scan yet.
    #[error("node {0} is unknown; scan first")]
    UnknownNode(u8),

    /// Every debug channel slot of the node is in use.
    #[error("no free debug channel on node {node} ({max} in use)")]
    NoFreeChannel { node: u8, max: usize },

    /// A register value or size does not fit the protocol.
    #[error("invalid register value: {0}")]
    InvalidValue(String),

    /// The target closed the connection.
    #[error("target disconnected: {0}")]
    Disconnected(String),

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, HostError>;
