use std::fmt;
use std::io;

use dbgwire_frame::FrameError;
use dbgwire_host::HostError;
use dbgwire_target::TargetError;
use dbgwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn host_error(context: &str, err: HostError) -> CliError {
    match err {
        HostError::Transport(err) => transport_error(context, err),
        HostError::Frame(err) => frame_error(context, err),
        HostError::UnknownNode(_) | HostError::NoFreeChannel { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        HostError::InvalidValue(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        HostError::Disconnected(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        HostError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
    }
}

pub fn target_error(context: &str, err: TargetError) -> CliError {
    match err {
        TargetError::Transport(err) => transport_error(context, err),
        TargetError::Io(err) => io_error(context, err),
        TargetError::Frame(err) => frame_error(context, err),
        TargetError::FieldTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        TargetError::OutOfBounds { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn host_timeout_maps_to_timeout_code() {
        let err = host_error("query", HostError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("query: "));
    }

    #[test]
    fn refused_connect_is_plain_failure() {
        let err = transport_error(
            "connect",
            TransportError::Connect {
                addr: "127.0.0.1:1".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            },
        );
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn long_identity_is_usage_error() {
        let err = target_error(
            "emulate",
            TargetError::FieldTooLong {
                field: "node_name",
                len: 40,
                max: 32,
            },
        );
        assert_eq!(err.code, USAGE);
    }
}
