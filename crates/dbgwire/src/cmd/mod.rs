use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use dbgwire_frame::{ControlByte, Direction, RegisterSpec, SourceKind, UpdateMode};
use dbgwire_host::{HostConfig, HostSession};
use dbgwire_transport::Link;
use tracing::debug;

use crate::exit::{host_error, CliError, CliResult, FAILURE, USAGE};
use crate::output::OutputFormat;

pub mod decimation;
pub mod emulate;
pub mod query;
pub mod reset_time;
pub mod scan;
pub mod trace;
pub mod version;
pub mod write;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a simulated debug target on a TCP listener.
    Emulate(EmulateArgs),
    /// Broadcast GetVersion and list the nodes that answer.
    Scan(ScanArgs),
    /// Read a register once.
    Query(QueryArgs),
    /// Write a register.
    Write(WriteArgs),
    /// Stream a register through a debug channel.
    Trace(TraceArgs),
    /// Read or set the telemetry decimation of a node.
    Decimation(DecimationArgs),
    /// Reset the tick counter of a node, or of every node.
    ResetTime(ResetTimeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Emulate(args) => emulate::run(args),
        Command::Scan(args) => scan::run(args, format),
        Command::Query(args) => query::run(args, format),
        Command::Write(args) => write::run(args, format),
        Command::Trace(args) => trace::run(args, format),
        Command::Decimation(args) => decimation::run(args, format),
        Command::ResetTime(args) => reset_time::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EmulateArgs {
    /// Address to listen on (port 0 picks a free port).
    #[arg(default_value = "127.0.0.1:5050")]
    pub addr: String,
    /// Node id the target answers to.
    #[arg(long, default_value = "1")]
    pub node: u8,
    /// Node name reported by GetVersion.
    #[arg(long, default_value = "dbgwire-emulator")]
    pub name: String,
    /// Serial number reported by GetVersion.
    #[arg(long, default_value = "0001")]
    pub serial: String,
    /// Tick period in milliseconds.
    #[arg(long, default_value = "1")]
    pub tick_ms: u64,
    /// Received bytes processed per tick.
    #[arg(long, default_value = "64")]
    pub bytes_per_tick: usize,
    /// Ticks between periodic telemetry samples.
    #[arg(long, default_value = "1000")]
    pub slow_interval: u32,
}

/// Where to reach the target and how long to wait for it.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Target address (host:port).
    pub addr: String,
    /// Connect and reply timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// How long to listen for scan replies before sending the request.
    #[arg(long, default_value = "300ms")]
    pub scan_window: String,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum SourceArg {
    HandwrittenOffset,
    HandwrittenIndex,
    GeneratedOffset,
    GeneratedIndex,
    Absolute,
}

impl From<SourceArg> for SourceKind {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::HandwrittenOffset => SourceKind::HandwrittenOffset,
            SourceArg::HandwrittenIndex => SourceKind::HandwrittenIndex,
            SourceArg::GeneratedOffset => SourceKind::GeneratedApiOffset,
            SourceArg::GeneratedIndex => SourceKind::GeneratedApiIndex,
            SourceArg::Absolute => SourceKind::AbsoluteAddress,
        }
    }
}

/// A register reference on the command line.
#[derive(Args, Debug, Clone)]
pub struct RegisterArgs {
    /// Register offset (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_offset)]
    pub offset: u32,
    /// How the target resolves the offset.
    #[arg(long, value_enum, default_value = "handwritten-offset")]
    pub source: SourceArg,
    /// Pointer dereferences applied after resolving.
    #[arg(long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=15))]
    pub depth: u8,
    /// Raw control byte; overrides --source and --depth.
    #[arg(long, value_parser = parse_control)]
    pub control: Option<u8>,
}

impl RegisterArgs {
    pub fn spec(&self, direction: Direction, size: u8) -> RegisterSpec {
        let control = match self.control {
            Some(raw) => ControlByte::from_raw(raw),
            None => ControlByte::new(direction, self.source.into(), self.depth),
        };
        RegisterSpec::new(self.offset, control, size)
    }
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Node to query.
    #[arg(long)]
    pub node: u8,
    #[command(flatten)]
    pub register: RegisterArgs,
    /// Register size in bytes.
    #[arg(long, default_value = "4", value_parser = clap::value_parser!(u8).range(1..=8))]
    pub size: u8,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Node to write to.
    #[arg(long)]
    pub node: u8,
    #[command(flatten)]
    pub register: RegisterArgs,
    /// Value as hex bytes in target byte order (e.g. 2a000000). Its length
    /// is the register size.
    #[arg(long, value_parser = parse_hex)]
    pub value: HexBytes,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ModeArg {
    OnChange,
    Periodic,
    SendOnce,
    SendAll,
}

impl From<ModeArg> for UpdateMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::OnChange => UpdateMode::OnChange,
            ModeArg::Periodic => UpdateMode::Periodic,
            ModeArg::SendOnce => UpdateMode::SendOnce,
            ModeArg::SendAll => UpdateMode::SendAll,
        }
    }
}

#[derive(Args, Debug)]
pub struct TraceArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Node to trace.
    #[arg(long)]
    pub node: u8,
    #[command(flatten)]
    pub register: RegisterArgs,
    /// Register size in bytes.
    #[arg(long, default_value = "4", value_parser = clap::value_parser!(u8).range(1..=8))]
    pub size: u8,
    /// When the target sends the value.
    #[arg(long, value_enum, default_value = "on-change")]
    pub mode: ModeArg,
    /// Exit after printing N samples.
    #[arg(long)]
    pub count: Option<usize>,
    /// Stop after this long (e.g. 10s). Default: until --count or Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct DecimationArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    #[arg(long)]
    pub node: u8,
    /// New decimation; omitted to read the current one.
    #[arg(long)]
    pub set: Option<u8>,
}

#[derive(Args, Debug)]
pub struct ResetTimeArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Node to reset; every node when omitted.
    #[arg(long)]
    pub node: Option<u8>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Bytes parsed from a hex string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

pub type Session = HostSession<Link, Link>;

/// Connect and scan. When `node` is given it must answer the scan.
pub fn open_session(args: &ConnectArgs, node: Option<u8>) -> CliResult<(Session, Duration)> {
    let timeout = parse_timeout(&args.timeout)?;
    let window = parse_timeout(&args.scan_window)?;

    let mut session = HostSession::connect(&args.addr, timeout, HostConfig::default())
        .map_err(|err| host_error("connect failed", err))?;
    let nodes = session
        .scan(window)
        .map_err(|err| host_error("scan failed", err))?;
    debug!(addr = %args.addr, ?nodes, "scan complete");

    if let Some(node) = node {
        if !nodes.contains(&node) {
            return Err(CliError::new(
                FAILURE,
                format!("node {node} did not answer the scan at {}", args.addr),
            ));
        }
    }
    Ok((session, timeout))
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

fn parse_offset(input: &str) -> Result<u32, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid offset: {input}"))
}

fn parse_control(input: &str) -> Result<u8, String> {
    let value = parse_offset(input)?;
    u8::try_from(value).map_err(|_| format!("control byte out of range: {input}"))
}

pub fn parse_hex(input: &str) -> Result<HexBytes, String> {
    let digits: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | ':'))
        .collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(format!("expected an even number of hex digits: {input}"));
    }
    if !digits.is_ascii() {
        return Err(format!("invalid hex: {input}"));
    }
    let bytes = (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| format!("invalid hex: {input}"))?;
    Ok(HexBytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_seconds() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parse_timeout_millis() {
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_invalid() {
        assert!(parse_timeout("0s").is_err());
        assert!(parse_timeout("bad").is_err());
        assert!(parse_timeout("").is_err());
    }

    #[test]
    fn offsets_accept_hex_and_decimal() {
        assert_eq!(parse_offset("0x10"), Ok(16));
        assert_eq!(parse_offset("16"), Ok(16));
        assert!(parse_offset("0xZZ").is_err());
        assert!(parse_control("0x170").is_err());
    }

    #[test]
    fn hex_values() {
        assert_eq!(parse_hex("2a000000"), Ok(HexBytes(vec![0x2A, 0, 0, 0])));
        assert_eq!(parse_hex("0x01:02"), Ok(HexBytes(vec![1, 2])));
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn raw_control_overrides_source_and_depth() {
        let args = RegisterArgs {
            offset: 8,
            source: SourceArg::Absolute,
            depth: 3,
            control: Some(0x02),
        };
        let spec = args.spec(Direction::Read, 4);
        assert_eq!(spec.control.raw(), 0x02);
        assert_eq!(spec.size, 4);
    }

    #[test]
    fn control_built_from_source_and_depth() {
        let args = RegisterArgs {
            offset: 0x0C,
            source: SourceArg::HandwrittenOffset,
            depth: 2,
            control: None,
        };
        let spec = args.spec(Direction::Read, 4);
        assert_eq!(spec.control.source(), SourceKind::HandwrittenOffset);
        assert_eq!(spec.control.depth(), 2);
        assert_eq!(spec.offset, 0x0C);
    }
}
