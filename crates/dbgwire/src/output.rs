use std::fmt::Write as _;
use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use dbgwire_host::{CpuNode, Sample, Telemetry};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A row of command output.
pub trait Record: Serialize {
    fn headers() -> &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

/// Print a batch of records. Json emits one object per line.
pub fn print_records<T: Record>(records: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for record in records {
                print_json(record);
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(T::headers().to_vec());
            for record in records {
                table.add_row(record.cells());
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for record in records {
                println!("{}", pretty_line(T::headers(), &record.cells()));
            }
        }
    }
}

/// Print one record as it arrives. Tables degrade to pretty lines.
pub fn print_streamed<T: Record>(record: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("{}", pretty_line(T::headers(), &record.cells()));
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn pretty_line(headers: &[&str], cells: &[String]) -> String {
    let mut line = String::new();
    for (header, cell) in headers.iter().zip(cells) {
        if !line.is_empty() {
            line.push(' ');
        }
        let _ = write!(line, "{}={}", header.to_ascii_lowercase(), cell);
    }
    line
}

/// Lowercase hex without separators.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn dotted(version: [u8; 4]) -> String {
    format!(
        "{}.{}.{}.{}",
        version[0], version[1], version[2], version[3]
    )
}

#[derive(Debug, Serialize)]
pub struct NodeRecord {
    pub node: u8,
    pub name: String,
    pub serial: String,
    pub protocol_version: String,
    pub app_version: String,
    /// `(type id, size)` pairs from GetInfo; empty until the node answered.
    pub type_sizes: Vec<(u8, u8)>,
    pub tick_us: Option<u32>,
}

impl From<&CpuNode> for NodeRecord {
    fn from(cpu: &CpuNode) -> Self {
        Self {
            node: cpu.id,
            name: cpu.version.name.clone(),
            serial: cpu.version.serial.clone(),
            protocol_version: dotted(cpu.version.protocol_version),
            app_version: dotted(cpu.version.app_version),
            type_sizes: cpu
                .info
                .as_ref()
                .map(|info| info.type_sizes.clone())
                .unwrap_or_default(),
            tick_us: cpu.info.as_ref().and_then(|info| info.tick_us),
        }
    }
}

impl Record for NodeRecord {
    fn headers() -> &'static [&'static str] {
        &["NODE", "NAME", "SERIAL", "PROTOCOL", "APP", "TYPES", "TICK_US"]
    }

    fn cells(&self) -> Vec<String> {
        let types = self
            .type_sizes
            .iter()
            .map(|(id, size)| format!("{id}:{size}"))
            .collect::<Vec<_>>()
            .join(",");
        vec![
            self.node.to_string(),
            self.name.clone(),
            self.serial.clone(),
            self.protocol_version.clone(),
            self.app_version.clone(),
            types,
            self.tick_us.map_or_else(|| "-".to_string(), |t| t.to_string()),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterRecord {
    pub node: u8,
    pub offset: u32,
    pub control: u8,
    pub size: u8,
    /// Raw bytes as hex, in target byte order.
    pub value: String,
    /// The value read as a little-endian unsigned integer.
    pub value_le: u64,
}

impl RegisterRecord {
    pub fn new(node: u8, offset: u32, control: u8, size: u8, bytes: &[u8]) -> Self {
        Self {
            node,
            offset,
            control,
            size,
            value: hex(bytes),
            value_le: le_value(bytes),
        }
    }
}

impl Record for RegisterRecord {
    fn headers() -> &'static [&'static str] {
        &["NODE", "OFFSET", "CONTROL", "SIZE", "VALUE", "DECIMAL"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.node.to_string(),
            format!("0x{:X}", self.offset),
            format!("0x{:02X}", self.control),
            self.size.to_string(),
            self.value.clone(),
            self.value_le.to_string(),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct SampleRecord {
    pub node: u8,
    pub time: u32,
    pub slot: u8,
    pub offset: u32,
    pub value: String,
    pub value_le: u64,
}

impl SampleRecord {
    pub fn from_telemetry(telemetry: &Telemetry) -> Vec<Self> {
        telemetry
            .samples
            .iter()
            .map(|sample: &Sample| Self {
                node: telemetry.node,
                time: telemetry.time,
                slot: sample.slot,
                offset: sample.spec.offset,
                value: hex(&sample.value),
                value_le: le_value(&sample.value),
            })
            .collect()
    }
}

impl Record for SampleRecord {
    fn headers() -> &'static [&'static str] {
        &["NODE", "TIME", "SLOT", "OFFSET", "VALUE", "DECIMAL"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.node.to_string(),
            self.time.to_string(),
            self.slot.to_string(),
            format!("0x{:X}", self.offset),
            self.value.clone(),
            self.value_le.to_string(),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct DecimationRecord {
    pub node: u8,
    pub decimation: u8,
}

impl Record for DecimationRecord {
    fn headers() -> &'static [&'static str] {
        &["NODE", "DECIMATION"]
    }

    fn cells(&self) -> Vec<String> {
        vec![self.node.to_string(), self.decimation.to_string()]
    }
}

/// Outcome of a command that only waits for an acknowledgement.
#[derive(Debug, Serialize)]
pub struct AckRecord {
    pub command: &'static str,
    /// `None` for broadcasts.
    pub node: Option<u8>,
    pub acknowledged: bool,
}

impl Record for AckRecord {
    fn headers() -> &'static [&'static str] {
        &["COMMAND", "NODE", "ACK"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.command.to_string(),
            self.node.map_or_else(|| "all".to_string(), |n| n.to_string()),
            self.acknowledged.to_string(),
        ]
    }
}

fn le_value(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
