use crate::error::{Result, TargetError};

/// Longest node name or serial number a target reports.
pub const MAX_IDENTITY_LEN: usize = 32;

/// Ticks between slow (periodic) telemetry boundaries by default.
pub const DEFAULT_SLOW_INTERVAL_TICKS: u32 = 1000;

/// Native type sizes reported by GetInfo, so the host can decode raw values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub alignment: u8,
    pub pointer: u8,
    pub bool: u8,
    pub char: u8,
    pub short: u8,
    pub int: u8,
    pub long: u8,
    pub float: u8,
    pub double: u8,
    pub long_double: u8,
    /// Length of one tick in microseconds.
    pub tick_us: u32,
}

impl TypeInfo {
    /// Sizes in GetInfo record order (type ids 0 through 9).
    pub fn sizes(&self) -> [u8; 10] {
        [
            self.alignment,
            self.pointer,
            self.bool,
            self.char,
            self.short,
            self.int,
            self.long,
            self.float,
            self.double,
            self.long_double,
        ]
    }
}

/// A 32-bit microcontroller with a 1 ms tick.
impl Default for TypeInfo {
    fn default() -> Self {
        Self {
            alignment: 1,
            pointer: 4,
            bool: 1,
            char: 1,
            short: 2,
            int: 4,
            long: 4,
            float: 4,
            double: 8,
            long_double: 8,
            tick_us: 1000,
        }
    }
}

/// Identity and timing of a debug target.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Node id this target answers to (besides broadcast).
    pub node_id: u8,
    /// Application version reported by GetVersion.
    pub app_version: [u8; 4],
    pub node_name: String,
    pub serial_number: String,
    /// Ticks between periodic telemetry samples. Default: 1000.
    pub slow_interval_ticks: u32,
    pub type_info: TypeInfo,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            app_version: [0, 1, 0, 0],
            node_name: String::from("dbgwire-target"),
            serial_number: String::from("0000"),
            slow_interval_ticks: DEFAULT_SLOW_INTERVAL_TICKS,
            type_info: TypeInfo::default(),
        }
    }
}

impl TargetConfig {
    /// Check that the identity strings fit their wire fields.
    pub fn validate(&self) -> Result<()> {
        check_len("node_name", &self.node_name)?;
        check_len("serial_number", &self.serial_number)?;
        Ok(())
    }
}

fn check_len(field: &'static str, value: &str) -> Result<()> {
    if value.len() > MAX_IDENTITY_LEN {
        return Err(TargetError::FieldTooLong {
            field,
            len: value.len(),
            max: MAX_IDENTITY_LEN,
        });
    }
    Ok(())
}
