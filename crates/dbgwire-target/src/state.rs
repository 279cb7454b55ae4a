/// Timing and tracing state of a target endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointState {
    /// Minimum ticks between fast telemetry frames. Never 0.
    pub decimation: u32,
    /// Ticks since start or the last ResetTime.
    pub time_ticks: u32,
    pub tracing_on: bool,
    /// Send one telemetry frame, then clear. Shared by every SendOnce channel.
    pub tracing_once: bool,
    pub last_fast_update: u32,
    pub last_slow_update: u32,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            decimation: 1,
            time_ticks: 0,
            tracing_on: true,
            tracing_once: false,
            last_fast_update: 0,
            last_slow_update: 0,
        }
    }
}

impl EndpointState {
    /// Store a decimation, coercing 0 to 1.
    pub fn set_decimation(&mut self, decimation: u32) {
        self.decimation = decimation.max(1);
    }

    pub fn reset_time(&mut self) {
        self.time_ticks = 0;
        self.last_fast_update = 0;
        self.last_slow_update = 0;
    }

    /// True if tracing is active and at least `decimation` ticks have passed.
    pub fn fast_update_due(&self) -> bool {
        (self.tracing_on || self.tracing_once)
            && self.time_ticks.wrapping_sub(self.last_fast_update) >= self.decimation
    }

    pub fn slow_update_due(&self, slow_interval_ticks: u32) -> bool {
        self.time_ticks.wrapping_sub(self.last_slow_update) >= slow_interval_ticks
    }
}
