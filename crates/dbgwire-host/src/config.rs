use dbgwire_frame::CHANNEL_COUNT;

/// Host mirror configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Debug channel slots the host will allocate per node.
    pub max_debug_channels: usize,
    /// Unanswered requests kept for reply matching. The oldest is dropped
    /// when a new request would exceed it.
    pub max_pending: usize,
}

/// Default for [`HostConfig::max_pending`].
pub const DEFAULT_MAX_PENDING: usize = 64;

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_debug_channels: CHANNEL_COUNT,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}
