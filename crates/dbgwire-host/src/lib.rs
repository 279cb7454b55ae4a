//! Host side of the dbgwire debug protocol.
//!
//! [`HostMirror`] turns host intents into protocol messages and folds replies
//! and telemetry back into a per-node model. [`HostSession`] drives a mirror
//! over a blocking byte stream, typically a TCP [`dbgwire_transport::Link`].

pub mod config;
pub mod error;
pub mod events;
pub mod mirror;
pub mod node;
pub mod session;

pub use config::{HostConfig, DEFAULT_MAX_PENDING};
pub use error::{HostError, Result};
pub use events::{HostEvent, InvalidReason, Sample, Telemetry};
pub use mirror::{ChannelRequest, HostMirror, PendingRequest};
pub use node::{CpuNode, DeviceInfo, HostChannel, VersionInfo};
pub use session::{HostSession, POLL_INTERVAL};
