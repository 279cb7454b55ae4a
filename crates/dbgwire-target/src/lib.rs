//! Target-side endpoint of the dbgwire debug protocol.
//!
//! A [`DebugTarget`] answers host commands against a [`Memory`] view of the
//! device and streams telemetry for up to 16 configured channels. Register
//! references from the host are turned into root addresses by a
//! [`RegisterResolver`]; [`OffsetTable`] and [`SimulatedMemory`] give a
//! complete in-process device for emulation and tests.
//!
//! ```
//! use dbgwire_frame::{Command, Message};
//! use dbgwire_target::{DebugTarget, OffsetTable, SimulatedMemory, TargetConfig};
//!
//! let mut target =
//!     DebugTarget::new(TargetConfig::default(), SimulatedMemory::new(), OffsetTable::new())?;
//! let reply = target.handle_message(&Message::new(0xFF, 1, Command::GetVersion));
//! assert!(reply.is_some());
//! # Ok::<(), dbgwire_target::TargetError>(())
//! ```

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod link;
pub mod memory;
pub mod registry;
pub mod state;
pub mod text;

pub use channel::{ChannelValue, DebugChannel, Reading};
pub use config::{TargetConfig, TypeInfo, DEFAULT_SLOW_INTERVAL_TICKS, MAX_IDENTITY_LEN};
pub use dispatcher::{DebugTarget, TargetStats};
pub use error::{Result, TargetError};
pub use link::{serve, ServeConfig, MAX_RX_BACKLOG};
pub use memory::{
    follow, Address, Deref, Memory, OffsetTable, RegisterResolver, SimulatedMemory, POINTER_SIZE,
};
pub use registry::{ChannelRegistry, ScanTrigger};
pub use state::EndpointState;
pub use text::{TextRing, TEXT_RING_CAPACITY};
