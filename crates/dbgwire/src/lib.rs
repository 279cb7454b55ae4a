//! Debug wire protocol for embedded targets.
//!
//! dbgwire lets a host read, write and stream variables of a running
//! target over a byte-stuffed, CRC-8 protected serial protocol.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte source / sink traits and TCP links
//! - [`frame`]: frame codec, ring-buffer assembler and message model
//! - [`target`]: target-side channels and command dispatcher (behind `target` feature)
//! - [`host`]: host-side mirror and blocking session (behind `host` feature)

/// Re-export transport types.
pub mod transport {
    pub use dbgwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use dbgwire_frame::*;
}

/// Re-export target types (requires `target` feature).
#[cfg(feature = "target")]
pub mod target {
    pub use dbgwire_target::*;
}

/// Re-export host types (requires `host` feature).
#[cfg(feature = "host")]
pub mod host {
    pub use dbgwire_host::*;
}
