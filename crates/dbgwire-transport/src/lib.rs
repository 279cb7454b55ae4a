//! Byte-level transport collaborators for dbgwire.
//!
//! The protocol core never talks to a socket or UART directly. It needs two
//! things from its surroundings:
//! - a [`ByteSource`] it can poll for the next received byte, and
//! - a [`ByteSink`] it can hand fully encoded frames to.
//!
//! This crate defines those seams, a few in-memory implementations, and a
//! blocking TCP [`Link`] used by the host tools and the target emulator.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::TcpEndpoint;
pub use traits::{ByteSink, ByteSource, IoSink, Link};
