//! Memory and register-lookup collaborators.
//!
//! The protocol never touches raw pointers. It sees memory through the
//! [`Memory`] trait, which can follow one pointer level at a time and copy
//! bytes in and out, and it asks a [`RegisterResolver`] to turn a
//! register offset plus control byte into an [`Address`].

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;

use dbgwire_frame::{ControlByte, RegisterSpec, SourceKind};
use tracing::trace;

use crate::error::{Result, TargetError};

/// Opaque, non-null location in target memory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(NonZeroUsize);

impl Address {
    /// `None` for the null address.
    pub const fn new(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    pub const fn get(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{:X})", self.0.get())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0.get())
    }
}

/// Result of following one pointer level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deref {
    Resolved(Address),
    Null,
}

/// Target memory as seen by the debug protocol.
pub trait Memory {
    /// Read the pointer stored at `addr`.
    fn deref(&self, addr: Address) -> Result<Deref>;

    /// Copy `dst.len()` bytes starting at `addr`.
    fn read(&self, addr: Address, dst: &mut [u8]) -> Result<()>;

    /// Overwrite `src.len()` bytes starting at `addr`.
    fn write(&mut self, addr: Address, src: &[u8]) -> Result<()>;
}

impl<M: Memory + ?Sized> Memory for &mut M {
    fn deref(&self, addr: Address) -> Result<Deref> {
        (**self).deref(addr)
    }

    fn read(&self, addr: Address, dst: &mut [u8]) -> Result<()> {
        (**self).read(addr, dst)
    }

    fn write(&mut self, addr: Address, src: &[u8]) -> Result<()> {
        (**self).write(addr, src)
    }
}

/// Follow `depth` pointer levels starting at `root`.
///
/// Returns `None` if any level is null or unreadable.
pub fn follow<M: Memory + ?Sized>(memory: &M, root: Address, depth: u8) -> Option<Address> {
    let mut current = root;
    for level in 0..depth {
        match memory.deref(current) {
            Ok(Deref::Resolved(next)) => current = next,
            Ok(Deref::Null) => {
                trace!(%root, level, "null pointer in chain");
                return None;
            }
            Err(err) => {
                trace!(%root, level, error = %err, "unreadable pointer in chain");
                return None;
            }
        }
    }
    Some(current)
}

/// Maps a register reference to a root address. Owned by the application.
pub trait RegisterResolver {
    fn resolve(&self, offset: u32, control: ControlByte) -> Option<Address>;

    fn resolve_spec(&self, spec: &RegisterSpec) -> Option<Address> {
        self.resolve(spec.offset, spec.control)
    }
}

impl<F> RegisterResolver for F
where
    F: Fn(u32, ControlByte) -> Option<Address>,
{
    fn resolve(&self, offset: u32, control: ControlByte) -> Option<Address> {
        self(offset, control)
    }
}

/// Lookup table from (source kind, offset) to address.
///
/// The absolute-address source kind bypasses the table: the offset is the
/// address.
#[derive(Debug, Clone, Default)]
pub struct OffsetTable {
    entries: BTreeMap<(u8, u32), Address>,
}

impl OffsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: SourceKind, offset: u32, address: Address) -> Option<Address> {
        self.entries.insert((source_key(source), offset), address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn source_key(source: SourceKind) -> u8 {
    ControlByte::new(dbgwire_frame::Direction::Read, source, 0).raw()
}

impl RegisterResolver for OffsetTable {
    fn resolve(&self, offset: u32, control: ControlByte) -> Option<Address> {
        match control.source() {
            SourceKind::AbsoluteAddress => usize::try_from(offset).ok().and_then(Address::new),
            source => self.entries.get(&(source_key(source), offset)).copied(),
        }
    }
}

/// Width of a pointer cell in [`SimulatedMemory`].
pub const POINTER_SIZE: usize = 4;

/// Byte arena standing in for target RAM.
///
/// Pointers are 4-byte little-endian cells; 0 is null. The first word is
/// reserved so no allocation ever lands at address 0.
#[derive(Debug, Clone)]
pub struct SimulatedMemory {
    bytes: Vec<u8>,
}

impl Default for SimulatedMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMemory {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; POINTER_SIZE],
        }
    }

    /// Reserve `len` zeroed bytes, aligned to the pointer size.
    pub fn alloc(&mut self, len: usize) -> Address {
        let start = self.bytes.len().next_multiple_of(POINTER_SIZE);
        self.bytes.resize(start + len.max(1), 0);
        // start >= POINTER_SIZE because the first word is reserved.
        Address(NonZeroUsize::MIN.saturating_add(start - 1))
    }

    /// Allocate and initialise a value.
    pub fn alloc_value(&mut self, value: &[u8]) -> Address {
        let addr = self.alloc(value.len());
        let start = addr.get();
        self.bytes[start..start + value.len()].copy_from_slice(value);
        addr
    }

    /// Allocate a pointer cell aimed at `target` (`None` stores null).
    pub fn alloc_ptr(&mut self, target: Option<Address>) -> Address {
        self.alloc_value(&encode_ptr(target))
    }

    /// Overwrite bytes at `addr`.
    pub fn store(&mut self, addr: Address, value: &[u8]) -> Result<()> {
        Memory::write(self, addr, value)
    }

    /// Overwrite the pointer cell at `addr`.
    pub fn store_ptr(&mut self, addr: Address, target: Option<Address>) -> Result<()> {
        self.store(addr, &encode_ptr(target))
    }

    /// Copy `len` bytes starting at `addr`.
    pub fn load(&self, addr: Address, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0; len];
        Memory::read(self, addr, &mut out)?;
        Ok(out)
    }

    /// Bytes in use, including the reserved null word.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn range(&self, addr: Address, len: usize) -> Result<std::ops::Range<usize>> {
        let start = addr.get();
        start
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .map(|end| start..end)
            .ok_or(TargetError::OutOfBounds {
                address: start,
                len,
            })
    }
}

fn encode_ptr(target: Option<Address>) -> [u8; POINTER_SIZE] {
    let raw = target.map_or(0, Address::get);
    // Arena addresses are small; anything wider than a cell cannot be stored.
    u32::try_from(raw).unwrap_or(0).to_le_bytes()
}

impl Memory for SimulatedMemory {
    fn deref(&self, addr: Address) -> Result<Deref> {
        let range = self.range(addr, POINTER_SIZE)?;
        let mut cell = [0u8; POINTER_SIZE];
        cell.copy_from_slice(&self.bytes[range]);
        let raw = u32::from_le_bytes(cell) as usize;
        Ok(Address::new(raw).map_or(Deref::Null, Deref::Resolved))
    }

    fn read(&self, addr: Address, dst: &mut [u8]) -> Result<()> {
        let range = self.range(addr, dst.len())?;
        dst.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write(&mut self, addr: Address, src: &[u8]) -> Result<()> {
        let range = self.range(addr, src.len())?;
        self.bytes[range].copy_from_slice(src);
        Ok(())
    }
}
