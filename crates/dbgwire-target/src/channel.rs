use dbgwire_frame::{ControlByte, RegisterSpec, UpdateMode, MAX_VALUE_SIZE};
use tracing::trace;

use crate::memory::{follow, Address, Memory};

/// Raw value bytes of a channel, at most 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelValue {
    bytes: [u8; MAX_VALUE_SIZE],
    len: u8,
}

impl ChannelValue {
    /// `None` if `bytes` is longer than 8.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MAX_VALUE_SIZE {
            return None;
        }
        let mut value = Self {
            bytes: [0; MAX_VALUE_SIZE],
            len: bytes.len() as u8,
        };
        value.bytes[..bytes.len()].copy_from_slice(bytes);
        Some(value)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Outcome of a successful channel read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub value: ChannelValue,
    /// True if the value differs from the cached previous value.
    pub changed: bool,
}

/// A typed, pointer-indirected view onto one memory cell.
#[derive(Debug, Clone, Default)]
pub struct DebugChannel {
    address: Option<Address>,
    depth: u8,
    size: u8,
    previous: [u8; MAX_VALUE_SIZE],
    mode: UpdateMode,
    control: ControlByte,
    offset: u32,
}

impl DebugChannel {
    /// A channel bound to `spec`, rooted at the already resolved `address`.
    ///
    /// The size is clamped to 8 bytes.
    pub fn bind(spec: RegisterSpec, address: Option<Address>) -> Self {
        Self {
            address,
            depth: spec.control.depth(),
            size: spec.size.min(MAX_VALUE_SIZE as u8),
            previous: [0; MAX_VALUE_SIZE],
            mode: UpdateMode::Off,
            control: spec.control,
            offset: spec.offset,
        }
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: UpdateMode) {
        self.mode = mode;
    }

    pub fn control(&self) -> ControlByte {
        self.control
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn previous(&self) -> &[u8] {
        &self.previous[..usize::from(self.size)]
    }

    /// Register reference this channel was configured with.
    pub fn spec(&self) -> RegisterSpec {
        RegisterSpec::new(self.offset, self.control, self.size)
    }

    /// Make the next read report a change.
    ///
    /// Seeds the cache from the current value and flips one bit, so the
    /// comparison fails whatever the value is. Without a readable value the
    /// cache is flipped as is.
    pub fn force_change<M: Memory + ?Sized>(&mut self, memory: &M) {
        let size = usize::from(self.size);
        if let Some(target) = self.locate(memory) {
            let mut current = [0u8; MAX_VALUE_SIZE];
            if memory.read(target, &mut current[..size]).is_ok() {
                self.previous = current;
            }
        }
        self.previous[0] ^= 0x01;
    }

    /// Follow the pointer chain to the cell holding the value.
    fn locate<M: Memory + ?Sized>(&self, memory: &M) -> Option<Address> {
        let root = self.address?;
        follow(memory, root, self.depth)
    }

    /// Read the current value and compare it with the cache.
    ///
    /// Returns `None` (cache untouched) if the root is null, a pointer in the
    /// chain is null, or memory cannot be read.
    pub fn read<M: Memory + ?Sized>(&mut self, memory: &M) -> Option<Reading> {
        let target = self.locate(memory)?;
        let size = usize::from(self.size);
        let mut current = [0u8; MAX_VALUE_SIZE];
        if let Err(err) = memory.read(target, &mut current[..size]) {
            trace!(%target, error = %err, "channel read failed");
            return None;
        }

        let changed = current[..size] != self.previous[..size];
        if changed {
            self.previous[..size].copy_from_slice(&current[..size]);
        }
        Some(Reading {
            value: ChannelValue {
                bytes: current,
                len: self.size,
            },
            changed,
        })
    }

    /// Overwrite the value at the end of the pointer chain.
    ///
    /// Writes the first `size` bytes of `value`. Returns false, writing
    /// nothing, if the chain hits null, memory rejects the write, or `value`
    /// is shorter than the channel.
    pub fn write<M: Memory + ?Sized>(&self, memory: &mut M, value: &[u8]) -> bool {
        let size = usize::from(self.size);
        let Some(bytes) = value.get(..size) else {
            return false;
        };
        let Some(target) = self.locate(memory) else {
            return false;
        };
        match memory.write(target, bytes) {
            Ok(()) => true,
            Err(err) => {
                trace!(%target, error = %err, "channel write failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use dbgwire_frame::{Direction, SourceKind};

    use super::*;
    use crate::memory::SimulatedMemory;

    fn spec(depth: u8, size: u8) -> RegisterSpec {
        RegisterSpec::new(
            0,
            ControlByte::new(Direction::Read, SourceKind::AbsoluteAddress, depth),
            size,
        )
    }

    #[test]
    fn write_then_read_reports_change_once() {
        let mut mem = SimulatedMemory::new();
        let cell = mem.alloc_value(&[0, 0]);
        let mut chan = DebugChannel::bind(spec(0, 2), Some(cell));

        assert!(chan.write(&mut mem, &[0x34, 0x12]));

        let first = chan.read(&mem).unwrap();
        assert_eq!(first.value.as_slice(), &[0x34, 0x12]);
        assert!(first.changed);

        let second = chan.read(&mem).unwrap();
        assert_eq!(second.value.as_slice(), &[0x34, 0x12]);
        assert!(!second.changed);
    }

    #[test]
    fn pointer_chase_depth_two() {
        let mut mem = SimulatedMemory::new();
        let value = mem.alloc_value(&[0xAB]);
        let p2 = mem.alloc_ptr(Some(value));
        let p1 = mem.alloc_ptr(Some(p2));
        let root = mem.alloc_ptr(Some(p1));

        // root -> p1 -> p2 -> value: two hops from p1 land on value.
        let mut chan = DebugChannel::bind(spec(2, 1), Some(p1));
        let reading = chan.read(&mem).unwrap();
        assert_eq!(reading.value.as_slice(), &[0xAB]);
        assert!(reading.changed);

        // Three hops from root reach the same cell.
        let mut from_root = DebugChannel::bind(spec(3, 1), Some(root));
        assert_eq!(from_root.read(&mem).unwrap().value.as_slice(), &[0xAB]);
    }

    #[test]
    fn null_in_chain_leaves_cache_untouched() {
        let mut mem = SimulatedMemory::new();
        let value = mem.alloc_value(&[5]);
        let p2 = mem.alloc_ptr(Some(value));
        let p1 = mem.alloc_ptr(Some(p2));

        let mut chan = DebugChannel::bind(spec(2, 1), Some(p1));
        assert!(chan.read(&mem).is_some());
        let cached = chan.previous().to_vec();

        mem.store_ptr(p1, None).unwrap();
        mem.store(value, &[6]).unwrap();
        assert!(chan.read(&mem).is_none());
        assert_eq!(chan.previous(), cached.as_slice());
        assert!(!chan.write(&mut mem, &[9]));
        assert_eq!(mem.load(value, 1).unwrap(), vec![6]);
    }

    #[test]
    fn null_root_never_reads() {
        let mem = SimulatedMemory::new();
        let mut chan = DebugChannel::bind(spec(0, 4), None);
        assert!(chan.read(&mem).is_none());
        assert_eq!(chan.previous(), &[0, 0, 0, 0]);
    }

    #[test]
    fn write_through_pointer_hits_target() {
        let mut mem = SimulatedMemory::new();
        let value = mem.alloc_value(&[0, 0, 0, 0]);
        let ptr = mem.alloc_ptr(Some(value));

        let chan = DebugChannel::bind(spec(1, 4), Some(ptr));
        assert!(chan.write(&mut mem, &7u32.to_le_bytes()));
        assert_eq!(mem.load(value, 4).unwrap(), 7u32.to_le_bytes().to_vec());
        // The pointer cell itself is intact.
        assert_eq!(mem.load(ptr, 4).unwrap(), (value.get() as u32).to_le_bytes().to_vec());
    }

    #[test]
    fn short_value_is_not_written() {
        let mut mem = SimulatedMemory::new();
        let cell = mem.alloc_value(&[1, 1]);
        let chan = DebugChannel::bind(spec(0, 2), Some(cell));
        assert!(!chan.write(&mut mem, &[9]));
        assert_eq!(mem.load(cell, 2).unwrap(), vec![1, 1]);
    }

    #[test]
    fn force_change_always_reports_change() {
        let mut mem = SimulatedMemory::new();
        let cell = mem.alloc_value(&[1]);
        let mut chan = DebugChannel::bind(spec(0, 1), Some(cell));

        chan.force_change(&mem);
        let reading = chan.read(&mem).unwrap();
        assert!(reading.changed);
        assert_eq!(reading.value.as_slice(), &[1]);
        assert!(!chan.read(&mem).unwrap().changed);
    }

    #[test]
    fn size_is_clamped() {
        let chan = DebugChannel::bind(spec(0, 12), None);
        assert_eq!(usize::from(chan.size()), MAX_VALUE_SIZE);
    }

    #[test]
    fn channel_value_bounds() {
        assert!(ChannelValue::from_slice(&[0; 9]).is_none());
        assert_eq!(ChannelValue::from_slice(&[1, 2]).unwrap().as_slice(), &[1, 2]);
    }
}
