use dbgwire_frame::{MessageBuilder, UpdateMode, CHANNEL_COUNT};
use tracing::warn;

use crate::channel::DebugChannel;
use crate::memory::Memory;

/// Which forced modes a telemetry scan should honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanTrigger {
    /// A slow boundary is due, so `Periodic` channels are sent.
    pub slow: bool,
    /// The send-once flag is set, so `SendOnce` channels are sent.
    pub once: bool,
}

/// The 16 read-side debug channel slots of a target.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    slots: [DebugChannel; CHANNEL_COUNT],
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` for indices above 15.
    pub fn get(&self, index: u8) -> Option<&DebugChannel> {
        self.slots.get(usize::from(index))
    }

    pub fn get_mut(&mut self, index: u8) -> Option<&mut DebugChannel> {
        self.slots.get_mut(usize::from(index))
    }

    /// Replace slot `index` wholesale. Returns false for indices above 15.
    pub fn replace(&mut self, index: u8, channel: DebugChannel) -> bool {
        match self.get_mut(index) {
            Some(slot) => {
                *slot = channel;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &DebugChannel)> {
        (0u8..).zip(self.slots.iter())
    }

    /// Slots whose mode is not `Off`.
    pub fn active(&self) -> usize {
        self.slots
            .iter()
            .filter(|c| c.mode() != UpdateMode::Off)
            .count()
    }

    /// Read every channel from 15 down to 0 and append the values that
    /// should be sent to `out`.
    ///
    /// Every channel is read, sent or not, so the change cache stays current.
    /// Returns the mask of channels whose value was appended. A channel whose
    /// value cannot be read, or no longer fits in the message, is left out.
    pub fn scan<M: Memory + ?Sized>(
        &mut self,
        memory: &M,
        trigger: ScanTrigger,
        out: &mut MessageBuilder,
    ) -> u16 {
        let mut mask = 0u16;

        for index in (0..CHANNEL_COUNT).rev() {
            let channel = &mut self.slots[index];
            let mode = channel.mode();
            let reading = channel.read(memory);

            let forced = match mode {
                UpdateMode::SendAll => true,
                UpdateMode::Periodic => trigger.slow,
                UpdateMode::SendOnce => trigger.once,
                UpdateMode::Off | UpdateMode::OnChange => false,
            };

            let Some(reading) = reading else {
                continue;
            };
            let wanted = forced || (mode == UpdateMode::OnChange && reading.changed);
            if !wanted {
                continue;
            }

            let value = reading.value.as_slice();
            if value.len() > out.remaining() {
                warn!(channel = index, "telemetry frame full; channel value left out");
                continue;
            }
            out.push_bytes(value);
            mask |= 1 << index;
        }

        mask
    }
}

#[cfg(test)]
mod tests {
    use dbgwire_frame::{Command, ControlByte, Direction, RegisterSpec, SourceKind};

    use super::*;
    use crate::memory::{Address, SimulatedMemory};

    fn bind(mem_addr: Address, size: u8, mode: UpdateMode) -> DebugChannel {
        let ctrl = ControlByte::new(Direction::Read, SourceKind::AbsoluteAddress, 0);
        let mut chan = DebugChannel::bind(RegisterSpec::new(0, ctrl, size), Some(mem_addr));
        chan.set_mode(mode);
        chan
    }

    fn builder() -> MessageBuilder {
        MessageBuilder::new(1, 0, Command::ReadChannelData)
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut reg = ChannelRegistry::new();
        assert!(reg.get(15).is_some());
        assert!(reg.get(16).is_none());
        assert!(!reg.replace(16, DebugChannel::default()));
    }

    #[test]
    fn scan_orders_values_descending() {
        let mut mem = SimulatedMemory::new();
        let a = mem.alloc_value(&[0x0A]);
        let b = mem.alloc_value(&[0x0B, 0x0B]);

        let mut reg = ChannelRegistry::new();
        reg.replace(2, bind(a, 1, UpdateMode::SendAll));
        reg.replace(9, bind(b, 2, UpdateMode::SendAll));

        let mut out = builder();
        let mask = reg.scan(&mem, ScanTrigger::default(), &mut out);
        assert_eq!(mask, (1 << 9) | (1 << 2));

        let msg = out.finish().unwrap();
        assert_eq!(msg.params.as_slice(), &[0x0B, 0x0B, 0x0A]);
    }

    #[test]
    fn on_change_only_when_changed() {
        let mut mem = SimulatedMemory::new();
        let cell = mem.alloc_value(&[5]);
        let mut reg = ChannelRegistry::new();
        reg.replace(0, bind(cell, 1, UpdateMode::OnChange));

        assert_eq!(reg.scan(&mem, ScanTrigger::default(), &mut builder()), 1);
        assert_eq!(reg.scan(&mem, ScanTrigger::default(), &mut builder()), 0);

        mem.store(cell, &[6]).unwrap();
        assert_eq!(reg.scan(&mem, ScanTrigger::default(), &mut builder()), 1);
    }

    #[test]
    fn forced_modes_follow_trigger() {
        let mut mem = SimulatedMemory::new();
        let cell = mem.alloc_value(&[1]);
        let mut reg = ChannelRegistry::new();
        reg.replace(1, bind(cell, 1, UpdateMode::Periodic));
        reg.replace(3, bind(cell, 1, UpdateMode::SendOnce));

        let none = ScanTrigger::default();
        let slow = ScanTrigger {
            slow: true,
            once: false,
        };
        let once = ScanTrigger {
            slow: false,
            once: true,
        };

        assert_eq!(reg.scan(&mem, none, &mut builder()), 0);
        assert_eq!(reg.scan(&mem, slow, &mut builder()), 1 << 1);
        assert_eq!(reg.scan(&mem, once, &mut builder()), 1 << 3);
    }

    #[test]
    fn off_channels_are_still_read() {
        let mut mem = SimulatedMemory::new();
        let cell = mem.alloc_value(&[1]);
        let mut reg = ChannelRegistry::new();
        reg.replace(4, bind(cell, 1, UpdateMode::Off));

        assert_eq!(reg.scan(&mem, ScanTrigger::default(), &mut builder()), 0);
        assert_eq!(reg.get(4).unwrap().previous(), &[1]);
    }

    #[test]
    fn unreadable_forced_channel_is_left_out() {
        let mem = SimulatedMemory::new();
        let mut reg = ChannelRegistry::new();
        let mut chan = DebugChannel::default();
        chan.set_mode(UpdateMode::SendAll);
        reg.replace(7, chan);

        assert_eq!(reg.scan(&mem, ScanTrigger::default(), &mut builder()), 0);
    }

    #[test]
    fn full_frame_drops_extra_channels() {
        let mut mem = SimulatedMemory::new();
        let cell = mem.alloc_value(&[0x11; 8]);
        let mut reg = ChannelRegistry::new();
        for i in 0..16 {
            reg.replace(i, bind(cell, 8, UpdateMode::SendAll));
        }

        let mut out = builder();
        out.push_u24_le(0).push_u16_le(0);
        let mask = reg.scan(&mem, ScanTrigger::default(), &mut out);

        // 5 header bytes + 14 * 8 = 117 fits, a 15th value does not.
        assert_eq!(mask.count_ones(), 14);
        assert_eq!(mask & 0b11, 0);
        assert!(out.finish().is_ok());
    }
}
