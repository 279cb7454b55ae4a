use dbgwire_frame::{RegisterSpec, UpdateMode, INFO_TIMESTAMP_TYPE, RS};

/// Identity a node reports in its GetVersion reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub protocol_version: [u8; 4],
    pub app_version: [u8; 4],
    pub name: String,
    pub serial: String,
}

impl VersionInfo {
    /// Parse a GetVersion reply body. `None` if it is truncated.
    pub fn parse(params: &[u8]) -> Option<Self> {
        let (protocol_version, rest) = split_array::<4>(params)?;
        let (app_version, rest) = split_array::<4>(rest)?;
        let (name, rest) = split_len_prefixed(rest)?;
        let (serial, _) = split_len_prefixed(rest)?;
        Some(Self {
            protocol_version,
            app_version,
            name: String::from_utf8_lossy(name).into_owned(),
            serial: String::from_utf8_lossy(serial).into_owned(),
        })
    }
}

/// Native type sizes and tick length a node reports in its GetInfo reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// `(type id, size in bytes)` in the order received.
    pub type_sizes: Vec<(u8, u8)>,
    /// Microseconds per timestamp tick.
    pub tick_us: Option<u32>,
}

impl DeviceInfo {
    /// Parse a GetInfo reply body.
    ///
    /// Records are `[type, size, RS]`, except the timestamp record which is
    /// `[10, u32 LE]`. Parsing follows the record structure, so a size or
    /// tick byte equal to `RS` does not split anything. `None` if a record is
    /// malformed.
    pub fn parse(params: &[u8]) -> Option<Self> {
        let mut info = Self::default();
        let mut rest = params;

        while let Some((&type_id, tail)) = rest.split_first() {
            if type_id == INFO_TIMESTAMP_TYPE {
                let (tick, tail) = split_array::<4>(tail)?;
                info.tick_us = Some(u32::from_le_bytes(tick));
                rest = tail.strip_prefix(&[RS]).unwrap_or(tail);
                continue;
            }
            match tail {
                [size, sep, tail @ ..] if *sep == RS => {
                    info.type_sizes.push((type_id, *size));
                    rest = tail;
                }
                _ => return None,
            }
        }

        Some(info)
    }

    /// Reported size of `type_id`.
    pub fn size_of(&self, type_id: u8) -> Option<u8> {
        self.type_sizes
            .iter()
            .find(|(id, _)| *id == type_id)
            .map(|(_, size)| *size)
    }
}

fn split_array<const N: usize>(bytes: &[u8]) -> Option<([u8; N], &[u8])> {
    if bytes.len() < N {
        return None;
    }
    let (head, tail) = bytes.split_at(N);
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Some((out, tail))
}

fn split_len_prefixed(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let (&len, rest) = bytes.split_first()?;
    let len = usize::from(len);
    if rest.len() < len {
        return None;
    }
    Some(rest.split_at(len))
}

/// Host copy of one configured debug channel on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostChannel {
    pub slot: u8,
    pub spec: RegisterSpec,
    pub mode: UpdateMode,
    /// Last value received in telemetry.
    pub last_value: Option<Vec<u8>>,
}

/// A target node discovered on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuNode {
    pub id: u8,
    pub version: VersionInfo,
    pub info: Option<DeviceInfo>,
    /// Last decimation the node reported.
    pub decimation: Option<u8>,
    /// Valid messages received from this node.
    pub messages: u64,
    /// Messages from this node that could not be interpreted.
    pub invalid_messages: u64,
    channels: Vec<HostChannel>,
    last_msg_id: u8,
}

impl CpuNode {
    pub fn new(id: u8, version: VersionInfo) -> Self {
        Self {
            id,
            version,
            info: None,
            decimation: None,
            messages: 0,
            invalid_messages: 0,
            channels: Vec::new(),
            last_msg_id: 0,
        }
    }

    /// Next message id for this node. Wraps and never returns 0.
    pub fn next_msg_id(&mut self) -> u8 {
        self.last_msg_id = match self.last_msg_id.wrapping_add(1) {
            0 => 1,
            id => id,
        };
        self.last_msg_id
    }

    /// Configured channels, ordered by slot.
    pub fn channels(&self) -> &[HostChannel] {
        &self.channels
    }

    pub fn channel(&self, slot: u8) -> Option<&HostChannel> {
        self.channels.iter().find(|c| c.slot == slot)
    }

    pub fn channel_mut(&mut self, slot: u8) -> Option<&mut HostChannel> {
        self.channels.iter_mut().find(|c| c.slot == slot)
    }

    /// Channel already bound to `spec`, if any.
    pub fn channel_for(&self, spec: &RegisterSpec) -> Option<&HostChannel> {
        self.channels.iter().find(|c| c.spec == *spec)
    }

    /// Lowest slot below `max` with no channel.
    pub fn free_slot(&self, max: usize) -> Option<u8> {
        (0u8..)
            .take(max)
            .find(|slot| self.channel(*slot).is_none())
    }

    /// Insert or replace the channel in `channel.slot`.
    pub fn upsert_channel(&mut self, channel: HostChannel) {
        match self.channels.iter().position(|c| c.slot >= channel.slot) {
            Some(i) if self.channels[i].slot == channel.slot => self.channels[i] = channel,
            Some(i) => self.channels.insert(i, channel),
            None => self.channels.push(channel),
        }
    }

    pub fn remove_channel(&mut self, slot: u8) -> Option<HostChannel> {
        let index = self.channels.iter().position(|c| c.slot == slot)?;
        Some(self.channels.remove(index))
    }
}
