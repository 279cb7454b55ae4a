/// Capacity of the inbound debug text ring.
pub const TEXT_RING_CAPACITY: usize = 256;

/// Characters received through DebugString, waiting for the application.
///
/// When full, further characters are dropped until some are popped.
#[derive(Debug, Clone)]
pub struct TextRing {
    buf: [u8; TEXT_RING_CAPACITY],
    push_index: usize,
    pop_index: usize,
}

impl Default for TextRing {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRing {
    const MASK: usize = TEXT_RING_CAPACITY - 1;

    pub const fn new() -> Self {
        Self {
            buf: [0; TEXT_RING_CAPACITY],
            push_index: 0,
            pop_index: 0,
        }
    }

    /// Append `text`, stopping at the first character that does not fit.
    ///
    /// Returns the number of characters stored.
    pub fn push(&mut self, text: &[u8]) -> usize {
        let mut stored = 0;
        for &c in text {
            let next = (self.push_index + 1) & Self::MASK;
            if next == self.pop_index {
                break;
            }
            self.buf[self.push_index] = c;
            self.push_index = next;
            stored += 1;
        }
        stored
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.pop_index == self.push_index {
            return None;
        }
        let c = self.buf[self.pop_index];
        self.pop_index = (self.pop_index + 1) & Self::MASK;
        Some(c)
    }

    pub fn len(&self) -> usize {
        self.push_index.wrapping_sub(self.pop_index) & Self::MASK
    }

    pub fn is_empty(&self) -> bool {
        self.push_index == self.pop_index
    }
}
