//! Inbound frame assembler.
//!
//! Raw bytes go into a fixed-capacity ring buffer, possibly from an interrupt
//! handler or a reader thread. The main loop scans what has arrived and pulls
//! complete messages out of it.
//!
//! The ring is single-producer/single-consumer. [`RingBuffer::split`] hands
//! out one [`Producer`] and one [`Consumer`]; indices are shared through
//! atomics with acquire/release ordering, so no lock or interrupt masking is
//! needed.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use tracing::{debug, trace};

use crate::codec::{FrameScanner, STX};
use crate::message::Message;

/// Ring capacity used by both endpoints unless configured otherwise.
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// Ring buffer with the default capacity.
pub type DefaultRingBuffer = RingBuffer<DEFAULT_RING_CAPACITY>;

struct Shared<const N: usize> {
    slots: [AtomicU8; N],
    push_index: AtomicUsize,
    /// Oldest slot the consumer still needs. The producer never writes over it.
    frame_start: AtomicUsize,
    overrun: AtomicBool,
}

#[derive(Debug, Default)]
struct ScanState {
    parse_index: usize,
    scanner: FrameScanner,
}

/// Fixed-capacity byte ring that assembles frames.
///
/// `N` must be a power of two so index wraparound is a mask. One slot is kept
/// free to tell a full ring from an empty one, so it holds at most `N - 1`
/// unparsed bytes.
pub struct RingBuffer<const N: usize> {
    shared: Shared<N>,
    scan: ScanState,
}

impl<const N: usize> RingBuffer<N> {
    const MASK: usize = {
        assert!(N.is_power_of_two(), "ring capacity must be a power of two");
        assert!(N >= 2, "ring capacity must be at least 2");
        N - 1
    };

    pub fn new() -> Self {
        let _ = Self::MASK;
        Self {
            shared: Shared {
                slots: [const { AtomicU8::new(0) }; N],
                push_index: AtomicUsize::new(0),
                frame_start: AtomicUsize::new(0),
                overrun: AtomicBool::new(false),
            },
            scan: ScanState::default(),
        }
    }

    /// Total slot count.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Split into the producer and consumer halves.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        (
            Producer {
                shared: &self.shared,
            },
            Consumer {
                shared: &self.shared,
                scan: &mut self.scan,
            },
        )
    }

    /// Append bytes; see [`Producer::push`].
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        self.split().0.push(bytes)
    }

    /// Pull the next complete message; see [`Consumer::try_decode_next`].
    pub fn try_decode_next(&mut self) -> Option<Message> {
        self.split().1.try_decode_next()
    }

    /// True if a byte was refused since the flag was last cleared.
    pub fn overrun(&self) -> bool {
        self.shared.overrun.load(Ordering::Acquire)
    }

    /// Read and clear the overrun flag.
    pub fn take_overrun(&self) -> bool {
        self.shared.overrun.swap(false, Ordering::AcqRel)
    }

    /// Bytes pushed but not yet scanned.
    pub fn pending(&self) -> usize {
        let push = self.shared.push_index.load(Ordering::Acquire);
        push.wrapping_sub(self.scan.parse_index) & Self::MASK
    }

    /// True while a start sentinel has been seen and its end sentinel has not.
    pub fn in_frame(&self) -> bool {
        self.scan.scanner.in_frame()
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> std::fmt::Debug for RingBuffer<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &N)
            .field("push_index", &self.shared.push_index.load(Ordering::Relaxed))
            .field("parse_index", &self.scan.parse_index)
            .field("frame_start", &self.shared.frame_start.load(Ordering::Relaxed))
            .field("in_frame", &self.scan.scanner.in_frame())
            .field("overrun", &self.overrun())
            .finish()
    }
}

/// Writing half of a [`RingBuffer`].
pub struct Producer<'a, const N: usize> {
    shared: &'a Shared<N>,
}

impl<const N: usize> Producer<'_, N> {
    /// Append one byte. Returns false, and sets the overrun flag, if the ring
    /// is full up to the latched frame start.
    pub fn push_byte(&mut self, byte: u8) -> bool {
        let mask = RingBuffer::<N>::MASK;
        let push = self.shared.push_index.load(Ordering::Relaxed);
        let next = (push + 1) & mask;
        if next == self.shared.frame_start.load(Ordering::Acquire) {
            self.shared.overrun.store(true, Ordering::Release);
            return false;
        }
        self.shared.slots[push].store(byte, Ordering::Relaxed);
        self.shared.push_index.store(next, Ordering::Release);
        true
    }

    /// Append bytes in order, stopping at the first refused byte.
    ///
    /// Returns how many bytes were accepted.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let mut accepted = 0;
        for &b in bytes {
            if !self.push_byte(b) {
                trace!(accepted, dropped = bytes.len() - accepted, "ring buffer overrun");
                break;
            }
            accepted += 1;
        }
        accepted
    }

    pub fn overrun(&self) -> bool {
        self.shared.overrun.load(Ordering::Acquire)
    }
}

/// Reading half of a [`RingBuffer`].
pub struct Consumer<'a, const N: usize> {
    shared: &'a Shared<N>,
    scan: &'a mut ScanState,
}

impl<const N: usize> Consumer<'_, N> {
    /// Scan unparsed bytes and return the next valid message, if any.
    ///
    /// A start sentinel (re)latches the frame start, abandoning any frame in
    /// progress. An end sentinel closes the candidate frame; if it fails to
    /// decode it is dropped and scanning continues. Call in a loop until it
    /// returns `None`.
    pub fn try_decode_next(&mut self) -> Option<Message> {
        let mask = RingBuffer::<N>::MASK;
        let push = self.shared.push_index.load(Ordering::Acquire);
        let mut found = None;

        while found.is_none() && self.scan.parse_index != push {
            let index = self.scan.parse_index;
            let byte = self.shared.slots[index].load(Ordering::Relaxed);

            if let Some(frame) = self.scan.scanner.step(byte) {
                match frame.and_then(|payload| Message::from_payload(&payload)) {
                    Ok(msg) => found = Some(msg),
                    Err(err) => debug!(error = %err, "dropping frame"),
                }
            }
            if byte == STX {
                self.shared.frame_start.store(index, Ordering::Release);
            }

            self.scan.parse_index = (index + 1) & mask;
            if !self.scan.scanner.in_frame() {
                self.shared
                    .frame_start
                    .store(self.scan.parse_index, Ordering::Release);
            }
        }

        found
    }

    /// True while a frame is open.
    pub fn in_frame(&self) -> bool {
        self.scan.scanner.in_frame()
    }

    /// Read and clear the overrun flag.
    pub fn take_overrun(&self) -> bool {
        self.shared.overrun.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ETX, MAX_DECODED_LEN};
    use crate::message::{Command, Message};

    fn wire(msg: &Message) -> Vec<u8> {
        msg.encode().unwrap().to_vec()
    }

    #[test]
    fn decodes_single_frame() {
        let msg = Message::with_params(7, 1, Command::Decimation, &[3]).unwrap();
        let mut ring = RingBuffer::<64>::new();
        assert_eq!(ring.push(&wire(&msg)), wire(&msg).len());

        assert_eq!(ring.try_decode_next(), Some(msg));
        assert_eq!(ring.try_decode_next(), None);
        assert_eq!(ring.pending(), 0);
    }

    #[test]
    fn garbage_partial_then_valid_frame_yields_one_message() {
        let first = Message::with_params(1, 1, Command::QueryRegister, &[1, 2, 3, 4, 0, 1])
            .unwrap();
        let second = Message::with_params(2, 9, Command::ConfigChannel, &[3, 1]).unwrap();

        let partial = wire(&first);
        let mut bytes = vec![0x00, 0x13, ETX, 0x42, 0x66];
        bytes.extend_from_slice(&partial[..partial.len() / 2]);
        bytes.extend_from_slice(&wire(&second));

        let mut ring = DefaultRingBuffer::new();
        ring.push(&bytes);

        assert_eq!(ring.try_decode_next(), Some(second));
        assert_eq!(ring.try_decode_next(), None);
    }

    #[test]
    fn multiple_frames_between_polls() {
        let a = Message::new(1, 1, Command::GetVersion);
        let b = Message::new(1, 2, Command::GetInfo);
        let c = Message::with_params(1, 3, Command::DebugString, b"hi").unwrap();

        let mut ring = DefaultRingBuffer::new();
        for msg in [&a, &b, &c] {
            ring.push(&wire(msg));
        }

        let decoded: Vec<_> = std::iter::from_fn(|| ring.try_decode_next()).collect();
        assert_eq!(decoded, vec![a, b, c]);
    }

    #[test]
    fn frame_split_across_pushes() {
        let msg = Message::with_params(5, 5, Command::WriteRegister, &[0x55; 10]).unwrap();
        let bytes = wire(&msg);
        let mut ring = RingBuffer::<256>::new();

        ring.push(&bytes[..4]);
        assert_eq!(ring.try_decode_next(), None);
        assert!(ring.in_frame());

        ring.push(&bytes[4..]);
        assert_eq!(ring.try_decode_next(), Some(msg));
        assert!(!ring.in_frame());
    }

    #[test]
    fn corrupt_frame_is_skipped() {
        let good = Message::new(3, 4, Command::ResetTime);
        let mut bad = wire(&Message::new(3, 3, Command::ResetTime));
        bad[2] ^= 0x01;

        let mut ring = DefaultRingBuffer::new();
        ring.push(&bad);
        ring.push(&wire(&good));

        assert_eq!(ring.try_decode_next(), Some(good));
        assert_eq!(ring.try_decode_next(), None);
    }

    #[test]
    fn overrun_refuses_and_flags() {
        let mut ring = RingBuffer::<8>::new();
        // Open a frame so the latched start stays at slot 0.
        ring.push(&[STX]);
        assert_eq!(ring.try_decode_next(), None);

        let accepted = ring.push(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(accepted, 6);
        assert!(ring.overrun());
        assert!(ring.take_overrun());
        assert!(!ring.overrun());
    }

    #[test]
    fn garbage_outside_frames_does_not_block_the_ring() {
        let mut ring = RingBuffer::<16>::new();
        for _ in 0..10 {
            assert_eq!(ring.push(&[0x01; 12]), 12);
            assert_eq!(ring.try_decode_next(), None);
        }
        assert!(!ring.overrun());

        let msg = Message::new(1, 0, Command::GetVersion);
        ring.push(&wire(&msg));
        assert_eq!(ring.try_decode_next(), Some(msg));
    }

    #[test]
    fn oversized_frame_is_abandoned() {
        let mut ring = DefaultRingBuffer::new();
        ring.push(&[STX]);
        ring.push(&[0x01; 200]);
        assert_eq!(ring.try_decode_next(), None);
        assert!(!ring.in_frame());

        let msg = Message::new(1, 0, Command::GetInfo);
        ring.push(&wire(&msg));
        assert_eq!(ring.try_decode_next(), Some(msg));
    }

    #[test]
    fn oversized_frame_releases_its_slots() {
        let mut ring = RingBuffer::<256>::new();
        ring.push(&[STX]);
        ring.push(&[0x01; MAX_DECODED_LEN + 1]);
        assert_eq!(ring.try_decode_next(), None);
        assert_eq!(ring.pending(), 0);

        assert_eq!(ring.push(&[0x02; 200]), 200);
        assert!(!ring.overrun());
    }

    #[test]
    fn producer_and_consumer_on_separate_threads() {
        let messages: Vec<Message> = (1..=50u8)
            .map(|i| Message::with_params(1, i, Command::DebugString, &[i; 20]).unwrap())
            .collect();
        let bytes: Vec<u8> = messages.iter().flat_map(|m| wire(m)).collect();

        let mut ring = RingBuffer::<128>::new();
        let (mut producer, mut consumer) = ring.split();

        let received = std::thread::scope(|scope| {
            scope.spawn(move || {
                let mut offset = 0;
                while offset < bytes.len() {
                    offset += producer.push(&bytes[offset..]);
                    std::thread::yield_now();
                }
            });

            let mut received = Vec::new();
            while received.len() < 50 {
                match consumer.try_decode_next() {
                    Some(msg) => received.push(msg),
                    None => std::thread::yield_now(),
                }
            }
            received
        });

        assert_eq!(received, messages);
    }
}
