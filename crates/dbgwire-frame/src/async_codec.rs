//! `tokio_util::codec` adapter for use with `Framed`, `FramedRead` and `FramedWrite`.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::codec::FrameScanner;
use crate::error::FrameError;
use crate::message::Message;

/// Streaming codec for debug protocol messages.
///
/// Decoding follows the assembler's rules: a start sentinel opens (or
/// restarts) a frame, an end sentinel closes it, and frames that fail to
/// decode are dropped. Errors are never returned for bad frames, since that
/// would end the stream.
#[derive(Debug, Default)]
pub struct DebugCodec {
    scanner: FrameScanner,
    dropped_frames: u64,
}

impl DebugCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames dropped since the codec was created.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    fn drop_frame(&mut self, err: &FrameError) {
        self.dropped_frames += 1;
        debug!(error = %err, "dropping frame");
    }
}

impl Decoder for DebugCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut consumed = 0;
        let mut found = None;

        for &byte in src.iter() {
            consumed += 1;
            let Some(frame) = self.scanner.step(byte) else {
                continue;
            };
            match frame.and_then(|payload| Message::from_payload(&payload)) {
                Ok(msg) => {
                    found = Some(msg);
                    break;
                }
                Err(err) => self.drop_frame(&err),
            }
        }

        src.advance(consumed);
        Ok(found)
    }
}

impl Encoder<Message> for DebugCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst)
    }
}

impl Encoder<&Message> for DebugCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::message::Command;

    #[test]
    fn decode_across_partial_buffers() {
        let msg = Message::with_params(7, 2, Command::QueryRegister, &[1, 0, 0, 0, 0, 4]).unwrap();
        let wire = msg.encode().unwrap();

        let mut codec = DebugCodec::new();
        let mut buf = BytesMut::from(&wire[..5]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(&wire[5..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(msg));
    }

    #[test]
    fn decode_leaves_following_frames_in_buffer() {
        let a = Message::new(1, 1, Command::GetVersion);
        let b = Message::new(1, 2, Command::GetInfo);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&a.encode().unwrap());
        buf.extend_from_slice(&b.encode().unwrap());

        let mut codec = DebugCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(a));
        assert!(!buf.is_empty());
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b));
        assert!(buf.is_empty());
    }

    #[test]
    fn corrupt_frame_is_counted_and_skipped() {
        let good = Message::new(2, 2, Command::ResetTime);
        let mut bad = Message::new(2, 1, Command::ResetTime).encode().unwrap();
        bad[1] ^= 0x80;

        let mut buf = BytesMut::from(&bad[..]);
        buf.extend_from_slice(&good.encode().unwrap());

        let mut codec = DebugCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(good));
        assert_eq!(codec.dropped_frames(), 1);
    }

    #[test]
    fn oversized_frame_is_dropped_before_its_end() {
        let good = Message::new(4, 1, Command::GetVersion);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[crate::codec::STX]);
        buf.extend_from_slice(&[0x01; crate::codec::MAX_DECODED_LEN + 10]);
        buf.extend_from_slice(&[crate::codec::ETX]);
        buf.extend_from_slice(&good.encode().unwrap());

        let mut codec = DebugCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(good));
        assert_eq!(codec.dropped_frames(), 1);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (left, right) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(left, DebugCodec::new());
        let mut stream = FramedRead::new(right, DebugCodec::new());

        let msgs = vec![
            Message::with_params(3, 1, Command::ConfigChannel, &[0, 1, 4, 0, 0, 0, 0, 1]).unwrap(),
            Message::with_params(3, 2, Command::ReadChannelData, &[1]).unwrap(),
        ];
        for msg in &msgs {
            sink.send(msg).await.unwrap();
        }
        drop(sink);

        let received: Vec<Message> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(received, msgs);
    }
}
