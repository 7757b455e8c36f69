//! `tokio_util::codec` adapter for async clients and servers.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_message, FrameConfig, MessageDecoder};
use crate::error::{FrameError, Result};

/// Fixed-size frame codec for `FramedRead` / `FramedWrite`.
///
/// Decodes whole messages (padding stripped) and encodes each item as a
/// complete message ending in a sentinel frame.
#[derive(Debug, Clone)]
pub struct FixedFrameCodec {
    decoder: MessageDecoder,
}

impl FixedFrameCodec {
    /// Codec with the default message ceiling.
    pub fn new(packet_size: usize) -> Result<Self> {
        Ok(Self {
            decoder: MessageDecoder::new(packet_size)?,
        })
    }

    /// Codec built from a frame configuration.
    pub fn from_config(config: &FrameConfig) -> Result<Self> {
        Ok(Self {
            decoder: MessageDecoder::with_max_message(
                config.packet_size,
                config.max_message_size,
            )?,
        })
    }

    /// Frame length this codec uses.
    pub fn packet_size(&self) -> usize {
        self.decoder.packet_size()
    }
}

impl Decoder for FixedFrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        self.decoder.decode(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for FixedFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        encode_message(&item, self.packet_size(), dst).map(|_| ())
    }
}

impl Encoder<&[u8]> for FixedFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        encode_message(item, self.packet_size(), dst).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let mut sink = FramedWrite::new(client, FixedFrameCodec::new(16).unwrap());
        let mut stream = FramedRead::new(server, FixedFrameCodec::new(16).unwrap());

        sink.send(Bytes::from_static(br#"{"action":"inpaint"}"#))
            .await
            .unwrap();
        sink.send(Bytes::from_static(b"{}")).await.unwrap();
        drop(sink);

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), br#"{"action":"inpaint"}"#);
        assert_eq!(second.as_ref(), b"{}");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let mut wire = BytesMut::new();
        encode_message(b"cut short", 4, &mut wire).unwrap();
        wire.truncate(wire.len() - 4);

        let mut stream = FramedRead::new(&wire[..], FixedFrameCodec::new(4).unwrap());
        let result = stream.next().await.unwrap();
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn encoder_matches_blocking_encoding() {
        let mut codec = FixedFrameCodec::from_config(&FrameConfig::with_packet_size(8)).unwrap();
        let mut dst = BytesMut::new();
        Encoder::<&[u8]>::encode(&mut codec, b"abc", &mut dst).unwrap();

        let mut expected = BytesMut::new();
        encode_message(b"abc", 8, &mut expected).unwrap();
        assert_eq!(dst, expected);
    }
}
