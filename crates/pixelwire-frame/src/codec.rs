use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Default frame length in bytes.
pub const DEFAULT_PACKET_SIZE: usize = 1024;

/// Default ceiling for a reassembled inbound message: 64 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 64 * 1024 * 1024;

/// Number of content frames needed for a payload of `payload_len` bytes.
pub fn content_frame_count(payload_len: usize, packet_size: usize) -> usize {
    payload_len.div_ceil(packet_size)
}

/// Total frames on the wire for a payload: content frames plus the sentinel.
pub fn frame_count(payload_len: usize, packet_size: usize) -> usize {
    content_frame_count(payload_len, packet_size) + 1
}

/// The end-of-message frame: `packet_size` zero bytes.
pub fn sentinel(packet_size: usize) -> Bytes {
    Bytes::from(vec![0u8; packet_size])
}

/// True if `frame` is non-empty and entirely zero bytes.
pub fn is_sentinel(frame: &[u8]) -> bool {
    !frame.is_empty() && frame.iter().all(|&b| b == 0)
}

fn check_packet_size(packet_size: usize) -> Result<()> {
    if packet_size == 0 {
        return Err(FrameError::InvalidPacketSize(packet_size));
    }
    Ok(())
}

/// Encode a message into the wire format.
///
/// Wire format (packet_size = P):
/// ```text
/// ┌──────────────┬─────┬──────────────────────────┬──────────────┐
/// │ payload[0..P]│ ... │ payload[k*P..] + 0x00 pad │ P × 0x00     │
/// │ content      │     │ last content frame        │ sentinel     │
/// └──────────────┴─────┴──────────────────────────┴──────────────┘
/// ```
///
/// An empty payload encodes to the sentinel alone. Returns the number of
/// frames appended to `dst`.
pub fn encode_message(payload: &[u8], packet_size: usize, dst: &mut BytesMut) -> Result<usize> {
    check_packet_size(packet_size)?;

    let frames = frame_count(payload.len(), packet_size);
    dst.reserve(frames * packet_size);
    for chunk in payload.chunks(packet_size) {
        dst.put_slice(chunk);
        dst.put_bytes(0, packet_size - chunk.len());
    }
    dst.put_bytes(0, packet_size);
    Ok(frames)
}

/// Encode a message and split it into individual frames, sentinel last.
pub fn encode_frames(payload: &[u8], packet_size: usize) -> Result<Vec<Bytes>> {
    let mut buf = BytesMut::new();
    let frames = encode_message(payload, packet_size, &mut buf)?;
    let mut wire = buf.freeze();
    Ok((0..frames).map(|_| wire.split_to(packet_size)).collect())
}

/// Encode a payload into exactly one content frame followed by the sentinel.
///
/// Payloads longer than `packet_size` are cut at `packet_size`. Returns
/// `true` when that happened.
pub fn encode_single_frame(payload: &[u8], packet_size: usize, dst: &mut BytesMut) -> Result<bool> {
    check_packet_size(packet_size)?;

    let truncated = payload.len() > packet_size;
    let body = &payload[..payload.len().min(packet_size)];
    dst.reserve(2 * packet_size);
    dst.put_slice(body);
    dst.put_bytes(0, packet_size - body.len());
    dst.put_bytes(0, packet_size);
    Ok(truncated)
}

/// Incremental inbound reassembly: accumulates content frames until a
/// sentinel frame arrives.
///
/// Keeps track of how far the buffer has been scanned so repeated calls on
/// a growing buffer stay linear.
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    packet_size: usize,
    max_message_size: usize,
    scanned: usize,
}

impl MessageDecoder {
    /// Create a decoder with the default message ceiling.
    pub fn new(packet_size: usize) -> Result<Self> {
        Self::with_max_message(packet_size, DEFAULT_MAX_MESSAGE)
    }

    /// Create a decoder with an explicit message ceiling.
    pub fn with_max_message(packet_size: usize, max_message_size: usize) -> Result<Self> {
        check_packet_size(packet_size)?;
        Ok(Self {
            packet_size,
            max_message_size,
            scanned: 0,
        })
    }

    /// Frame length this decoder expects.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Try to take one complete message off the front of `src`.
    ///
    /// Returns `Ok(None)` until a sentinel frame has been buffered. On
    /// success the content frames and the sentinel are consumed and the
    /// payload is returned with its trailing zero padding removed.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let size = self.packet_size;
        while self.scanned + size <= src.len() {
            let frame_start = self.scanned;
            if is_sentinel(&src[frame_start..frame_start + size]) {
                let mut content = src.split_to(frame_start);
                let _ = src.split_to(size);
                self.scanned = 0;

                let end = content.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                content.truncate(end);
                return Ok(Some(content.freeze()));
            }

            self.scanned += size;
            if self.scanned > self.max_message_size {
                return Err(FrameError::MessageTooLarge {
                    size: self.scanned,
                    max: self.max_message_size,
                });
            }
        }
        Ok(None)
    }

    /// Bytes of an unfinished message currently held in the buffer.
    pub fn pending(&self) -> usize {
        self.scanned
    }
}

/// Decode one message from the front of `src` (stateless convenience).
pub fn decode_message(src: &mut BytesMut, packet_size: usize) -> Result<Option<Bytes>> {
    MessageDecoder::new(packet_size)?.decode(src)
}

/// Configuration for framed readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Fixed frame length in bytes. Default: 1024.
    pub packet_size: usize,
    /// Maximum reassembled inbound message size. Default: 64 MiB.
    pub max_message_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl FrameConfig {
    /// Default configuration with a specific frame length.
    pub fn with_packet_size(packet_size: usize) -> Self {
        Self {
            packet_size,
            ..Self::default()
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
