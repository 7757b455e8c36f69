//! Fixed-size message framing for pixelwire.
//!
//! Every message on the wire is split into frames of exactly `packet_size`
//! bytes:
//! - content frames carry the payload, the last one zero-padded
//! - one all-zero sentinel frame marks the end of the message
//!
//! A payload of `n` bytes therefore always costs `ceil(n / packet_size) + 1`
//! frames. Payloads are JSON text, so they never contain the NUL bytes used
//! for padding.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    content_frame_count, decode_message, encode_frames, encode_message, encode_single_frame,
    frame_count, is_sentinel, sentinel, FrameConfig, MessageDecoder, DEFAULT_MAX_MESSAGE,
    DEFAULT_PACKET_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::FixedFrameCodec;
