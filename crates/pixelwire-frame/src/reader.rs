use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use pixelwire_transport::WireStream;
use tracing::trace;

use crate::codec::{FrameConfig, MessageDecoder};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete messages from any `Read` stream.
///
/// Handles partial reads internally; callers always get whole messages with
/// the padding removed.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    decoder: MessageDecoder,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a reader with default configuration (1024-byte frames).
    pub fn new(inner: T) -> Result<Self> {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Result<Self> {
        let decoder = MessageDecoder::with_max_message(config.packet_size, config.max_message_size)?;
        Ok(Self {
            inner,
            buf: BytesMut::with_capacity(config.packet_size.max(READ_CHUNK_SIZE)),
            decoder,
            config,
        })
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_message(&mut self) -> Result<Bytes> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(message) = self.decoder.decode(&mut self.buf)? {
                trace!(size = message.len(), "message reassembled");
                return Ok(message);
            }

            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<WireStream> {
    /// Create a reader for a socket stream and apply the read timeout from config.
    pub fn with_config_wire(inner: WireStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Self::with_config(inner, config)
    }
}

pub(crate) fn transport_to_frame_error(err: pixelwire_transport::TransportError) -> FrameError {
    match err {
        pixelwire_transport::TransportError::Io(io)
        | pixelwire_transport::TransportError::Accept(io) => FrameError::Io(io),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
