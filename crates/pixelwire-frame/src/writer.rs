use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use pixelwire_transport::WireStream;

use crate::codec::{encode_message, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

/// Writes framed messages to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a writer with default configuration (1024-byte frames).
    pub fn new(inner: T) -> Result<Self> {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Result<Self> {
        if config.packet_size == 0 {
            return Err(FrameError::InvalidPacketSize(0));
        }
        Ok(Self {
            inner,
            buf: BytesMut::with_capacity(2 * config.packet_size),
            config,
        })
    }

    /// Frame and send a whole message, sentinel included (blocking).
    ///
    /// Returns the number of frames written.
    pub fn send_message(&mut self, payload: &[u8]) -> Result<usize> {
        self.buf.clear();
        let frames = encode_message(payload, self.config.packet_size, &mut self.buf)?;
        self.write_buffered()?;
        Ok(frames)
    }

    /// Write the encoded frames one at a time, then flush.
    ///
    /// A write timeout surfaces as `FrameError::Io` with `WouldBlock` or
    /// `TimedOut`; the frames already written stay on the wire.
    fn write_buffered(&mut self) -> Result<()> {
        let packet_size = self.config.packet_size;
        for frame in self.buf.chunks(packet_size) {
            write_frame(&mut self.inner, frame)?;
        }
        self.flush()
    }

    /// Flush the underlying stream, retrying on `Interrupted`.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                other => return other.map_err(FrameError::Io),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn write_frame<W: Write>(out: &mut W, mut frame: &[u8]) -> Result<()> {
    while !frame.is_empty() {
        match out.write(frame) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => frame = &frame[n..],
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}

impl FrameWriter<WireStream> {
    /// Create a writer for a socket stream and apply the write timeout from config.
    pub fn with_config_wire(inner: WireStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Self::with_config(inner, config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;

    use super::*;
    use crate::codec::is_sentinel;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
        writer.into_inner().into_inner()
    }

    #[test]
    fn message_is_padded_and_terminated() {
        let mut writer =
            FrameWriter::with_config(Cursor::new(Vec::new()), FrameConfig::with_packet_size(8))
                .unwrap();

        let frames = writer.send_message(b"0123456789").unwrap();
        assert_eq!(frames, 3);

        let bytes = written(writer);
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[..10], b"0123456789");
        assert!(bytes[10..16].iter().all(|&b| b == 0));
        assert!(is_sentinel(&bytes[16..]));
    }

    #[test]
    fn retries_interrupted_write_and_flush() {
        let mut writer = FrameWriter::with_config(
            ScriptedWriter::new(vec![Step::Interrupt, Step::Accept(3), Step::Interrupt]),
            FrameConfig::with_packet_size(8),
        )
        .unwrap();

        assert_eq!(writer.send_message(br#"{"a":1}"#).unwrap(), 2);

        let out = writer.into_inner();
        assert_eq!(out.data.len(), 16);
        assert_eq!(&out.data[..7], br#"{"a":1}"#);
        assert_eq!(out.flushes, 1);
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut writer = FrameWriter::new(ScriptedWriter::new(vec![Step::Accept(0)])).unwrap();
        let err = writer.send_message(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn write_timeout_is_an_error() {
        let mut writer =
            FrameWriter::new(ScriptedWriter::new(vec![Step::Fail(ErrorKind::WouldBlock)])).unwrap();
        let err = writer.send_message(b"x").unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn zero_packet_size_rejected() {
        let result =
            FrameWriter::with_config(Cursor::new(Vec::new()), FrameConfig::with_packet_size(0));
        assert!(matches!(result, Err(FrameError::InvalidPacketSize(0))));
    }

    enum Step {
        Interrupt,
        Accept(usize),
        Fail(ErrorKind),
    }

    /// Plays back scripted write results, then accepts everything.
    /// The first `Interrupt` left over after writing applies to flush.
    struct ScriptedWriter {
        script: VecDeque<Step>,
        data: Vec<u8>,
        flushes: usize,
    }

    impl ScriptedWriter {
        fn new(script: Vec<Step>) -> Self {
            Self {
                script: script.into(),
                data: Vec::new(),
                flushes: 0,
            }
        }
    }

    impl Write for ScriptedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = match self.script.front() {
                Some(Step::Interrupt) if self.data.is_empty() => {
                    self.script.pop_front();
                    return Err(ErrorKind::Interrupted.into());
                }
                Some(Step::Accept(n)) => {
                    let n = (*n).min(buf.len());
                    self.script.pop_front();
                    n
                }
                Some(Step::Fail(kind)) => {
                    let kind = *kind;
                    self.script.pop_front();
                    return Err(kind.into());
                }
                _ => buf.len(),
            };
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if matches!(self.script.front(), Some(Step::Interrupt)) {
                self.script.pop_front();
                return Err(ErrorKind::Interrupted.into());
            }
            self.flushes += 1;
            Ok(())
        }
    }
}
