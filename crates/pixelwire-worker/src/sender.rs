use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use pixelwire_frame::{encode_frames, encode_single_frame};
use pixelwire_transport::{ConnectionId, Transport, TransportError};
use tracing::{debug, warn};

use crate::error::{Result, WorkerError};

/// Why a framed send did not reach the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// The payload could not be framed; nothing was written.
    Encode(String),
    /// A frame write failed.
    Write(String),
    /// Every frame was written but the connection is no longer live.
    ConnectionLost,
    /// The requesting client has left. Nothing reached any other client.
    ClientGone,
}

/// Result of sending one framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// All frames, sentinel included, were written on a live connection.
    Delivered { frames: usize },
    /// The message may be partially written. `frames_sent` counts the frames
    /// the transport accepted before the failure was detected.
    Failed {
        frames_sent: usize,
        reason: SendFailure,
    },
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// True if the failure means the connection itself is unusable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                reason: SendFailure::Write(_) | SendFailure::ConnectionLost,
                ..
            }
        )
    }
}

/// Frames messages at the worker's packet size and writes them to the transport.
pub struct FrameSender {
    transport: Arc<dyn Transport>,
    packet_size: usize,
}

impl FrameSender {
    pub fn new(transport: Arc<dyn Transport>, packet_size: usize) -> Result<Self> {
        if packet_size == 0 {
            return Err(WorkerError::InvalidConfig(
                "packet_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            transport,
            packet_size,
        })
    }

    /// Send a full message to `connection`: content frames then the sentinel.
    pub fn send_message(&self, connection: ConnectionId, payload: &[u8]) -> SendOutcome {
        match encode_frames(payload, self.packet_size) {
            Ok(frames) => self.send_frames(connection, &frames),
            Err(err) => SendOutcome::Failed {
                frames_sent: 0,
                reason: SendFailure::Encode(err.to_string()),
            },
        }
    }

    /// Send a payload as a single padded frame then the sentinel.
    ///
    /// Payloads longer than one frame are truncated.
    pub fn send_single_frame(&self, connection: ConnectionId, payload: &[u8]) -> SendOutcome {
        let mut buf = BytesMut::new();
        match encode_single_frame(payload, self.packet_size, &mut buf) {
            Ok(truncated) => {
                if truncated {
                    warn!(
                        size = payload.len(),
                        packet_size = self.packet_size,
                        "single-frame message truncated"
                    );
                }
                let mut wire = buf.freeze();
                let content = wire.split_to(self.packet_size);
                self.send_frames(connection, &[content, wire])
            }
            Err(err) => SendOutcome::Failed {
                frames_sent: 0,
                reason: SendFailure::Encode(err.to_string()),
            },
        }
    }

    fn send_frames(&self, connection: ConnectionId, frames: &[Bytes]) -> SendOutcome {
        for (sent, frame) in frames.iter().enumerate() {
            match self.transport.send(connection, frame) {
                Ok(()) => {}
                Err(TransportError::StaleConnection(_) | TransportError::NotConnected) => {
                    return SendOutcome::Failed {
                        frames_sent: sent,
                        reason: SendFailure::ClientGone,
                    }
                }
                Err(err) => {
                    return SendOutcome::Failed {
                        frames_sent: sent,
                        reason: SendFailure::Write(err.to_string()),
                    }
                }
            }
        }

        // A write can succeed into a socket the peer already closed; liveness
        // is checked once the whole message is out.
        if !self.transport.is_live(connection) {
            let reason = if self.transport.current() == Some(connection) {
                SendFailure::ConnectionLost
            } else {
                SendFailure::ClientGone
            };
            return SendOutcome::Failed {
                frames_sent: frames.len(),
                reason,
            };
        }

        debug!(%connection, frames = frames.len(), packet_size = self.packet_size, "message sent");
        SendOutcome::Delivered {
            frames: frames.len(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, FIRST};

    #[test]
    fn delivers_message_with_sentinel() {
        let transport = RecordingTransport::new();
        let sender = FrameSender::new(transport.clone(), 8).unwrap();

        let outcome = sender.send_message(FIRST, b"0123456789");
        assert_eq!(outcome, SendOutcome::Delivered { frames: 3 });
        assert_eq!(transport.frames().len(), 3);
        assert_eq!(transport.sentinel_count(), 1);
    }

    #[test]
    fn write_failure_stops_remaining_frames() {
        let transport = RecordingTransport::new();
        transport.fail_from_frame(1);
        let sender = FrameSender::new(transport.clone(), 4).unwrap();

        let outcome = sender.send_message(FIRST, b"abcdefghij");
        assert!(matches!(
            outcome,
            SendOutcome::Failed {
                frames_sent: 1,
                reason: SendFailure::Write(_)
            }
        ));
        assert!(outcome.is_connection_failure());
        assert_eq!(transport.frames().len(), 1);
    }

    #[test]
    fn dead_connection_detected_after_send() {
        let transport = RecordingTransport::new();
        transport.report_dead();
        let sender = FrameSender::new(transport.clone(), 16).unwrap();

        let outcome = sender.send_message(FIRST, b"{}");
        assert_eq!(
            outcome,
            SendOutcome::Failed {
                frames_sent: 2,
                reason: SendFailure::ConnectionLost
            }
        );
        assert_eq!(transport.frames().len(), 2);
    }

    #[test]
    fn single_frame_is_two_frames_on_the_wire() {
        let transport = RecordingTransport::new();
        let sender = FrameSender::new(transport.clone(), 4).unwrap();

        let outcome = sender.send_single_frame(FIRST, b"overflowing");
        assert_eq!(outcome, SendOutcome::Delivered { frames: 2 });
        let frames = transport.frames();
        assert_eq!(frames[0], b"over");
        assert_eq!(frames[1], vec![0u8; 4]);
    }

    #[test]
    fn reply_for_departed_client_is_not_sent_to_its_successor() {
        let transport = RecordingTransport::new();
        transport.switch_to(ConnectionId::new(2));
        let sender = FrameSender::new(transport.clone(), 8).unwrap();

        let outcome = sender.send_message(FIRST, b"stale reply");
        assert_eq!(
            outcome,
            SendOutcome::Failed {
                frames_sent: 0,
                reason: SendFailure::ClientGone
            }
        );
        assert!(!outcome.is_connection_failure());
        assert!(transport.frames().is_empty());
    }

    #[test]
    fn zero_packet_size_rejected() {
        let result = FrameSender::new(RecordingTransport::new(), 0);
        assert!(matches!(result, Err(WorkerError::InvalidConfig(_))));
    }
}
