use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::stream::WireStream;
use crate::traits::{ConnectionId, Transport};

#[derive(Debug)]
struct Attached {
    id: ConnectionId,
    stream: Arc<WireStream>,
    live: Arc<AtomicBool>,
}

/// The single active client connection of a worker.
///
/// The accept loop attaches a stream (keeping a clone for its receive loop)
/// and gets back the [`ConnectionId`] it must tag requests with. Senders
/// write through [`Transport::send`]; frames for any other id are refused.
/// `reset_connection` shuts the socket down, which ends the receive loop,
/// wakes a writer blocked on a full socket buffer, and frees the slot for
/// the next client.
#[derive(Debug, Default)]
pub struct ClientSlot {
    attached: Mutex<Option<Attached>>,
    // Serializes writers so frames from concurrent senders never interleave.
    // Never held together with `attached`.
    write_lock: Mutex<()>,
    next_id: AtomicU64,
    resets: AtomicU64,
}

impl ClientSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a freshly accepted client, replacing any previous one.
    pub fn attach(&self, stream: WireStream) -> ConnectionId {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let previous = self.lock().replace(Attached {
            id,
            stream: Arc::new(stream),
            live: Arc::new(AtomicBool::new(true)),
        });
        if let Some(previous) = previous {
            previous.live.store(false, Ordering::SeqCst);
            let _ = previous.stream.shutdown();
            debug!(previous = %previous.id, "replaced attached client");
        }
        debug!(connection = %id, "client attached to connection slot");
        id
    }

    /// Release `connection` after it disconnected on its own.
    ///
    /// Does nothing if another client has been attached since.
    pub fn detach(&self, connection: ConnectionId) {
        let mut guard = self.lock();
        if guard.as_ref().is_some_and(|a| a.id == connection) {
            if let Some(attached) = guard.take() {
                attached.live.store(false, Ordering::SeqCst);
            }
            debug!(%connection, "client detached");
        }
    }

    /// Number of times the connection was reset after a failed send.
    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Attached>> {
        self.attached.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stream and liveness flag of `connection`, if it is the attached client.
    fn target(&self, connection: ConnectionId) -> Result<(Arc<WireStream>, Arc<AtomicBool>)> {
        match self.lock().as_ref() {
            Some(attached) if attached.id == connection => {
                Ok((attached.stream.clone(), attached.live.clone()))
            }
            Some(_) => Err(TransportError::StaleConnection(connection)),
            None => Err(TransportError::NotConnected),
        }
    }
}

impl Transport for ClientSlot {
    fn current(&self) -> Option<ConnectionId> {
        self.lock().as_ref().map(|attached| attached.id)
    }

    fn send(&self, connection: ConnectionId, frame: &[u8]) -> Result<()> {
        let (stream, live) = self.target(connection)?;
        let _writer = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let result = write_frame(&stream, frame);
        if let Err(err) = &result {
            warn!(%connection, error = %err, "frame write failed; marking connection dead");
            live.store(false, Ordering::SeqCst);
        }
        result
    }

    fn is_live(&self, connection: ConnectionId) -> bool {
        self.target(connection)
            .is_ok_and(|(_, live)| live.load(Ordering::SeqCst))
    }

    fn reset_connection(&self, connection: ConnectionId) -> bool {
        let detached = {
            let mut guard = self.lock();
            if !guard.as_ref().is_some_and(|a| a.id == connection) {
                debug!(%connection, "reset skipped; client no longer attached");
                return false;
            }
            guard.take()
        };
        self.resets.fetch_add(1, Ordering::SeqCst);
        if let Some(attached) = detached {
            attached.live.store(false, Ordering::SeqCst);
            let _ = attached.stream.shutdown();
        }
        warn!(%connection, "connection reset; waiting for a new client");
        true
    }
}

fn write_frame(stream: &WireStream, frame: &[u8]) -> Result<()> {
    let mut out = stream;
    let mut offset = 0usize;
    while offset < frame.len() {
        match out.write(&frame[offset..]) {
            Ok(0) => return Err(TransportError::Shutdown),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransportError::Io(err)),
        }
    }
    loop {
        match out.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransportError::Io(err)),
        }
    }
}
