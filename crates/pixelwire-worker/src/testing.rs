//! In-memory fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use bytes::BytesMut;
use pixelwire_frame::{is_sentinel, MessageDecoder};
use pixelwire_transport::{ConnectionId, Result as TransportResult, Transport, TransportError};
use serde_json::Value;

use crate::backend::{Backend, BackendError, PixelBuffer, SampleSink};
use crate::context::RequestContext;

/// The client a fresh [`RecordingTransport`] starts with.
pub const FIRST: ConnectionId = ConnectionId::new(1);

/// Records every frame sent to the current client; can be told to report a
/// dead connection, fail writes, switch clients, or hold sends back.
pub struct RecordingTransport {
    frames: Mutex<Vec<Vec<u8>>>,
    current: Mutex<Option<ConnectionId>>,
    dead: AtomicBool,
    fail_from_frame: Mutex<Option<usize>>,
    resets: AtomicUsize,
    held: (Mutex<bool>, Condvar),
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::default(),
            current: Mutex::new(Some(FIRST)),
            dead: AtomicBool::new(false),
            fail_from_frame: Mutex::default(),
            resets: AtomicUsize::new(0),
            held: (Mutex::new(false), Condvar::new()),
        })
    }

    /// The current client leaves and `next` takes its place with a healthy
    /// connection.
    pub fn switch_to(&self, next: ConnectionId) {
        *self.current.lock().unwrap() = Some(next);
        *self.fail_from_frame.lock().unwrap() = None;
        self.dead.store(false, Ordering::SeqCst);
    }

    /// Block every `send` until [`release`](Self::release).
    pub fn hold(&self) {
        *self.held.0.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.held.0.lock().unwrap() = false;
        self.held.1.notify_all();
    }

    /// Accept writes but report the connection as dead afterwards.
    pub fn report_dead(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    /// Make the write of frame number `index` (0-based) and later fail.
    pub fn fail_from_frame(&self, index: usize) {
        *self.fail_from_frame.lock().unwrap() = Some(index);
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Reassemble everything sent so far into JSON messages.
    pub fn messages(&self, packet_size: usize) -> Vec<Value> {
        let mut wire = BytesMut::new();
        for frame in self.frames() {
            assert_eq!(frame.len(), packet_size, "every frame must be packet_size long");
            wire.extend_from_slice(&frame);
        }
        let mut decoder = MessageDecoder::new(packet_size).unwrap();
        let mut out = Vec::new();
        while let Some(message) = decoder.decode(&mut wire).unwrap() {
            out.push(serde_json::from_slice(&message).unwrap());
        }
        assert!(wire.is_empty(), "trailing bytes without sentinel");
        out
    }

    pub fn sentinel_count(&self) -> usize {
        self.frames().iter().filter(|f| is_sentinel(f)).count()
    }
}

impl Transport for RecordingTransport {
    fn current(&self) -> Option<ConnectionId> {
        *self.current.lock().unwrap()
    }

    fn send(&self, connection: ConnectionId, frame: &[u8]) -> TransportResult<()> {
        let (lock, cvar) = &self.held;
        drop(cvar.wait_while(lock.lock().unwrap(), |held| *held).unwrap());

        match self.current() {
            Some(current) if current == connection => {}
            Some(_) => return Err(TransportError::StaleConnection(connection)),
            None => return Err(TransportError::NotConnected),
        }
        let mut frames = self.frames.lock().unwrap();
        if let Some(index) = *self.fail_from_frame.lock().unwrap() {
            if frames.len() >= index {
                self.dead.store(true, Ordering::SeqCst);
                return Err(TransportError::Shutdown);
            }
        }
        frames.push(frame.to_vec());
        Ok(())
    }

    fn is_live(&self, connection: ConnectionId) -> bool {
        self.current() == Some(connection) && !self.dead.load(Ordering::SeqCst)
    }

    fn reset_connection(&self, connection: ConnectionId) -> bool {
        let mut current = self.current.lock().unwrap();
        if *current != Some(connection) {
            return false;
        }
        *current = None;
        self.resets.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Counts calls; sampling emits `steps` progress reports and a 2x2 image.
#[derive(Default)]
pub struct RecordingBackend {
    samples: AtomicUsize,
    converts: AtomicUsize,
    cancels: AtomicUsize,
    steps: u32,
    last_request: Mutex<Option<Value>>,
}

impl RecordingBackend {
    pub fn with_steps(steps: u32) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    pub fn converts(&self) -> usize {
        self.converts.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Value> {
        self.last_request.lock().unwrap().clone()
    }
}

impl Backend for RecordingBackend {
    fn sample(&self, ctx: &RequestContext, sink: &mut dyn SampleSink) -> Result<(), BackendError> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(ctx.request().clone());
        for step in 1..=self.steps {
            sink.progress(step, self.steps);
        }
        if self.steps > 0 {
            sink.image(PixelBuffer::new(2, 2, vec![200; 12])?, ctx.options());
        }
        Ok(())
    }

    fn convert(&self, ctx: &RequestContext) -> Result<(), BackendError> {
        self.converts.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(ctx.request().clone());
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}
