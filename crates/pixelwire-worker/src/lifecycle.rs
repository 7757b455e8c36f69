//! Worker construction, readiness and shutdown.
//!
//! Startup runs in two phases. The response queue's drain thread starts
//! first and is supervised for the worker's whole life. The backend is then
//! built on its own thread and [`Worker::start`] blocks on a [`Readiness`]
//! signal until it reports success or failure. Only then does the worker
//! accept requests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use pixelwire_transport::{ConnectionId, Transport};
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendError, BackendFactory, BackendHandle};
use crate::config::WorkerConfig;
use crate::emitter::ResponseEmitter;
use crate::error::{Result, WorkerError};
use crate::image::{ImageCodec, PngCodec};
use crate::progress::ProgressReporter;
use crate::queue::{self, QueueHealth, QueueReport, QueueWorker, ResponseQueue};
use crate::router::{DropReason, RequestRouter, RouteOutcome};
use crate::sender::FrameSender;

/// How long [`Worker::stop`] lets queued responses flush before it drops
/// the client to unblock a stalled write.
pub const STOP_FLUSH_GRACE: Duration = Duration::from_secs(2);

/// A one-way flag that waiting threads can block on.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter. Returns `false` if it was already set.
    pub fn trigger(&self) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock_flag(lock);
        let first = !*triggered;
        *triggered = true;
        cvar.notify_all();
        first
    }

    pub fn is_triggered(&self) -> bool {
        *lock_flag(&self.inner.0)
    }

    /// Block until triggered or `timeout` elapses. Returns whether it was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock_flag(lock);
        let result = cvar.wait_timeout_while(guard, timeout, |triggered| !*triggered);
        match result {
            Ok((triggered, _)) => *triggered,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

fn lock_flag(lock: &Mutex<bool>) -> MutexGuard<'_, bool> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The result of a startup phase that must finish before serving.
pub struct Readiness<T> {
    rx: Receiver<std::result::Result<T, BackendError>>,
}

impl<T: Send + 'static> Readiness<T> {
    /// Run `init` on a named thread and return a handle to its result.
    pub fn spawn<F>(name: &'static str, init: F) -> Result<Self>
    where
        F: FnOnce() -> std::result::Result<T, BackendError> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // The receiver may already be gone if the caller gave up waiting.
                let _ = tx.send(init());
            })
            .map_err(|source| WorkerError::Spawn { name, source })?;
        Ok(Self { rx })
    }

    /// Block until the phase finishes.
    pub fn wait(self) -> Result<T> {
        match self.rx.recv() {
            Ok(result) => result.map_err(|err| WorkerError::BackendInit(err.to_string())),
            Err(_) => Err(WorkerError::BackendInit(
                "initialization thread exited without reporting".to_string(),
            )),
        }
    }

    /// Block for at most `timeout`. `Ok(None)` means still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result
                .map(Some)
                .map_err(|err| WorkerError::BackendInit(err.to_string())),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::BackendInit(
                "initialization thread exited without reporting".to_string(),
            )),
        }
    }
}

/// A running generation worker bound to one transport.
pub struct Worker {
    config: WorkerConfig,
    backend: BackendHandle,
    queue: ResponseQueue,
    queue_worker: Mutex<Option<QueueWorker>>,
    router: RequestRouter,
    transport: Arc<dyn Transport>,
    shutdown: ShutdownSignal,
    stopped: AtomicBool,
}

impl Worker {
    /// Start a worker that encodes results as PNG.
    ///
    /// Blocks until the backend built by `factory` is ready.
    pub fn start(
        config: WorkerConfig,
        transport: Arc<dyn Transport>,
        factory: BackendFactory,
    ) -> Result<Self> {
        Self::start_with_codec(config, transport, factory, Arc::new(PngCodec))
    }

    /// Start a worker with a specific image codec.
    pub fn start_with_codec(
        config: WorkerConfig,
        transport: Arc<dyn Transport>,
        factory: BackendFactory,
        codec: Arc<dyn ImageCodec>,
    ) -> Result<Self> {
        config.validate()?;
        if config.do_timeout {
            warn!("do_timeout is set but has no effect");
        }
        if config.max_client_connections > 1 {
            warn!(
                max_client_connections = config.max_client_connections,
                "clients are served one at a time"
            );
        }

        let backend = BackendHandle::new();
        let shutdown = ShutdownSignal::new();
        let sender = Arc::new(FrameSender::new(transport.clone(), config.packet_size)?);
        let reporter = ProgressReporter::new(sender.clone());
        let emitter = ResponseEmitter::new(sender, codec.clone(), backend.clone());

        let (queue, queue_worker) =
            queue::spawn(config.response_queue_capacity, reporter, emitter)?;
        debug!(capacity = config.response_queue_capacity, "response queue started");

        info!(
            model_base_path = ?config.model_base_path,
            model_version = ?config.model_version,
            "initializing backend"
        );
        let ready = match Readiness::spawn("backend-init", factory) {
            Ok(readiness) => readiness.wait(),
            Err(err) => Err(err),
        };
        let instance: Arc<dyn Backend> = match ready {
            Ok(instance) => instance,
            Err(err) => {
                error!(%err, "backend initialization failed");
                queue.close();
                if let Err(join_err) = queue_worker.join() {
                    error!(%join_err, "response queue did not stop cleanly");
                }
                return Err(err);
            }
        };
        backend.install(instance);
        info!(
            packet_size = config.packet_size,
            image_format = codec.format_name(),
            "worker ready"
        );

        let router = RequestRouter::new(backend.clone(), queue.clone());
        Ok(Self {
            config,
            backend,
            queue,
            queue_worker: Mutex::new(Some(queue_worker)),
            router,
            transport,
            shutdown,
            stopped: AtomicBool::new(false),
        })
    }

    /// Route one reassembled message received on `connection`.
    pub fn handle(&self, connection: ConnectionId, raw: &[u8]) -> RouteOutcome {
        if self.shutdown.is_triggered() {
            debug!(%connection, bytes = raw.len(), "dropping request during shutdown");
            return RouteOutcome::Dropped(DropReason::ShuttingDown);
        }
        self.router.route(connection, raw)
    }

    /// Ask the backend to stop in-flight work. Fire and forget.
    pub fn cancel(&self) {
        if !self.backend.cancel() {
            debug!("cancel before backend ready");
        }
    }

    /// Stop the worker: signal shutdown, cancel the backend, flush the
    /// queue and drop the client. Safe to call more than once.
    ///
    /// A client that stops reading cannot hold this up for longer than
    /// [`STOP_FLUSH_GRACE`]: it is dropped, which fails the stalled write and
    /// lets the queue finish.
    pub fn stop(&self) -> Option<QueueReport> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return None;
        }
        info!("stopping worker");
        self.shutdown.trigger();
        self.backend.cancel();
        self.queue.close();
        if !self.wait_for_drain(STOP_FLUSH_GRACE) {
            warn!(grace = ?STOP_FLUSH_GRACE, "responses still pending; dropping client");
            self.reset_current();
        }
        let report = self.join_queue();
        self.reset_current();
        report
    }

    fn wait_for_drain(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while self.queue_health() == QueueHealth::Running {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    fn reset_current(&self) {
        if let Some(connection) = self.transport.current() {
            self.transport.reset_connection(connection);
        }
    }

    fn join_queue(&self) -> Option<QueueReport> {
        let queue_worker = self
            .queue_worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match queue_worker.map(QueueWorker::join) {
            Some(Ok(report)) => {
                info!(
                    delivered = report.delivered,
                    failed = report.failed,
                    discarded = report.discarded,
                    "response queue stopped"
                );
                Some(report)
            }
            Some(Err(err)) => {
                error!(%err, "response queue stopped abnormally");
                None
            }
            None => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_ready()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Block until shutdown is signalled or `timeout` elapses.
    pub fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        self.shutdown.wait_timeout(timeout)
    }

    /// A clone of the shutdown signal, for accept loops and signal handlers.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// State of the response queue's drain thread.
    pub fn queue_health(&self) -> QueueHealth {
        match &*self
            .queue_worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
        {
            Some(worker) => worker.health(),
            None => QueueHealth::Stopped,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::testing::{RecordingBackend, RecordingTransport, FIRST};

    fn config() -> WorkerConfig {
        WorkerConfig {
            packet_size: 256,
            ..WorkerConfig::default()
        }
    }

    fn factory(backend: Arc<RecordingBackend>) -> BackendFactory {
        Box::new(move || Ok(backend as Arc<dyn Backend>))
    }

    #[test]
    fn signal_wakes_waiter() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
        };
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn signal_wait_times_out() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn readiness_reports_init_failure() {
        let readiness =
            Readiness::<u32>::spawn("test-init", || Err(BackendError::Init("no model".into())))
                .unwrap();
        let err = readiness.wait().unwrap_err();
        assert!(matches!(err, WorkerError::BackendInit(msg) if msg.contains("no model")));
    }

    #[test]
    fn start_blocks_until_backend_ready() {
        let built = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(RecordingBackend::default());
        let factory: BackendFactory = {
            let built = built.clone();
            let backend = backend.clone();
            Box::new(move || {
                thread::sleep(Duration::from_millis(20));
                built.fetch_add(1, Ordering::SeqCst);
                Ok(backend as Arc<dyn Backend>)
            })
        };

        let worker = Worker::start(config(), RecordingTransport::new(), factory).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(worker.is_ready());
        assert_eq!(worker.queue_health(), QueueHealth::Running);
    }

    #[test]
    fn failed_init_is_an_error() {
        let factory: BackendFactory = Box::new(|| Err(BackendError::Init("missing weights".into())));
        let result = Worker::start(config(), RecordingTransport::new(), factory);
        assert!(matches!(result, Err(WorkerError::BackendInit(_))));
    }

    #[test]
    fn invalid_config_rejected_before_init() {
        let config = WorkerConfig {
            packet_size: 16,
            ..WorkerConfig::default()
        };
        let called = Arc::new(AtomicBool::new(false));
        let factory: BackendFactory = {
            let called = called.clone();
            Box::new(move || {
                called.store(true, Ordering::SeqCst);
                Ok(Arc::new(RecordingBackend::default()) as Arc<dyn Backend>)
            })
        };

        let result = Worker::start(config, RecordingTransport::new(), factory);
        assert!(matches!(result, Err(WorkerError::InvalidConfig(_))));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn handled_request_streams_progress_then_image() {
        let transport = RecordingTransport::new();
        let backend = Arc::new(RecordingBackend::with_steps(2));
        let worker = Worker::start(config(), transport.clone(), factory(backend.clone())).unwrap();

        let outcome = worker.handle(FIRST, br#"{"action": "img2img", "options": {"pos_x": 8}}"#);
        assert!(matches!(outcome, RouteOutcome::Sampled { .. }));

        let report = worker.stop().unwrap();
        assert_eq!(report.delivered, 3);

        let messages = transport.messages(256);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["action"], "PROGRESS");
        assert_eq!(messages[0]["step"], 1);
        assert_eq!(messages[1]["step"], 2);
        assert_eq!(messages[2]["reqtype"], "img2img");
        assert_eq!(messages[2]["pos_x"], 8);
        assert_eq!(messages[2]["pos_y"], 0);
    }

    #[test]
    fn stop_is_idempotent_and_drops_later_requests() {
        let transport = RecordingTransport::new();
        let backend = Arc::new(RecordingBackend::with_steps(1));
        let worker = Worker::start(config(), transport.clone(), factory(backend.clone())).unwrap();

        assert!(worker.stop().is_some());
        assert!(worker.stop().is_none());
        assert!(worker.is_shutting_down());
        assert!(worker.wait_for_shutdown(Duration::from_millis(1)));
        assert_eq!(transport.resets(), 1);
        assert_eq!(worker.queue_health(), QueueHealth::Stopped);

        let raw = serde_json::to_vec(&json!({"action": "txt2img"})).unwrap();
        let outcome = worker.handle(FIRST, &raw);
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::ShuttingDown));
        assert_eq!(backend.samples(), 0);
    }

    #[test]
    fn cancel_forwards_to_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let worker =
            Worker::start(config(), RecordingTransport::new(), factory(backend.clone())).unwrap();
        worker.cancel();
        assert_eq!(backend.cancels(), 1);
    }

    #[cfg(unix)]
    mod silent_client {
        use std::os::unix::net::UnixStream;

        use pixelwire_transport::{ClientSlot, WireStream};

        use super::*;
        use crate::backend::{PixelBuffer, SampleSink};
        use crate::context::RequestContext;

        /// Paints noise, which compresses badly and overflows the socket buffer.
        struct NoiseBackend;

        impl Backend for NoiseBackend {
            fn sample(
                &self,
                ctx: &RequestContext,
                sink: &mut dyn SampleSink,
            ) -> std::result::Result<(), BackendError> {
                let side = 512u32;
                let mut seed = 0x2545_f491_u32;
                let data = (0..side * side * 3)
                    .map(|_| {
                        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                        (seed >> 24) as u8
                    })
                    .collect();
                sink.image(PixelBuffer::new(side, side, data)?, ctx.options());
                Ok(())
            }

            fn convert(&self, _ctx: &RequestContext) -> std::result::Result<(), BackendError> {
                Ok(())
            }

            fn cancel(&self) {}
        }

        #[test]
        fn stop_returns_while_client_is_not_reading() {
            let slot = Arc::new(ClientSlot::new());
            let (server, _client) = UnixStream::pair().unwrap();
            let connection = slot.attach(WireStream::from_unix(server));
            let worker = Arc::new(
                Worker::start(
                    config(),
                    slot.clone(),
                    Box::new(|| Ok(Arc::new(NoiseBackend) as Arc<dyn Backend>)),
                )
                .unwrap(),
            );

            let outcome = worker.handle(connection, br#"{"action": "txt2img"}"#);
            assert!(matches!(outcome, RouteOutcome::Sampled { .. }));
            thread::sleep(Duration::from_millis(100));

            let (done_tx, done_rx) = mpsc::channel();
            let stopper = {
                let worker = worker.clone();
                thread::spawn(move || {
                    let _ = done_tx.send(worker.stop());
                })
            };
            let report = done_rx
                .recv_timeout(Duration::from_secs(10))
                .expect("stop should not wait on a silent client")
                .unwrap();
            stopper.join().unwrap();

            assert_eq!(report.delivered, 0);
            assert_eq!(report.failed + report.discarded, 1);
            assert_eq!(slot.current(), None);
        }
    }
}
