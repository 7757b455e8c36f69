use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde_json::Value;

use crate::context::RequestContext;

/// Errors reported by a generation backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Model loading or other startup work failed.
    #[error("initialization failed: {0}")]
    Init(String),

    /// Sampling failed.
    #[error("sampling failed: {0}")]
    Sample(String),

    /// Checkpoint conversion failed.
    #[error("conversion failed: {0}")]
    Convert(String),

    /// Work stopped because `cancel` was called.
    #[error("cancelled")]
    Cancelled,

    /// A pixel buffer did not match its declared dimensions.
    #[error("pixel buffer holds {actual} bytes, expected {expected} for {width}x{height} RGB")]
    InvalidPixels {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// A generated image: 8-bit RGB, row-major, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Bytes per pixel (RGB).
    pub const CHANNELS: usize = 3;

    /// Wrap raw RGB bytes, checking the length against the dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, BackendError> {
        let expected = width as usize * height as usize * Self::CHANNELS;
        if data.len() != expected {
            return Err(BackendError::InvalidPixels {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Receives a backend's output for one request.
///
/// The backend calls `progress` any number of times while it works, then
/// `image` once with the result.
pub trait SampleSink {
    /// Report that `step` of `total` steps is done.
    fn progress(&mut self, step: u32, total: u32);

    /// Deliver the generated image. `options` carries result placement.
    fn image(&mut self, image: PixelBuffer, options: Option<&Value>);
}

/// The generation engine a worker drives.
pub trait Backend: Send + Sync {
    /// Generate an image for a sampling request, reporting through `sink`.
    fn sample(&self, ctx: &RequestContext, sink: &mut dyn SampleSink) -> Result<(), BackendError>;

    /// Convert a checkpoint as described by the request.
    fn convert(&self, ctx: &RequestContext) -> Result<(), BackendError>;

    /// Ask in-flight work to stop. Best effort; there is no acknowledgement.
    fn cancel(&self);

    /// Ask the work for `request_id` to stop, and only that work.
    ///
    /// A cancel for a request that has not started yet must still stop it
    /// once it does; a cancel for a request that already finished must not
    /// touch whatever runs next. The default forwards to [`Backend::cancel`].
    fn cancel_request(&self, request_id: u64) {
        let _ = request_id;
        self.cancel();
    }
}

/// Builds the backend on the worker's init thread.
pub type BackendFactory = Box<dyn FnOnce() -> Result<Arc<dyn Backend>, BackendError> + Send>;

/// Shared slot for the backend, filled once initialization finishes.
///
/// Components created before the backend is ready (the response queue and
/// its emitter) hold a handle and see the backend once it is installed.
///
/// The handle also remembers which request is being dispatched, so a bare
/// [`cancel`](Self::cancel) is aimed at that request even if the backend has
/// not started on it yet.
#[derive(Clone, Default)]
pub struct BackendHandle {
    inner: Arc<OnceLock<Arc<dyn Backend>>>,
    // Request id being dispatched, 0 when idle.
    active: Arc<AtomicU64>,
}

impl BackendHandle {
    /// An empty handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that is ready immediately.
    pub fn ready(backend: Arc<dyn Backend>) -> Self {
        let handle = Self::new();
        handle.install(backend);
        handle
    }

    /// Install the backend. Returns `false` if one was already installed.
    pub fn install(&self, backend: Arc<dyn Backend>) -> bool {
        self.inner.set(backend).is_ok()
    }

    /// The backend, once ready.
    pub fn get(&self) -> Option<&Arc<dyn Backend>> {
        self.inner.get()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.get().is_some()
    }

    /// Mark `request_id` as dispatched until the guard is dropped.
    pub fn dispatch(&self, request_id: u64) -> Dispatch<'_> {
        self.active.store(request_id, Ordering::SeqCst);
        Dispatch {
            handle: self,
            request_id,
        }
    }

    /// The request currently being dispatched.
    pub fn active_request(&self) -> Option<u64> {
        match self.active.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    /// Cancel whatever is being dispatched. Returns `false` if no backend is
    /// installed yet.
    pub fn cancel(&self) -> bool {
        let Some(backend) = self.inner.get() else {
            return false;
        };
        match self.active_request() {
            Some(id) => backend.cancel_request(id),
            None => backend.cancel(),
        }
        true
    }

    /// Cancel `request_id` only. Returns `false` if no backend is installed yet.
    pub fn cancel_request(&self, request_id: u64) -> bool {
        match self.inner.get() {
            Some(backend) => {
                backend.cancel_request(request_id);
                true
            }
            None => false,
        }
    }
}

/// Clears the handle's active request on drop.
#[must_use]
pub struct Dispatch<'a> {
    handle: &'a BackendHandle,
    request_id: u64,
}

impl Drop for Dispatch<'_> {
    fn drop(&mut self) {
        let _ = self.handle.active.compare_exchange(
            self.request_id,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("ready", &self.is_ready())
            .field("active", &self.active_request())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::testing::RecordingBackend;

    /// Remembers which requests were cancelled.
    #[derive(Default)]
    struct Targets {
        bare: Mutex<usize>,
        requests: Mutex<Vec<u64>>,
    }

    impl Backend for Targets {
        fn sample(&self, _: &RequestContext, _: &mut dyn SampleSink) -> Result<(), BackendError> {
            Ok(())
        }

        fn convert(&self, _: &RequestContext) -> Result<(), BackendError> {
            Ok(())
        }

        fn cancel(&self) {
            *self.bare.lock().unwrap() += 1;
        }

        fn cancel_request(&self, request_id: u64) {
            self.requests.lock().unwrap().push(request_id);
        }
    }

    #[test]
    fn pixel_buffer_checks_length() {
        assert!(PixelBuffer::new(2, 2, vec![0; 12]).is_ok());
        let err = PixelBuffer::new(2, 2, vec![0; 11]).unwrap_err();
        assert_eq!(
            err,
            BackendError::InvalidPixels {
                width: 2,
                height: 2,
                expected: 12,
                actual: 11
            }
        );
    }

    #[test]
    fn handle_installs_once() {
        let handle = BackendHandle::new();
        assert!(!handle.is_ready());
        assert!(!handle.cancel());

        let first = Arc::new(RecordingBackend::default());
        assert!(handle.install(first.clone()));
        assert!(!handle.install(Arc::new(RecordingBackend::default())));

        assert!(handle.cancel());
        assert_eq!(first.cancels(), 1);
    }

    #[test]
    fn cancel_targets_the_dispatched_request() {
        let targets = Arc::new(Targets::default());
        let handle = BackendHandle::ready(targets.clone());

        {
            let _dispatch = handle.dispatch(7);
            assert_eq!(handle.active_request(), Some(7));
            assert!(handle.cancel());
        }
        assert_eq!(handle.active_request(), None);
        assert!(handle.cancel());

        assert_eq!(*targets.requests.lock().unwrap(), vec![7]);
        assert_eq!(*targets.bare.lock().unwrap(), 1);
    }

    #[test]
    fn default_request_cancel_falls_back_to_cancel() {
        let backend = Arc::new(RecordingBackend::default());
        let handle = BackendHandle::ready(backend.clone());
        assert!(handle.cancel_request(3));
        assert_eq!(backend.cancels(), 1);
    }
}
