use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{Backend, BackendError, PixelBuffer, SampleSink};
use crate::context::RequestContext;

const DEFAULT_STEPS: u32 = 4;
const DEFAULT_SIDE: u32 = 64;
const MAX_SIDE: u32 = 2048;

/// A deterministic backend that paints a gradient.
///
/// Reads `steps`, `W` and `H` from the request. Useful for exercising the
/// wire protocol without a model.
///
/// Cancellation is keyed by request id, so a cancel that lands before its
/// request starts still stops it, and a stale cancel never stops a later one.
#[derive(Debug, Default)]
pub struct DemoBackend {
    // Request ids; 0 means none.
    running: AtomicU64,
    cancelled: AtomicU64,
    step_delay: Duration,
}

impl DemoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep between steps, so cancellation can be observed.
    pub fn with_step_delay(step_delay: Duration) -> Self {
        Self {
            step_delay,
            ..Self::default()
        }
    }

    fn side(ctx: &RequestContext, field: &str) -> u32 {
        ctx.field(field)
            .and_then(Value::as_u64)
            .map(|v| v.clamp(1, MAX_SIDE as u64) as u32)
            .unwrap_or(DEFAULT_SIDE)
    }

    fn is_cancelled(&self, request_id: u64) -> bool {
        self.cancelled.load(Ordering::SeqCst) == request_id
    }

    fn paint(&self, ctx: &RequestContext, sink: &mut dyn SampleSink) -> Result<(), BackendError> {
        let steps = ctx
            .field("steps")
            .and_then(Value::as_u64)
            .map(|s| s.min(u32::MAX as u64) as u32)
            .unwrap_or(DEFAULT_STEPS);
        let width = ctx.width().map_or(DEFAULT_SIDE, |w| w.clamp(1, MAX_SIDE as u64) as u32);
        let height = Self::side(ctx, "H");

        for step in 1..=steps {
            if self.is_cancelled(ctx.id()) {
                info!(request_id = ctx.id(), step, "sampling cancelled");
                return Err(BackendError::Cancelled);
            }
            if !self.step_delay.is_zero() {
                thread::sleep(self.step_delay);
            }
            sink.progress(step, steps);
        }
        if self.is_cancelled(ctx.id()) {
            return Err(BackendError::Cancelled);
        }

        debug!(request_id = ctx.id(), width, height, "painting gradient");
        sink.image(Self::gradient(width, height)?, ctx.options());
        Ok(())
    }

    fn gradient(width: u32, height: u32) -> Result<PixelBuffer, BackendError> {
        let ramp = |pos: u32, len: u32| if len <= 1 { 0 } else { (pos * 255 / (len - 1)) as u8 };
        let mut data = Vec::with_capacity(width as usize * height as usize * PixelBuffer::CHANNELS);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[ramp(x, width), ramp(y, height), 128]);
            }
        }
        PixelBuffer::new(width, height, data)
    }
}

impl Backend for DemoBackend {
    fn sample(&self, ctx: &RequestContext, sink: &mut dyn SampleSink) -> Result<(), BackendError> {
        self.running.store(ctx.id(), Ordering::SeqCst);
        let result = self.paint(ctx, sink);
        let _ = self
            .running
            .compare_exchange(ctx.id(), 0, Ordering::SeqCst, Ordering::SeqCst);
        result
    }

    fn convert(&self, ctx: &RequestContext) -> Result<(), BackendError> {
        info!(
            request_id = ctx.id(),
            ckpt = ?ctx.field("ckpt"),
            "convert requested; nothing to do"
        );
        Ok(())
    }

    fn cancel(&self) {
        let running = self.running.load(Ordering::SeqCst);
        if running != 0 {
            self.cancel_request(running);
        }
    }

    fn cancel_request(&self, request_id: u64) {
        debug!(request_id, "cancel requested");
        self.cancelled.store(request_id, Ordering::SeqCst);
    }
}
