//! Bounded hand-off between backend callbacks and the connection.
//!
//! Backend sinks push [`Outbound`] items into a fixed-capacity channel and
//! block while it is full, so a slow client slows the backend down instead
//! of growing memory. A single drain thread sends items in order, which
//! keeps every request's progress ahead of its result on the wire.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{PixelBuffer, SampleSink};
use crate::context::RequestContext;
use crate::emitter::ResponseEmitter;
use crate::error::{Result, WorkerError};
use crate::progress::ProgressReporter;
use crate::sender::{SendFailure, SendOutcome};

/// A message waiting to be sent.
#[derive(Debug)]
pub enum Outbound {
    Progress {
        ctx: Arc<RequestContext>,
        step: u32,
        total: u32,
    },
    Image {
        ctx: Arc<RequestContext>,
        image: PixelBuffer,
        options: Option<Value>,
    },
}

impl Outbound {
    pub fn context(&self) -> &RequestContext {
        match self {
            Self::Progress { ctx, .. } | Self::Image { ctx, .. } => ctx,
        }
    }
}

/// Producer side of the response channel. Cheap to clone.
#[derive(Clone)]
pub struct ResponseQueue {
    tx: Arc<Mutex<Option<SyncSender<Outbound>>>>,
}

impl ResponseQueue {
    /// Queue an item, blocking while the queue is full.
    ///
    /// Returns `false` if the queue has been closed or the drain thread is gone.
    pub fn push(&self, item: Outbound) -> bool {
        // Clone the sender out so a blocked producer does not hold the lock
        // that `close` needs.
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match tx {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }

    /// Stop accepting items. The drain thread exits once queued items are sent.
    pub fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// A backend sink that queues everything under `ctx`.
    pub fn sink(&self, ctx: Arc<RequestContext>) -> RequestSink {
        RequestSink {
            queue: self.clone(),
            ctx,
        }
    }
}

impl std::fmt::Debug for ResponseQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseQueue")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// [`SampleSink`] for one request.
pub struct RequestSink {
    queue: ResponseQueue,
    ctx: Arc<RequestContext>,
}

impl SampleSink for RequestSink {
    fn progress(&mut self, step: u32, total: u32) {
        let queued = self.queue.push(Outbound::Progress {
            ctx: self.ctx.clone(),
            step,
            total,
        });
        if !queued {
            debug!(request_id = self.ctx.id(), step, "queue closed, progress dropped");
        }
    }

    fn image(&mut self, image: PixelBuffer, options: Option<&Value>) {
        let queued = self.queue.push(Outbound::Image {
            ctx: self.ctx.clone(),
            image,
            options: options.cloned(),
        });
        if !queued {
            warn!(request_id = self.ctx.id(), "queue closed, image dropped");
        }
    }
}

/// Counts kept by the drain thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub delivered: usize,
    pub failed: usize,
    /// Items skipped because an earlier send for the same request failed or
    /// because the client they were meant for has left.
    pub discarded: usize,
}

/// Observable state of the drain thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueHealth {
    Running,
    /// The thread returned or panicked and has not been joined yet.
    Exited,
    /// The thread has been joined.
    Stopped,
}

/// Handle to the drain thread.
#[derive(Debug)]
pub struct QueueWorker {
    handle: JoinHandle<QueueReport>,
}

impl QueueWorker {
    pub fn health(&self) -> QueueHealth {
        if self.handle.is_finished() {
            QueueHealth::Exited
        } else {
            QueueHealth::Running
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Wait for the thread to exit. It only exits after the queue is closed.
    pub fn join(self) -> Result<QueueReport> {
        self.handle
            .join()
            .map_err(|_| WorkerError::QueueWorkerPanicked)
    }
}

/// Start the drain thread and return both ends.
pub fn spawn(
    capacity: usize,
    reporter: ProgressReporter,
    emitter: ResponseEmitter,
) -> Result<(ResponseQueue, QueueWorker)> {
    let (tx, rx) = mpsc::sync_channel(capacity);
    let handle = thread::Builder::new()
        .name("response-queue".to_string())
        .spawn(move || drain(rx, &reporter, &emitter))
        .map_err(|source| WorkerError::Spawn {
            name: "response-queue",
            source,
        })?;
    let queue = ResponseQueue {
        tx: Arc::new(Mutex::new(Some(tx))),
    };
    Ok((queue, QueueWorker { handle }))
}

fn drain(
    rx: Receiver<Outbound>,
    reporter: &ProgressReporter,
    emitter: &ResponseEmitter,
) -> QueueReport {
    let mut report = QueueReport::default();
    let mut failed_request: Option<u64> = None;

    while let Ok(item) = rx.recv() {
        let request_id = item.context().id();
        if failed_request == Some(request_id) {
            report.discarded += 1;
            continue;
        }

        let outcome = match &item {
            Outbound::Progress { ctx, step, total } => {
                let outcome = reporter.report(ctx, *step, *total);
                // The emitter recovers its own failures; progress failures
                // are recovered here.
                if outcome.is_connection_failure() {
                    emitter.recover(ctx);
                }
                outcome
            }
            Outbound::Image {
                ctx,
                image,
                options,
            } => emitter.emit(ctx, image, options.as_ref()),
        };

        match outcome {
            SendOutcome::Delivered { .. } => report.delivered += 1,
            SendOutcome::Failed {
                reason: SendFailure::ClientGone,
                ..
            } => {
                report.discarded += 1;
                failed_request = Some(request_id);
            }
            SendOutcome::Failed { .. } => {
                report.failed += 1;
                failed_request = Some(request_id);
            }
        }
    }

    debug!(
        delivered = report.delivered,
        failed = report.failed,
        discarded = report.discarded,
        "response queue drained"
    );
    report
}
