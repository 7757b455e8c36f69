//! Generation worker core for pixelwire.
//!
//! A worker receives JSON requests, hands them to a generation [`Backend`],
//! and streams progress and the final image back to the client as framed
//! messages. Every stage carries an explicit [`RequestContext`]; nothing
//! about the request in flight is stored on the worker itself.
//!
//! Flow: raw bytes → [`RequestRouter`] → backend (with a per-request sink) →
//! bounded [`ResponseQueue`] → [`ProgressReporter`] / [`ResponseEmitter`] →
//! [`FrameSender`] → transport.

pub mod action;
pub mod backend;
pub mod config;
pub mod context;
pub mod demo;
pub mod emitter;
pub mod error;
pub mod image;
pub mod lifecycle;
pub mod message;
pub mod progress;
pub mod queue;
pub mod router;
pub mod sender;

#[cfg(test)]
pub(crate) mod testing;

pub use action::Action;
pub use backend::{
    Backend, BackendError, BackendFactory, BackendHandle, Dispatch, PixelBuffer, SampleSink,
};
pub use config::{WorkerConfig, DEFAULT_HOST, DEFAULT_PORT, MIN_PACKET_SIZE};
pub use context::RequestContext;
pub use demo::DemoBackend;
pub use emitter::ResponseEmitter;
pub use error::{Result, WorkerError};
pub use image::{ImageCodec, PngCodec};
pub use lifecycle::{Readiness, ShutdownSignal, Worker, STOP_FLUSH_GRACE};
pub use message::{ImageResponse, Placement, ProgressMessage, ServerMessage, PROGRESS};
pub use progress::ProgressReporter;
pub use queue::{Outbound, QueueHealth, QueueReport, QueueWorker, RequestSink, ResponseQueue};
pub use router::{DropReason, RequestRouter, RouteOutcome};
pub use sender::{FrameSender, SendFailure, SendOutcome};
