use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pixelwire_transport::ConnectionId;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::action::Action;
use crate::backend::{BackendError, BackendHandle};
use crate::context::RequestContext;
use crate::queue::ResponseQueue;

/// Why a request was dropped without a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    InvalidText,
    InvalidJson,
    MissingAction,
    UnknownAction(String),
    NotReady,
    ShuttingDown,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidText => f.write_str("payload is not valid UTF-8"),
            Self::InvalidJson => f.write_str("payload is not valid JSON"),
            Self::MissingAction => f.write_str("request has no action"),
            Self::UnknownAction(action) => write!(f, "unknown action {action}"),
            Self::NotReady => f.write_str("backend not ready"),
            Self::ShuttingDown => f.write_str("worker is shutting down"),
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The sampling entry point ran to completion.
    Sampled { request_id: u64, action: Action },
    /// The conversion entry point ran to completion.
    Converted { request_id: u64 },
    /// Nothing was dispatched and nothing will be sent.
    Dropped(DropReason),
    /// The backend was invoked and returned an error.
    Failed {
        request_id: u64,
        action: Action,
        error: BackendError,
    },
}

impl RouteOutcome {
    pub fn is_dispatched(&self) -> bool {
        !matches!(self, Self::Dropped(_))
    }
}

/// Classifies inbound payloads and dispatches them to the backend.
///
/// Malformed and unrecognized requests are logged and dropped; the client
/// gets no reply and must time out on its own. The router itself never
/// sends anything; backend output goes through the response queue.
pub struct RequestRouter {
    backend: BackendHandle,
    queue: ResponseQueue,
    next_id: AtomicU64,
}

impl RequestRouter {
    pub fn new(backend: BackendHandle, queue: ResponseQueue) -> Self {
        Self {
            backend,
            queue,
            next_id: AtomicU64::new(1),
        }
    }

    /// Route one reassembled message received on `connection`. Blocks for
    /// the duration of the backend call.
    pub fn route(&self, connection: ConnectionId, raw: &[u8]) -> RouteOutcome {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(err) => {
                error!(%err, bytes = raw.len(), "dropping request with undecodable text");
                return RouteOutcome::Dropped(DropReason::InvalidText);
            }
        };

        let mut request: Value = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(err) => {
                error!(%err, "dropping improperly formatted request");
                return RouteOutcome::Dropped(DropReason::InvalidJson);
            }
        };

        let action = match request.get("action") {
            None => {
                error!("no image response: request has no action");
                return RouteOutcome::Dropped(DropReason::MissingAction);
            }
            Some(Value::String(name)) => match Action::parse(name) {
                Some(action) => action,
                None => {
                    error!(action = %name, "no image response for unknown action");
                    return RouteOutcome::Dropped(DropReason::UnknownAction(name.clone()));
                }
            },
            Some(other) => {
                error!(action = %other, "no image response for non-string action");
                return RouteOutcome::Dropped(DropReason::UnknownAction(other.to_string()));
            }
        };

        let Some(backend) = self.backend.get().cloned() else {
            warn!(%action, "dropping request before backend is ready");
            return RouteOutcome::Dropped(DropReason::NotReady);
        };

        if let Some(fields) = request.as_object_mut() {
            fields.insert("reqtype".to_string(), Value::from(action.as_str()));
        }
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::new(RequestContext::new(request_id, connection, action, request));
        info!(request_id, %connection, %action, width = ?ctx.width(), "dispatching request");
        let _dispatch = self.backend.dispatch(request_id);

        if action.is_sampling() {
            let mut sink = self.queue.sink(ctx.clone());
            match backend.sample(&ctx, &mut sink) {
                Ok(()) => {
                    info!(request_id, %action, "sample complete");
                    RouteOutcome::Sampled { request_id, action }
                }
                Err(error) => {
                    error!(request_id, %action, %error, "sample failed");
                    RouteOutcome::Failed {
                        request_id,
                        action,
                        error,
                    }
                }
            }
        } else {
            match backend.convert(&ctx) {
                Ok(()) => {
                    info!(request_id, "convert complete");
                    RouteOutcome::Converted { request_id }
                }
                Err(error) => {
                    error!(request_id, %error, "convert failed");
                    RouteOutcome::Failed {
                        request_id,
                        action,
                        error,
                    }
                }
            }
        }
    }
}
