use pixelwire_transport::ConnectionId;
use serde_json::Value;

use crate::action::Action;

/// Everything later stages need to know about one request.
///
/// Created by the router for each inbound payload and passed by reference
/// (or behind an `Arc` once queued) through the backend sink, the progress
/// reporter and the response emitter. It is dropped after the final
/// response or a terminal error.
///
/// `connection` is the client the request arrived on. Replies go to that
/// client only; once it has left they are discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    id: u64,
    connection: ConnectionId,
    action: Action,
    width: Option<u64>,
    request: Value,
}

impl RequestContext {
    /// Build a context from a parsed request. `W` is read as the image width.
    pub fn new(id: u64, connection: ConnectionId, action: Action, request: Value) -> Self {
        let width = request.get("W").and_then(Value::as_u64);
        Self {
            id,
            connection,
            action,
            width,
            request,
        }
    }

    /// Worker-assigned request id, unique per worker.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The client that sent the request.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// Tag carried by every progress and result message for this request.
    pub fn reqtype(&self) -> &'static str {
        self.action.as_str()
    }

    /// Requested image width, if the client sent `W`.
    pub fn width(&self) -> Option<u64> {
        self.width
    }

    /// The full parsed request, including backend-specific fields.
    pub fn request(&self) -> &Value {
        &self.request
    }

    /// A top-level request field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.request.get(name)
    }

    /// The request's `options` object, which carries result placement.
    pub fn options(&self) -> Option<&Value> {
        self.request.get("options")
    }
}
