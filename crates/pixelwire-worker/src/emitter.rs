use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::backend::{BackendHandle, PixelBuffer};
use crate::context::RequestContext;
use crate::image::ImageCodec;
use crate::message::{ImageResponse, Placement};
use crate::sender::{FrameSender, SendFailure, SendOutcome};

/// Sends the final image of a request and recovers the connection when the
/// send cannot be confirmed.
pub struct ResponseEmitter {
    sender: Arc<FrameSender>,
    codec: Arc<dyn ImageCodec>,
    backend: BackendHandle,
}

impl ResponseEmitter {
    pub fn new(sender: Arc<FrameSender>, codec: Arc<dyn ImageCodec>, backend: BackendHandle) -> Self {
        Self {
            sender,
            codec,
            backend,
        }
    }

    /// Encode, frame and send the result for `ctx`.
    ///
    /// If the send fails or the connection is found dead afterwards, the
    /// backend is told to cancel and the connection is reset before the
    /// outcome is returned. An image that cannot be encoded, or whose client
    /// has already left, is reported without touching the connection.
    pub fn emit(
        &self,
        ctx: &RequestContext,
        pixels: &PixelBuffer,
        options: Option<&Value>,
    ) -> SendOutcome {
        let payload = match self.build_payload(ctx, pixels, options) {
            Ok(payload) => payload,
            Err(reason) => {
                error!(request_id = ctx.id(), reqtype = ctx.reqtype(), %reason, "no image response");
                return SendOutcome::Failed {
                    frames_sent: 0,
                    reason: SendFailure::Encode(reason),
                };
            }
        };

        let outcome = self.sender.send_message(ctx.connection(), &payload);
        match &outcome {
            SendOutcome::Delivered { frames } => info!(
                request_id = ctx.id(),
                reqtype = ctx.reqtype(),
                frames,
                bytes = payload.len(),
                "image response sent"
            ),
            SendOutcome::Failed {
                reason: SendFailure::ClientGone,
                ..
            } => debug!(
                request_id = ctx.id(),
                connection = %ctx.connection(),
                "client gone; image response dropped"
            ),
            SendOutcome::Failed { frames_sent, reason } => {
                error!(
                    request_id = ctx.id(),
                    reqtype = ctx.reqtype(),
                    frames_sent,
                    ?reason,
                    "failed to send image response"
                );
                self.recover(ctx);
            }
        }
        outcome
    }

    /// Cancel backend work and drop the client so a new one can connect.
    ///
    /// Only the client that sent `ctx` is ever reset; if it has already been
    /// replaced, nothing happens. Returns whether recovery ran.
    pub fn recover(&self, ctx: &RequestContext) -> bool {
        let transport = self.sender.transport();
        if transport.current() != Some(ctx.connection()) {
            debug!(
                request_id = ctx.id(),
                connection = %ctx.connection(),
                "client already replaced; skipping recovery"
            );
            return false;
        }
        if !self.backend.cancel_request(ctx.id()) {
            error!(request_id = ctx.id(), "no backend to cancel");
        }
        transport.reset_connection(ctx.connection())
    }

    fn build_payload(
        &self,
        ctx: &RequestContext,
        pixels: &PixelBuffer,
        options: Option<&Value>,
    ) -> Result<Vec<u8>, String> {
        let encoded = self.codec.encode(pixels).map_err(|err| err.to_string())?;
        let response = ImageResponse::new(
            BASE64.encode(encoded),
            ctx.reqtype(),
            Placement::from_options(options),
        );
        serde_json::to_vec(&response).map_err(|err| err.to_string())
    }
}
