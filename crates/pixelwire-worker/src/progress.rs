use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::context::RequestContext;
use crate::message::ProgressMessage;
use crate::sender::{FrameSender, SendFailure, SendOutcome};

/// Turns backend `(step, total)` callbacks into framed progress messages.
///
/// A progress message is always one content frame plus the sentinel. The
/// worker's minimum packet size keeps the JSON well inside one frame; a
/// longer message would be cut at the frame boundary.
pub struct ProgressReporter {
    sender: Arc<FrameSender>,
}

impl ProgressReporter {
    pub fn new(sender: Arc<FrameSender>) -> Self {
        Self { sender }
    }

    /// Send one progress update for `ctx`.
    pub fn report(&self, ctx: &RequestContext, step: u32, total: u32) -> SendOutcome {
        let message = ProgressMessage::new(step, total, ctx.reqtype());
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(err) => {
                return SendOutcome::Failed {
                    frames_sent: 0,
                    reason: SendFailure::Encode(err.to_string()),
                }
            }
        };

        let outcome = self.sender.send_single_frame(ctx.connection(), &payload);
        match &outcome {
            SendOutcome::Delivered { .. } => {
                trace!(request_id = ctx.id(), step, total, "progress sent")
            }
            SendOutcome::Failed {
                reason: SendFailure::ClientGone,
                ..
            } => debug!(
                request_id = ctx.id(),
                connection = %ctx.connection(),
                step,
                "client gone; progress dropped"
            ),
            SendOutcome::Failed { reason, .. } => warn!(
                request_id = ctx.id(),
                reqtype = ctx.reqtype(),
                step,
                ?reason,
                "progress send failed"
            ),
        }
        outcome
    }
}
