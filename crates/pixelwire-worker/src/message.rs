use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `action` value carried by progress messages.
pub const PROGRESS: &str = "PROGRESS";

/// Outbound progress update: `{action: "PROGRESS", step, total, reqtype}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressMessage {
    pub action: String,
    pub step: u32,
    pub total: u32,
    pub reqtype: String,
}

impl ProgressMessage {
    pub fn new(step: u32, total: u32, reqtype: &str) -> Self {
        Self {
            action: PROGRESS.to_string(),
            step,
            total,
            reqtype: reqtype.to_string(),
        }
    }
}

/// Where the client should place a result, read from request `options`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Placement {
    pub pos_x: i64,
    pub pos_y: i64,
}

impl Placement {
    /// Read `pos_x`/`pos_y` from an options object.
    ///
    /// A missing options object, a missing field, or a non-integer field
    /// each fall back to 0.
    pub fn from_options(options: Option<&Value>) -> Self {
        let coord = |name: &str| {
            options
                .and_then(|opts| opts.get(name))
                .and_then(Value::as_i64)
                .unwrap_or(0)
        };
        Self {
            pos_x: coord("pos_x"),
            pos_y: coord("pos_y"),
        }
    }
}

/// Outbound result: `{image, reqtype, pos_x, pos_y}` with a base64 image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageResponse {
    pub image: String,
    pub reqtype: String,
    pub pos_x: i64,
    pub pos_y: i64,
}

impl ImageResponse {
    pub fn new(image: String, reqtype: &str, placement: Placement) -> Self {
        Self {
            image,
            reqtype: reqtype.to_string(),
            pos_x: placement.pos_x,
            pos_y: placement.pos_y,
        }
    }
}

/// Any message a worker sends, as seen by a client.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ServerMessage {
    Progress(ProgressMessage),
    Image(ImageResponse),
}

impl ServerMessage {
    /// True for the final result of a request.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Image(_))
    }

    pub fn reqtype(&self) -> &str {
        match self {
            Self::Progress(msg) => &msg.reqtype,
            Self::Image(msg) => &msg.reqtype,
        }
    }
}
