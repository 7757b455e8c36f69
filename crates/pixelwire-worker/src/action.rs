use std::fmt;

use serde::{Deserialize, Serialize};

/// A request action the worker knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Txt2img,
    Img2img,
    Inpaint,
    Outpaint,
    Convert,
}

impl Action {
    /// Actions served by the backend's sampling entry point.
    pub const SAMPLING: [Action; 4] = [
        Action::Txt2img,
        Action::Img2img,
        Action::Inpaint,
        Action::Outpaint,
    ];

    /// Parse the wire name of an action. Matching is exact.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "txt2img" => Some(Self::Txt2img),
            "img2img" => Some(Self::Img2img),
            "inpaint" => Some(Self::Inpaint),
            "outpaint" => Some(Self::Outpaint),
            "convert" => Some(Self::Convert),
            _ => None,
        }
    }

    /// Wire name, also used as the `reqtype` tag on outbound messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Txt2img => "txt2img",
            Self::Img2img => "img2img",
            Self::Inpaint => "inpaint",
            Self::Outpaint => "outpaint",
            Self::Convert => "convert",
        }
    }

    /// True for the four image-producing actions.
    pub fn is_sampling(self) -> bool {
        !matches!(self, Self::Convert)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
