use std::path::PathBuf;

use crate::backend::BackendError;

/// Errors that can occur while building or running a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] pixelwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] pixelwire_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend reported a failure.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The backend never became ready.
    #[error("backend initialization failed: {0}")]
    BackendInit(String),

    /// Pixels could not be encoded to an image format.
    #[error("image encoding failed: {0}")]
    ImageEncode(String),

    /// Configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },

    /// The response queue thread panicked.
    #[error("response queue worker panicked")]
    QueueWorkerPanicked,
}

pub type Result<T> = std::result::Result<T, WorkerError>;
