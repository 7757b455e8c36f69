use std::path::PathBuf;

use crate::traits::ConnectionId;

/// Errors that can occur in socket transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified Unix socket path.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to bind to the specified TCP address.
    #[error("failed to bind to {addr}: {source}")]
    BindTcp {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The endpoint string could not be understood.
    #[error("invalid endpoint '{0}' (expected unix:<path> or <host>:<port>)")]
    InvalidEndpoint(String),

    /// No client is attached to the connection slot.
    #[error("no client connected")]
    NotConnected,

    /// The frame was addressed to a client that is no longer attached.
    #[error("{0} is no longer the attached client")]
    StaleConnection(ConnectionId),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
