//! Socket transport for pixelwire workers.
//!
//! Provides a unified stream type over the two socket families a worker can
//! serve on:
//! - Unix domain sockets (Linux/macOS)
//! - TCP (`host:port`)
//!
//! On top of the raw streams sits [`ClientSlot`], the single active client
//! connection a worker sends frames through. It implements the [`Transport`]
//! contract: send a frame, report liveness, reset the connection. Each
//! accepted client gets a fresh [`ConnectionId`]; frames addressed to a
//! client that has left are refused.

pub mod error;
pub mod listener;
pub mod slot;
pub mod stream;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use listener::{Endpoint, WireListener};
pub use slot::ClientSlot;
pub use stream::WireStream;
pub use tcp::TcpSocket;
pub use traits::{ConnectionId, Transport};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
