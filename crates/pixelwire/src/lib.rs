//! Framed generation worker.
//!
//! pixelwire serves image-generation requests over a persistent socket. Every
//! message travels as fixed-size, zero-padded frames closed by an all-zero
//! sentinel frame; requests are JSON, and the worker streams progress and the
//! final image back to the client.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix/TCP streams and the single-client connection slot
//! - [`frame`]: fixed-size framing, blocking reader/writer, async codec (behind `async`)
//! - [`worker`]: request routing, progress streaming, response emission, lifecycle

/// Re-export transport types.
pub mod transport {
    pub use pixelwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pixelwire_frame::*;
}

/// Re-export worker types.
pub mod worker {
    pub use pixelwire_worker::*;
}
