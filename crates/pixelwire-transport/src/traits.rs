use std::fmt;

use crate::error::Result;

/// Identifies one accepted client for as long as it stays attached.
///
/// Ids are never reused within a process, so anything tagged with the id of
/// a client that has since left can be told apart from the current client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The connection contract a worker sends through.
///
/// Implementations hold at most one connected client. Every operation names
/// the connection it is meant for; anything addressed to a connection that is
/// no longer current is refused with [`TransportError::StaleConnection`]
/// (or ignored, for resets) so it can never reach a later client.
///
/// [`TransportError::StaleConnection`]: crate::TransportError::StaleConnection
pub trait Transport: Send + Sync {
    /// The attached client, if any.
    fn current(&self) -> Option<ConnectionId>;

    /// Write one complete frame to `connection`.
    ///
    /// Either every byte is written or an error is returned and the
    /// connection stops reporting as live.
    fn send(&self, connection: ConnectionId, frame: &[u8]) -> Result<()>;

    /// Whether `connection` is still attached and its last write succeeded.
    fn is_live(&self, connection: ConnectionId) -> bool;

    /// Drop `connection` so the accept loop can take the next client.
    ///
    /// Returns `false` without doing anything if `connection` is not current.
    fn reset_connection(&self, connection: ConnectionId) -> bool;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn current(&self) -> Option<ConnectionId> {
        (**self).current()
    }

    fn send(&self, connection: ConnectionId, frame: &[u8]) -> Result<()> {
        (**self).send(connection, frame)
    }

    fn is_live(&self, connection: ConnectionId) -> bool {
        (**self).is_live(connection)
    }

    fn reset_connection(&self, connection: ConnectionId) -> bool {
        (**self).reset_connection(connection)
    }
}
