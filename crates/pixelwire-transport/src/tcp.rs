use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::WireStream;

/// TCP listener for a worker bound to `host:port`.
pub struct TcpSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpSocket {
    /// Bind and listen on `addr` (anything `host:port` that resolves).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::BindTcp {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "worker listening on tcp");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next client (blocking).
    pub fn accept(&self) -> Result<WireStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted tcp connection");
        Ok(WireStream::from_tcp(stream))
    }

    /// Connect to a listening worker (blocking).
    pub fn connect(addr: &str) -> Result<WireStream> {
        let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
            endpoint: addr.to_string(),
            source: e,
        })?;
        debug!(addr, "connected over tcp");
        Ok(WireStream::from_tcp(stream))
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
