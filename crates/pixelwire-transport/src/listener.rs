use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, TransportError};
use crate::stream::WireStream;
use crate::tcp::TcpSocket;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

const UNIX_PREFIX: &str = "unix:";

/// Where a worker listens or a client connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `unix:<path>`
    Unix(PathBuf),
    /// `<host>:<port>`
    Tcp(String),
}

impl Endpoint {
    /// Parse `unix:<path>` or `<host>:<port>`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Some(path) = input.strip_prefix(UNIX_PREFIX) {
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(input.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        match input.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(input.to_string()))
            }
            _ => Err(TransportError::InvalidEndpoint(input.to_string())),
        }
    }

    /// Build a TCP endpoint from separate host and port settings.
    pub fn tcp(host: &str, port: u16) -> Self {
        Self::Tcp(format!("{host}:{port}"))
    }

    /// Connect to this endpoint as a client.
    pub fn connect(&self) -> Result<WireStream> {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => UnixDomainSocket::connect(path),
            #[cfg(not(unix))]
            Self::Unix(path) => Err(TransportError::Connect {
                endpoint: format!("{UNIX_PREFIX}{}", path.display()),
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix domain sockets are not available on this platform",
                ),
            }),
            Self::Tcp(addr) => TcpSocket::connect(addr),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "{UNIX_PREFIX}{}", path.display()),
            Self::Tcp(addr) => f.write_str(addr),
        }
    }
}

/// A bound listener of either socket family.
pub enum WireListener {
    #[cfg(unix)]
    Unix(UnixDomainSocket),
    Tcp(TcpSocket),
}

impl WireListener {
    /// Bind the given endpoint.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self::Unix(UnixDomainSocket::bind(path)?)),
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(TransportError::Bind {
                path: path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix domain sockets are not available on this platform",
                ),
            }),
            Endpoint::Tcp(addr) => Ok(Self::Tcp(TcpSocket::bind(addr)?)),
        }
    }

    /// Accept the next client (blocking).
    pub fn accept(&self) -> Result<WireStream> {
        match self {
            #[cfg(unix)]
            Self::Unix(socket) => socket.accept(),
            Self::Tcp(socket) => socket.accept(),
        }
    }

    /// The endpoint clients should connect to.
    pub fn local_endpoint(&self) -> Endpoint {
        match self {
            #[cfg(unix)]
            Self::Unix(socket) => Endpoint::Unix(socket.path().to_path_buf()),
            Self::Tcp(socket) => Endpoint::Tcp(socket.local_addr().to_string()),
        }
    }
}
