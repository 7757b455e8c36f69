use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::WireStream;

/// `sockaddr_un.sun_path` capacity, including the trailing NUL.
#[cfg(target_os = "linux")]
const SUN_PATH_CAPACITY: usize = 108;
#[cfg(not(target_os = "linux"))]
const SUN_PATH_CAPACITY: usize = 104;

/// Device and inode of the socket file this process created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    fn of(metadata: &fs::Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }
}

/// Worker endpoint on a filesystem-path Unix domain socket.
///
/// The socket file is owner-only by default. Dropping the listener unlinks
/// the file, but only if it is still the one this listener created.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    identity: FileIdentity,
}

impl UnixDomainSocket {
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind with [`Self::DEFAULT_SOCKET_MODE`].
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and chmod the socket file to `mode`.
    ///
    /// A leftover socket from an earlier run is unlinked. Any other file at
    /// `path` is refused.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_path_len(&path)?;

        let with_path = |source: io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };
        clear_stale_socket(&path).map_err(with_path)?;

        let listener = UnixListener::bind(&path).map_err(with_path)?;
        fs::set_permissions(&path, Permissions::from_mode(mode)).map_err(with_path)?;
        let identity = fs::symlink_metadata(&path)
            .map(|meta| FileIdentity::of(&meta))
            .map_err(with_path)?;

        info!(path = %path.display(), mode = %format!("{mode:o}"), "bound unix socket");
        Ok(Self {
            listener,
            path,
            identity,
        })
    }

    /// Block until a client connects.
    pub fn accept(&self) -> Result<WireStream> {
        self.listener
            .accept()
            .map(|(stream, _)| WireStream::from_unix(stream))
            .map_err(TransportError::Accept)
    }

    /// Open a client connection to the socket at `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<WireStream> {
        let path = path.as_ref();
        match UnixStream::connect(path) {
            Ok(stream) => {
                debug!(path = %path.display(), "unix socket connected");
                Ok(WireStream::from_unix(stream))
            }
            Err(source) => Err(TransportError::Connect {
                endpoint: format!("unix:{}", path.display()),
                source,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn still_owns_path(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok_and(|meta| {
            meta.file_type().is_socket() && FileIdentity::of(&meta) == self.identity
        })
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        if self.still_owns_path() {
            let _ = fs::remove_file(&self.path);
            debug!(path = %self.path.display(), "unlinked socket file");
        } else {
            debug!(path = %self.path.display(), "socket file replaced or gone; left in place");
        }
    }
}

fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len < SUN_PATH_CAPACITY {
        return Ok(());
    }
    Err(TransportError::PathTooLong {
        path: path.to_path_buf(),
        len,
        max: SUN_PATH_CAPACITY,
    })
}

fn clear_stale_socket(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if !meta.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        ));
    }
    debug!(path = %path.display(), "replacing stale socket");
    fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::thread;

    use super::*;

    /// Per-test scratch directory, removed when dropped.
    struct Scratch(PathBuf);

    impl Scratch {
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("pxw-uds-{tag}-{}", std::process::id()));
            fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn join(&self, name: &str) -> PathBuf {
            self.0.join(name)
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn client_line_reaches_server_and_file_is_unlinked() {
        let scratch = Scratch::new("echo");
        let sock = scratch.join("worker.sock");
        let listener = UnixDomainSocket::bind(&sock).unwrap();
        assert_eq!(listener.path(), sock.as_path());

        let client_path = sock.clone();
        let client = thread::spawn(move || {
            let mut stream = UnixDomainSocket::connect(client_path).unwrap();
            stream.write_all(b"ping\n").unwrap();
        });

        let mut line = String::new();
        BufReader::new(listener.accept().unwrap())
            .read_line(&mut line)
            .unwrap();
        client.join().unwrap();
        assert_eq!(line, "ping\n");

        drop(listener);
        assert!(fs::symlink_metadata(&sock).is_err());
    }

    #[test]
    fn overlong_path_is_rejected_before_bind() {
        let sock = PathBuf::from("/tmp").join("s".repeat(SUN_PATH_CAPACITY));
        match UnixDomainSocket::bind(&sock) {
            Err(TransportError::PathTooLong { max, .. }) => assert_eq!(max, SUN_PATH_CAPACITY),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("bind should fail"),
        }
    }

    #[test]
    fn socket_file_mode_follows_argument() {
        let scratch = Scratch::new("mode");
        let owner_only = UnixDomainSocket::bind(scratch.join("a.sock")).unwrap();
        let group = UnixDomainSocket::bind_with_mode(scratch.join("b.sock"), 0o660).unwrap();

        let mode = |s: &UnixDomainSocket| fs::metadata(s.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&owner_only), 0o600);
        assert_eq!(mode(&group), 0o660);
    }

    #[test]
    fn stale_socket_is_replaced() {
        let scratch = Scratch::new("stale");
        let sock = scratch.join("worker.sock");
        let first = UnixDomainSocket::bind(&sock).unwrap();
        // Leak the first listener's file so it looks like a crashed run.
        std::mem::forget(first);

        let second = UnixDomainSocket::bind(&sock).unwrap();
        assert!(second.still_owns_path());
    }

    #[test]
    fn regular_file_is_never_removed() {
        let scratch = Scratch::new("file");
        let sock = scratch.join("config.sock");
        fs::write(&sock, b"keep me").unwrap();

        assert!(matches!(
            UnixDomainSocket::bind(&sock),
            Err(TransportError::Bind { .. })
        ));
        assert_eq!(fs::read(&sock).unwrap(), b"keep me");
    }

    #[test]
    fn drop_leaves_a_replacement_alone() {
        let scratch = Scratch::new("swap");
        let sock = scratch.join("worker.sock");
        let listener = UnixDomainSocket::bind(&sock).unwrap();
        fs::remove_file(&sock).unwrap();
        fs::write(&sock, b"someone else").unwrap();

        drop(listener);
        assert!(sock.exists());
    }

    #[test]
    fn missing_socket_error_names_endpoint() {
        let scratch = Scratch::new("missing");
        let sock = scratch.join("nobody.sock");
        match UnixDomainSocket::connect(&sock) {
            Err(TransportError::Connect { endpoint, .. }) => {
                assert_eq!(endpoint, format!("unix:{}", sock.display()));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect should fail"),
        }
    }
}
