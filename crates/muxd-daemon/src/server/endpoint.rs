//! Listening endpoint.
//!
//! Owns the bound Unix socket and the filesystem name it occupies. The event
//! loop switches it between blocking accept (no clients) and non-blocking
//! accept (clients connected, readiness driven by the multiplexer).

use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{SocketAddr, UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::ServerError;

/// Accept mode of the listening endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptMode {
    /// `accept` suspends until a client connects.
    Blocking,
    /// `accept` returns `WouldBlock` when nothing is pending.
    NonBlocking,
}

/// Result of a single `accept` call.
#[derive(Debug)]
pub enum Accepted {
    Connection(UnixStream, SocketAddr),
    /// Non-blocking mode only: nothing was pending.
    WouldBlock,
}

/// Removes the socket file when dropped.
#[derive(Debug)]
struct BoundPath(PathBuf);

impl Drop for BoundPath {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "Socket file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "Failed to remove socket file"),
        }
    }
}

/// The bound, listening socket.
#[derive(Debug)]
pub struct ListeningEndpoint {
    // Field order is drop order: the socket closes before its name is
    // released.
    listener: UnixListener,
    bound: BoundPath,
    mode: AcceptMode,
}

impl ListeningEndpoint {
    /// Bind and listen on `path`.
    ///
    /// A stale socket file left by a previous run is replaced and missing
    /// parent directories are created. Anything else at `path` is an error
    /// and is left untouched.
    pub fn bind(path: &Path) -> Result<Self, ServerError> {
        let bind_err = |source| ServerError::Bind {
            path: path.to_path_buf(),
            source,
        };

        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => {
                info!(path = %path.display(), "Removing stale socket file");
                std::fs::remove_file(path).map_err(bind_err)?;
            }
            Ok(_) => {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "path exists and is not a socket",
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(bind_err(e)),
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(path).map_err(bind_err)?;
        info!(path = %path.display(), "Listening");

        Ok(Self {
            listener,
            bound: BoundPath(path.to_path_buf()),
            mode: AcceptMode::Blocking,
        })
    }

    pub fn path(&self) -> &Path {
        &self.bound.0
    }

    pub const fn mode(&self) -> AcceptMode {
        self.mode
    }

    /// Switch accept mode. A no-op when already in `mode`.
    pub fn set_mode(&mut self, mode: AcceptMode) -> io::Result<()> {
        if self.mode == mode {
            return Ok(());
        }
        self.listener
            .set_nonblocking(mode == AcceptMode::NonBlocking)?;
        debug!(?mode, "Accept mode changed");
        self.mode = mode;
        Ok(())
    }

    /// Accept one connection in the current mode.
    ///
    /// Accepted streams start in blocking mode. The server switches a session
    /// to non-blocking I/O before it joins the registry.
    pub fn accept(&self) -> io::Result<Accepted> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(false)?;
                Ok(Accepted::Connection(stream, addr))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Accepted::WouldBlock),
            Err(e) => Err(e),
        }
    }
}

impl AsFd for ListeningEndpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }
}

/// Render a peer address for logs. Unix peers are usually unnamed.
pub fn describe_peer(addr: &SocketAddr) -> String {
    addr.as_pathname().map_or_else(
        || "unnamed".to_string(),
        |p| p.display().to_string(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn bind_creates_and_drop_removes_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("muxd.sock");

        let endpoint = ListeningEndpoint::bind(&path).unwrap();
        assert!(path.exists());
        assert_eq!(endpoint.mode(), AcceptMode::Blocking);
        drop(endpoint);
        assert!(!path.exists());
    }

    #[test]
    fn bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muxd.sock");
        let stale = UnixListener::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());

        let _endpoint = ListeningEndpoint::bind(&path).unwrap();
        assert!(UnixStream::connect(&path).is_ok());
    }

    #[test]
    fn bind_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muxd.sock");
        std::fs::write(&path, b"keep me").unwrap();

        match ListeningEndpoint::bind(&path) {
            Err(ServerError::Bind { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected bind error, got {other:?}"),
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn non_blocking_accept_reports_would_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muxd.sock");
        let mut endpoint = ListeningEndpoint::bind(&path).unwrap();

        endpoint.set_mode(AcceptMode::NonBlocking).unwrap();
        assert!(matches!(endpoint.accept().unwrap(), Accepted::WouldBlock));

        let _client = UnixStream::connect(&path).unwrap();
        assert!(matches!(
            endpoint.accept().unwrap(),
            Accepted::Connection(..)
        ));
    }
}
