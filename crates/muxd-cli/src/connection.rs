//! Session client.
//!
//! Manages one Unix socket connection to the muxd daemon.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use muxd_core::protocol::{DEFAULT_ACKNOWLEDGMENT, display_payload};
use thiserror::Error;
use tracing::{debug, info};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {path}: {source}", path = .path.display())]
    Connect { path: PathBuf, source: io::Error },

    #[error("Server closed the connection during the handshake")]
    ClosedDuringHandshake,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Socket file the daemon listens on.
    pub socket_path: PathBuf,
    /// Payload sent in reply to the greeting.
    pub acknowledgment: Vec<u8>,
    /// Size of the buffer used for each read.
    pub read_buffer: usize,
    /// Read timeout; `None` waits forever.
    pub read_timeout: Option<Duration>,
}

impl ConnectionConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            acknowledgment: DEFAULT_ACKNOWLEDGMENT.to_vec(),
            read_buffer: 1024,
            read_timeout: None,
        }
    }

    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_acknowledgment(mut self, ack: impl Into<Vec<u8>>) -> Self {
        self.acknowledgment = ack.into();
        self
    }
}

/// A connected, handshaken session with the daemon.
#[derive(Debug)]
pub struct SessionClient {
    stream: UnixStream,
    greeting: Vec<u8>,
    read_buffer: usize,
}

impl SessionClient {
    /// Connect, read the greeting and send the acknowledgment.
    pub fn connect(config: &ConnectionConfig) -> Result<Self, ClientError> {
        let stream =
            UnixStream::connect(&config.socket_path).map_err(|source| ClientError::Connect {
                path: config.socket_path.clone(),
                source,
            })?;
        stream.set_read_timeout(config.read_timeout)?;

        let mut client = Self {
            stream,
            greeting: Vec::new(),
            read_buffer: config.read_buffer.max(1),
        };
        client.greeting = client
            .read_message()?
            .ok_or(ClientError::ClosedDuringHandshake)?;
        debug!(greeting = %display_payload(&client.greeting), "Greeting received");

        client.stream.write_all(&config.acknowledgment)?;
        info!(path = %config.socket_path.display(), "Connected");
        Ok(client)
    }

    /// The greeting the server opened with.
    pub fn greeting(&self) -> &[u8] {
        &self.greeting
    }

    /// Wait for the next prompt. `None` means the server closed the
    /// connection.
    pub fn next_prompt(&mut self) -> Result<Option<Vec<u8>>, ClientError> {
        self.read_message()
    }

    /// Send one command, exactly as given.
    pub fn send_command(&mut self, command: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(command)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Underlying stream, e.g. to shut it down abruptly.
    pub const fn stream(&self) -> &UnixStream {
        &self.stream
    }

    fn read_message(&mut self) -> Result<Option<Vec<u8>>, ClientError> {
        let mut buf = vec![0u8; self.read_buffer];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Connect with default settings.
pub fn connect(path: &Path) -> Result<SessionClient, ClientError> {
    SessionClient::connect(&ConnectionConfig::new(path))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::os::unix::net::UnixListener;
    use std::thread;

    use super::*;

    /// A one-session server thread speaking the default payloads.
    fn serve_once(listener: UnixListener, commands: usize) -> thread::JoinHandle<Vec<Vec<u8>>> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 100];
            stream.write_all(b"HELLO").unwrap();
            let n = stream.read(&mut buf).unwrap();
            let mut received = vec![buf[..n].to_vec()];
            for _ in 0..commands {
                stream.write_all(b"ENTERCMD").unwrap();
                let n = stream.read(&mut buf).unwrap();
                received.push(buf[..n].to_vec());
            }
            received
        })
    }

    #[test]
    fn handshake_then_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let server = serve_once(UnixListener::bind(&path).unwrap(), 2);

        let mut client = connect(&path).unwrap();
        assert_eq!(client.greeting(), b"HELLO");
        assert_eq!(client.next_prompt().unwrap().unwrap(), b"ENTERCMD");
        client.send_command(b"status").unwrap();
        assert_eq!(client.next_prompt().unwrap().unwrap(), b"ENTERCMD");
        client.send_command(b"quit").unwrap();

        let received = server.join().unwrap();
        assert_eq!(
            received,
            vec![b"THANKS".to_vec(), b"status".to_vec(), b"quit".to_vec()]
        );
        assert!(client.next_prompt().unwrap().is_none());
    }

    #[test]
    fn server_closing_before_greeting_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = thread::spawn(move || drop(listener.accept().unwrap()));

        let result = connect(&path);
        server.join().unwrap();
        assert!(matches!(result, Err(ClientError::ClosedDuringHandshake)));
    }

    #[test]
    fn missing_socket_is_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = connect(&dir.path().join("absent.sock"));
        assert!(matches!(result, Err(ClientError::Connect { .. })));
    }

    #[test]
    fn custom_acknowledgment_is_sent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let server = serve_once(UnixListener::bind(&path).unwrap(), 0);

        let config = ConnectionConfig::new(&path)
            .with_acknowledgment(b"OK".to_vec())
            .with_read_timeout(Some(Duration::from_secs(5)));
        let _client = SessionClient::connect(&config).unwrap();
        assert_eq!(server.join().unwrap(), vec![b"OK".to_vec()]);
    }
}
