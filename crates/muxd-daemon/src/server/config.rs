//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use muxd_core::{Config, Protocol};

use super::ServerError;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Filesystem path of the listening socket.
    pub socket_path: PathBuf,

    /// Bounded wait of each readiness poll.
    pub poll_timeout: Duration,

    /// Sleep after a poll with nothing ready. Zero disables it.
    pub idle_sleep: Duration,

    /// Upper bound for the acknowledgment read of a synchronous handshake.
    pub handshake_timeout: Option<Duration>,

    /// Payloads exchanged with every client.
    pub protocol: Protocol,
}

impl ServerConfig {
    /// Create a config listening on `socket_path` with default timings.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            poll_timeout: Duration::from_millis(5),
            idle_sleep: Duration::from_millis(1),
            handshake_timeout: None,
            protocol: Protocol::default(),
        }
    }

    /// Build from the resolved application config.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let socket_path = config.daemon.require_socket_path()?;
        let protocol = Protocol::from_config(&config.protocol)?;
        Ok(Self::new(socket_path)
            .with_poll_timeout(config.daemon.poll_timeout())
            .with_idle_sleep(config.daemon.idle_sleep())
            .with_handshake_timeout(config.protocol.handshake_timeout())
            .with_protocol(protocol))
    }

    /// Set the readiness poll timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the idle sleep.
    #[must_use]
    pub const fn with_idle_sleep(mut self, sleep: Duration) -> Self {
        self.idle_sleep = sleep;
        self
    }

    /// Set the synchronous handshake timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the session protocol payloads.
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}
