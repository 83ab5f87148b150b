//! Event loop of the muxd daemon.
//!
//! One thread owns the listening endpoint and the session registry and runs
//! passes until shutdown:
//!
//! - registry empty: blocking `accept`, synchronous handshake, register
//! - registry non-empty: non-blocking endpoint, bounded readiness poll,
//!   accept if the endpoint is ready, then advance every ready session by
//!   one step and retire the ones that terminated
//!
//! Registered sessions use non-blocking I/O; a prompt that cannot be written
//! at once ends that session. A failing session only ends itself. Only endpoint-level failures (bind,
//! a non-transient blocking accept, the poll itself) stop the loop.

mod config;
mod endpoint;
mod multiplexer;
mod shutdown;

pub use config::ServerConfig;
pub use endpoint::{AcceptMode, Accepted, ListeningEndpoint};
pub use multiplexer::{Readiness, poll_ready};
pub use shutdown::ShutdownHandle;

use std::io;
use std::os::unix::net::{SocketAddr, UnixStream};
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::session::{
    Session, SessionId, SessionRegistry, SessionState, Step, Termination, TerminationKind,
};

/// Server errors. All of them are fatal to the event loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {path}: {source}", path = .path.display())]
    Bind { path: PathBuf, source: io::Error },

    #[error("Accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("Readiness poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] muxd_core::Error),
}

/// Counters over the server's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    /// Connections accepted.
    pub accepted: u64,
    /// Sessions currently registered.
    pub active: usize,
    /// Sessions ended by the peer closing.
    pub peer_closed: u64,
    /// Sessions ended by the terminator.
    pub quit: u64,
    /// Sessions ended by a transport error.
    pub errored: u64,
}

/// What a single pass did.
#[derive(Debug)]
pub struct PassReport {
    /// Accept mode the pass ran in.
    pub mode: AcceptMode,
    /// Sessions accepted this pass, including ones whose handshake failed.
    pub accepted: Vec<SessionId>,
    /// Handles the readiness poll reported (multiplexed passes only).
    pub ready: usize,
    /// Sessions that terminated this pass.
    pub retired: Vec<(SessionId, TerminationKind)>,
}

impl PassReport {
    const fn new(mode: AcceptMode) -> Self {
        Self {
            mode,
            accepted: Vec::new(),
            ready: 0,
            retired: Vec::new(),
        }
    }

    /// A multiplexed pass whose poll found nothing to do.
    pub fn is_idle(&self) -> bool {
        self.mode == AcceptMode::NonBlocking && self.ready == 0
    }
}

/// How a newly accepted session is brought through its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    /// Greeting, acknowledgment and first prompt before registering.
    Synchronous,
    /// Greeting only; the acknowledgment is read once the session is ready.
    Deferred,
}

/// The multiplexing server: listening endpoint, session registry, and the
/// loop that drives them.
///
/// Dropping the server closes every session, then the endpoint, then
/// removes the socket file.
pub struct Server {
    // Field order is drop order.
    registry: SessionRegistry,
    endpoint: ListeningEndpoint,
    config: ServerConfig,
    shutdown: ShutdownHandle,
    stats: ServerStats,
}

impl Server {
    /// Bind the listening endpoint. Failure here is fatal to the process.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let endpoint = ListeningEndpoint::bind(&config.socket_path)?;
        let shutdown = ShutdownHandle::new(config.socket_path.clone());
        Ok(Self {
            registry: SessionRegistry::new(),
            endpoint,
            config,
            shutdown,
            stats: ServerStats::default(),
        })
    }

    /// Handle that stops [`run`](Self::run) from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub const fn endpoint(&self) -> &ListeningEndpoint {
        &self.endpoint
    }

    pub const fn accept_mode(&self) -> AcceptMode {
        self.endpoint.mode()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            active: self.registry.len(),
            ..self.stats
        }
    }

    /// Run passes until shutdown is requested or a fatal error occurs, then
    /// release every resource.
    pub fn run(mut self) -> Result<(), ServerError> {
        let result = self.serve();
        if let Err(e) = &result {
            error!(error = %e, "Event loop failed");
        }
        self.shutdown();
        result
    }

    fn serve(&mut self) -> Result<(), ServerError> {
        info!(path = %self.endpoint.path().display(), "Event loop started");
        while !self.shutdown.is_requested() {
            let report = self.run_pass()?;
            if !report.is_idle() {
                debug!(
                    mode = ?report.mode,
                    accepted = report.accepted.len(),
                    ready = report.ready,
                    retired = report.retired.len(),
                    "Pass complete"
                );
            } else if !self.config.idle_sleep.is_zero() {
                std::thread::sleep(self.config.idle_sleep);
            }
        }
        info!("Shutdown requested");
        Ok(())
    }

    /// Run a single pass of the event loop.
    ///
    /// With no sessions this blocks until a client connects.
    pub fn run_pass(&mut self) -> Result<PassReport, ServerError> {
        let mode = self.sync_accept_mode()?;
        let report = match mode {
            AcceptMode::Blocking => self.blocking_pass()?,
            AcceptMode::NonBlocking => self.multiplexed_pass()?,
        };
        self.sync_accept_mode()?;
        Ok(report)
    }

    /// Blocking when the registry is empty, non-blocking otherwise.
    fn sync_accept_mode(&mut self) -> Result<AcceptMode, ServerError> {
        let mode = if self.registry.is_empty() {
            AcceptMode::Blocking
        } else {
            AcceptMode::NonBlocking
        };
        self.endpoint.set_mode(mode)?;
        Ok(mode)
    }

    fn blocking_pass(&mut self) -> Result<PassReport, ServerError> {
        let mut report = PassReport::new(AcceptMode::Blocking);
        info!("No clients, blocking on accept");

        let (stream, addr) = match self.endpoint.accept() {
            Ok(Accepted::Connection(stream, addr)) => (stream, addr),
            Ok(Accepted::WouldBlock) => return Ok(report),
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                warn!(error = %e, "Pending connection aborted before accept");
                return Ok(report);
            }
            Err(e) => return Err(ServerError::Accept(e)),
        };

        if self.shutdown.is_requested() {
            debug!("Accept woken for shutdown");
            return Ok(report);
        }

        self.admit(stream, &addr, Handshake::Synchronous, &mut report);
        Ok(report)
    }

    fn multiplexed_pass(&mut self) -> Result<PassReport, ServerError> {
        let mut report = PassReport::new(AcceptMode::NonBlocking);

        let readiness = poll_ready(&self.endpoint, &self.registry, self.config.poll_timeout)
            .map_err(ServerError::Poll)?;
        report.ready = readiness.count();
        if readiness.is_empty() {
            return Ok(report);
        }

        if readiness.endpoint {
            match self.endpoint.accept() {
                Ok(Accepted::Connection(..)) if self.shutdown.is_requested() => {
                    debug!("Accept woken for shutdown");
                }
                Ok(Accepted::Connection(stream, addr)) => {
                    self.admit(stream, &addr, Handshake::Deferred, &mut report);
                }
                Ok(Accepted::WouldBlock) => debug!("Endpoint ready but nothing to accept"),
                Err(e) => warn!(error = %e, "Accept failed"),
            }
        }

        // Step against the snapshot of ready ids, retire afterwards.
        let mut terminated = Vec::new();
        for id in readiness.sessions {
            let Some(session) = self.registry.get_mut(id) else {
                continue;
            };
            if let Step::Terminated(reason) = session.step(&self.config.protocol) {
                terminated.push((id, reason));
            }
        }
        self.retire(terminated, &mut report);

        Ok(report)
    }

    /// Bring a fresh connection into the registry.
    fn admit(
        &mut self,
        stream: UnixStream,
        addr: &SocketAddr,
        handshake: Handshake,
        report: &mut PassReport,
    ) {
        let id = self.registry.allocate_id();
        let peer = endpoint::describe_peer(addr);
        self.stats.accepted += 1;
        report.accepted.push(id);
        info!(session_id = %id, peer = %peer, "Client connected");

        let mut session = Session::new(id, stream, peer);
        let step = match handshake {
            Handshake::Synchronous => self.handshake_now(&mut session),
            Handshake::Deferred => match session.connection().set_nonblocking(true) {
                Ok(()) => session.greet(&self.config.protocol),
                Err(e) => Step::Terminated(Termination::from_io(e)),
            },
        };

        match step {
            Step::Continue => {
                if let Err(rejected) = self.registry.register(session) {
                    warn!(session_id = %rejected.id(), "Session refused by registry");
                }
            }
            Step::Terminated(reason) => {
                self.record(id, &reason);
                report.retired.push((id, reason.kind()));
            }
        }
    }

    /// Handshake on a blocking connection. The acknowledgment read is
    /// bounded by the configured timeout and interrupted by shutdown. A
    /// session that completes it is switched to non-blocking I/O.
    fn handshake_now(&self, session: &mut Session) -> Step {
        let _guard = match self.shutdown.guard_handshake(session.connection()) {
            Ok(guard) => guard,
            Err(e) => return Step::Terminated(Termination::from_io(e)),
        };
        if let Err(e) = session
            .connection()
            .set_read_timeout(self.config.handshake_timeout)
        {
            return Step::Terminated(Termination::from_io(e));
        }

        match session.handshake(&self.config.protocol) {
            // The read timed out before any acknowledgment arrived.
            Step::Continue if session.state() == SessionState::AwaitingHandshake => {
                Step::Terminated(Termination::Transport(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "handshake timed out",
                )))
            }
            Step::Continue => match session.connection().set_nonblocking(true) {
                Ok(()) => Step::Continue,
                Err(e) => Step::Terminated(Termination::from_io(e)),
            },
            terminated @ Step::Terminated(_) => terminated,
        }
    }

    fn retire(&mut self, terminated: Vec<(SessionId, Termination)>, report: &mut PassReport) {
        if terminated.is_empty() {
            return;
        }
        let ids: Vec<SessionId> = terminated.iter().map(|(id, _)| *id).collect();
        for (id, reason) in terminated {
            self.record(id, &reason);
            report.retired.push((id, reason.kind()));
        }
        let closed = self.registry.retire(&ids);
        debug!(
            closed = closed.len(),
            remaining = self.registry.len(),
            "Sessions retired"
        );
    }

    fn record(&mut self, id: SessionId, reason: &Termination) {
        match reason {
            Termination::PeerClosed => {
                self.stats.peer_closed += 1;
                info!(session_id = %id, "Client has closed the connection");
            }
            Termination::ClientQuit => {
                self.stats.quit += 1;
                info!(session_id = %id, "Client quit");
            }
            Termination::Transport(e) => {
                self.stats.errored += 1;
                warn!(session_id = %id, error = %e, "Session transport error");
            }
        }
    }

    /// Close every session, then the endpoint, then release the socket
    /// path.
    fn shutdown(self) {
        let stats = self.stats();
        let Self {
            mut registry,
            endpoint,
            ..
        } = self;

        let sessions = registry.drain();
        let closed = sessions.len();
        drop(sessions);

        let path = endpoint.path().to_path_buf();
        drop(endpoint);

        info!(
            path = %path.display(),
            closed_sessions = closed,
            accepted = stats.accepted,
            quit = stats.quit,
            peer_closed = stats.peer_closed,
            errored = stats.errored,
            "Server stopped"
        );
    }
}
