//! Readiness multiplexer.
//!
//! One bounded `poll(2)` over the listening endpoint plus every registered
//! session. The candidate set is rebuilt on every call, so registry changes
//! between passes are always observed.

use std::io;
use std::os::fd::AsFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use super::endpoint::ListeningEndpoint;
use crate::session::{SessionId, SessionRegistry};

/// Handles that reported pending input.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Readiness {
    /// A connection is waiting to be accepted.
    pub endpoint: bool,
    /// Sessions with input, a hangup, or an error pending. Order unspecified.
    pub sessions: Vec<SessionId>,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        !self.endpoint && self.sessions.is_empty()
    }

    pub fn count(&self) -> usize {
        usize::from(self.endpoint) + self.sessions.len()
    }
}

/// Wait up to `timeout` for the endpoint or any session to become readable.
///
/// Hangups and socket errors count as ready: the next read on that session
/// observes them and terminates it. An interrupted wait reports nothing
/// ready.
pub fn poll_ready<C: AsFd>(
    endpoint: &ListeningEndpoint,
    registry: &SessionRegistry<C>,
    timeout: Duration,
) -> io::Result<Readiness> {
    let ready_flags =
        PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;

    let mut ids = Vec::with_capacity(registry.len());
    let mut fds = Vec::with_capacity(registry.len() + 1);
    fds.push(PollFd::new(endpoint.as_fd(), PollFlags::POLLIN));
    for session in registry.iter() {
        ids.push(session.id());
        fds.push(PollFd::new(session.connection().as_fd(), PollFlags::POLLIN));
    }

    match poll(&mut fds, PollTimeout::from(timeout_millis(timeout))) {
        Ok(0) | Err(Errno::EINTR) => return Ok(Readiness::default()),
        Ok(_) => {}
        Err(errno) => return Err(io::Error::from(errno)),
    }

    let is_ready = |fd: &PollFd<'_>| fd.revents().is_some_and(|r| r.intersects(ready_flags));
    Ok(Readiness {
        endpoint: is_ready(&fds[0]),
        sessions: ids
            .into_iter()
            .zip(&fds[1..])
            .filter(|(_, fd)| is_ready(*fd))
            .map(|(id, _)| id)
            .collect(),
    })
}

/// Millisecond poll timeout, saturating rather than wrapping.
fn timeout_millis(timeout: Duration) -> u16 {
    u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX)
}
