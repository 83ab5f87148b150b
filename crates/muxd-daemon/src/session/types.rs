//! Session types.

use std::fmt;
use std::io;

/// Process-unique session identifier, assigned in acceptance order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Greeting sent (or about to be), acknowledgment not yet received.
    AwaitingHandshake,
    /// Prompt sent, waiting for the next command.
    ReadyForCommand,
    /// Terminal. No further I/O.
    Terminated,
}

/// Why a session ended.
#[derive(Debug)]
pub enum Termination {
    /// The peer closed the connection (0-byte read or broken pipe).
    PeerClosed,
    /// The peer sent the terminator.
    ClientQuit,
    /// Any other transport failure.
    Transport(io::Error),
}

impl Termination {
    pub const fn kind(&self) -> TerminationKind {
        match self {
            Self::PeerClosed => TerminationKind::PeerClosed,
            Self::ClientQuit => TerminationKind::ClientQuit,
            Self::Transport(_) => TerminationKind::Transport,
        }
    }

    /// Classify an I/O error from a session read or write.
    ///
    /// Resets and broken pipes mean the peer went away; anything else is a
    /// transport error worth a warning.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::WriteZero
            | io::ErrorKind::UnexpectedEof => Self::PeerClosed,
            _ => Self::Transport(err),
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed the connection"),
            Self::ClientQuit => f.write_str("client quit"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// Copyable summary of a [`Termination`], used in reports and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationKind {
    PeerClosed,
    ClientQuit,
    Transport,
}
