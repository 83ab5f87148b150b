//! Per-session protocol state machine.
//!
//! ```text
//! AwaitingHandshake --ack--> ReadyForCommand --command--> ReadyForCommand
//!        |                          |
//!        +--- close / error --------+--- close / error / terminator ---> Terminated
//! ```
//!
//! Every step performs at most one read, so a session driven by the
//! readiness multiplexer never waits on a peer that has nothing to say.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;

use muxd_core::Protocol;
use muxd_core::protocol::display_payload;
use tracing::{debug, info};

use super::types::{SessionId, SessionState, Termination};

/// Outcome of driving a session forward.
#[must_use]
#[derive(Debug)]
pub enum Step {
    /// The session is still live.
    Continue,
    /// The session reached `Terminated` and must be retired.
    Terminated(Termination),
}

/// One connected client.
///
/// The session exclusively owns its connection; dropping the session closes
/// it, so a session is closed exactly once, wherever it is released.
#[derive(Debug)]
pub struct Session<C = UnixStream> {
    id: SessionId,
    connection: C,
    state: SessionState,
    peer: String,
    commands: u64,
}

impl<C> Session<C> {
    /// Wrap a freshly accepted connection. Nothing is sent yet.
    pub fn new(id: SessionId, connection: C, peer: impl Into<String>) -> Self {
        Self {
            id,
            connection,
            state: SessionState::AwaitingHandshake,
            peer: peer.into(),
            commands: 0,
        }
    }

    pub const fn id(&self) -> SessionId {
        self.id
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Peer address as captured at accept time. Diagnostics only.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Number of non-terminator commands handled so far.
    pub const fn commands_processed(&self) -> u64 {
        self.commands
    }

    pub const fn connection(&self) -> &C {
        &self.connection
    }

    pub const fn is_terminated(&self) -> bool {
        matches!(self.state, SessionState::Terminated)
    }
}

impl<C: Read + Write> Session<C> {
    /// Send the greeting that opens the handshake.
    pub fn greet(&mut self, protocol: &Protocol) -> Step {
        if self.state != SessionState::AwaitingHandshake {
            return self.already_past(SessionState::AwaitingHandshake);
        }
        match self.send(&protocol.greeting) {
            Ok(()) => {
                debug!(session_id = %self.id, "Greeting sent");
                Step::Continue
            }
            Err(e) => self.terminate(Termination::from_io(e)),
        }
    }

    /// Run the whole handshake synchronously: greeting, acknowledgment, and
    /// the first prompt.
    pub fn handshake(&mut self, protocol: &Protocol) -> Step {
        match self.greet(protocol) {
            Step::Continue => self.step(protocol),
            terminated @ Step::Terminated(_) => terminated,
        }
    }

    /// Advance by exactly one read.
    ///
    /// In `AwaitingHandshake` this consumes the acknowledgment and sends the
    /// first prompt. In `ReadyForCommand` it consumes one command and, unless
    /// it was the terminator, sends the next prompt. A read that would block
    /// leaves the session unchanged.
    pub fn step(&mut self, protocol: &Protocol) -> Step {
        match self.state {
            SessionState::AwaitingHandshake => self.receive_acknowledgment(protocol),
            SessionState::ReadyForCommand => self.receive_command(protocol),
            SessionState::Terminated => Step::Terminated(Termination::Transport(
                io::Error::new(io::ErrorKind::NotConnected, "session already terminated"),
            )),
        }
    }

    fn receive_acknowledgment(&mut self, protocol: &Protocol) -> Step {
        let capacity = protocol.max_command_bytes.max(protocol.acknowledgment.len());
        let mut buf = vec![0u8; capacity];
        let n = match self.receive(&mut buf) {
            Ok(0) => return self.terminate(Termination::PeerClosed),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Step::Continue,
            Err(e) => return self.terminate(Termination::from_io(e)),
        };

        info!(
            session_id = %self.id,
            acknowledgment = %display_payload(&buf[..n]),
            "Handshake complete"
        );
        self.state = SessionState::ReadyForCommand;
        self.prompt(protocol)
    }

    fn receive_command(&mut self, protocol: &Protocol) -> Step {
        let mut buf = vec![0u8; protocol.max_command_bytes];
        let n = match self.receive(&mut buf) {
            Ok(0) => return self.terminate(Termination::PeerClosed),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Step::Continue,
            Err(e) => return self.terminate(Termination::from_io(e)),
        };
        let command = &buf[..n];

        if protocol.is_terminator(command) {
            return self.terminate(Termination::ClientQuit);
        }

        self.commands += 1;
        info!(
            session_id = %self.id,
            bytes = n,
            command = %display_payload(command),
            "Command received"
        );
        self.prompt(protocol)
    }

    /// A non-blocking connection whose peer stops reading fails here with
    /// `WouldBlock` instead of stalling the loop.
    fn prompt(&mut self, protocol: &Protocol) -> Step {
        match self.send(&protocol.prompt) {
            Ok(()) => Step::Continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.terminate(Termination::Transport(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "peer is not reading prompts",
                )))
            }
            Err(e) => self.terminate(Termination::from_io(e)),
        }
    }

    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        self.connection.write_all(payload)?;
        self.connection.flush()
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.connection.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                result => return result,
            }
        }
    }

    fn terminate(&mut self, reason: Termination) -> Step {
        self.state = SessionState::Terminated;
        Step::Terminated(reason)
    }

    fn already_past(&mut self, expected: SessionState) -> Step {
        let err = io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("expected {expected:?}, session is {:?}", self.state),
        );
        self.terminate(Termination::Transport(err))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::session::TerminationKind;

    /// In-memory connection fed from a script of read results.
    ///
    /// An exhausted script reads as EOF.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedConnection {
        pub reads: VecDeque<io::Result<Vec<u8>>>,
        pub written: Vec<Vec<u8>>,
        pub write_error: Option<io::ErrorKind>,
    }

    impl ScriptedConnection {
        pub fn with_reads<I, B>(reads: I) -> Self
        where
            I: IntoIterator<Item = B>,
            B: AsRef<[u8]>,
        {
            Self {
                reads: reads.into_iter().map(|r| Ok(r.as_ref().to_vec())).collect(),
                ..Self::default()
            }
        }
    }

    impl Read for ScriptedConnection {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.reads.push_front(Ok(chunk[n..].to_vec()));
                    }
                    Ok(n)
                }
            }
        }
    }

    impl Write for ScriptedConnection {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.write_error {
                return Err(io::Error::from(kind));
            }
            self.written.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn session(conn: ScriptedConnection) -> Session<ScriptedConnection> {
        Session::new(SessionId::new(1), conn, "test")
    }

    fn kind(step: Step) -> Option<TerminationKind> {
        match step {
            Step::Continue => None,
            Step::Terminated(t) => Some(t.kind()),
        }
    }

    #[test]
    fn handshake_sends_greeting_then_first_prompt() {
        let protocol = Protocol::default();
        let mut s = session(ScriptedConnection::with_reads(["THANKS"]));

        assert!(kind(s.handshake(&protocol)).is_none());
        assert_eq!(s.state(), SessionState::ReadyForCommand);
        assert_eq!(
            s.connection().written,
            vec![b"HELLO".to_vec(), b"ENTERCMD".to_vec()]
        );
    }

    #[test]
    fn close_during_handshake_sends_no_prompt() {
        let protocol = Protocol::default();
        let mut s = session(ScriptedConnection::default());

        assert_eq!(kind(s.handshake(&protocol)), Some(TerminationKind::PeerClosed));
        assert!(s.is_terminated());
        assert_eq!(s.connection().written, vec![b"HELLO".to_vec()]);
    }

    #[test]
    fn acknowledgment_content_is_not_validated() {
        let protocol = Protocol::default();
        let mut s = session(ScriptedConnection::with_reads(["whatever"]));
        assert!(kind(s.handshake(&protocol)).is_none());
        assert_eq!(s.state(), SessionState::ReadyForCommand);
    }

    #[test]
    fn greeting_write_failure_terminates() {
        let protocol = Protocol::default();
        let mut s = session(ScriptedConnection {
            write_error: Some(io::ErrorKind::BrokenPipe),
            ..ScriptedConnection::default()
        });
        assert_eq!(kind(s.greet(&protocol)), Some(TerminationKind::PeerClosed));
    }

    #[test]
    fn command_gets_exactly_one_prompt() {
        let protocol = Protocol::default();
        let mut s = session(ScriptedConnection::with_reads(["THANKS", "status"]));
        assert!(kind(s.handshake(&protocol)).is_none());

        assert!(kind(s.step(&protocol)).is_none());
        assert_eq!(s.commands_processed(), 1);
        assert_eq!(s.state(), SessionState::ReadyForCommand);
        let prompts = s
            .connection()
            .written
            .iter()
            .filter(|w| w.as_slice() == b"ENTERCMD")
            .count();
        assert_eq!(prompts, 2);
    }

    #[test]
    fn terminator_ends_session_without_prompt() {
        let protocol = Protocol::default();
        let mut s = session(ScriptedConnection::with_reads(["THANKS", "quit"]));
        assert!(kind(s.handshake(&protocol)).is_none());
        let written_before = s.connection().written.len();

        assert_eq!(kind(s.step(&protocol)), Some(TerminationKind::ClientQuit));
        assert_eq!(s.connection().written.len(), written_before);
        assert_eq!(s.commands_processed(), 0);
    }

    #[test]
    fn near_terminators_are_ordinary_commands() {
        let protocol = Protocol::default();
        let mut s = session(ScriptedConnection::with_reads([
            &b"THANKS"[..],
            &b"QUIT"[..],
            &b"quit\n"[..],
            &b"quit\0"[..],
        ]));
        assert!(kind(s.handshake(&protocol)).is_none());
        for _ in 0..3 {
            assert!(kind(s.step(&protocol)).is_none());
        }
        assert_eq!(s.commands_processed(), 3);
    }

    #[test]
    fn oversized_command_is_read_in_bounded_chunks() {
        let protocol = Protocol {
            max_command_bytes: 4,
            ..Protocol::default()
        };
        let mut s = session(ScriptedConnection::with_reads(["ack", "quitquit"]));
        assert!(kind(s.handshake(&protocol)).is_none());

        // Each step reads at most four bytes; both halves equal the terminator.
        assert_eq!(kind(s.step(&protocol)), Some(TerminationKind::ClientQuit));
        assert_eq!(s.connection().reads.len(), 1);
    }

    #[test]
    fn read_error_is_transport_termination() {
        let protocol = Protocol::default();
        let mut conn = ScriptedConnection::with_reads(["THANKS"]);
        conn.reads.push_back(Err(io::Error::other("disk on fire")));
        let mut s = session(conn);
        assert!(kind(s.handshake(&protocol)).is_none());

        match s.step(&protocol) {
            Step::Terminated(Termination::Transport(e)) => {
                assert!(e.to_string().contains("disk on fire"));
            }
            other => panic!("expected transport termination, got {other:?}"),
        }
    }

    #[test]
    fn interrupted_read_is_retried() {
        let protocol = Protocol::default();
        let mut conn = ScriptedConnection::with_reads(["THANKS"]);
        conn.reads
            .push_back(Err(io::Error::from(io::ErrorKind::Interrupted)));
        conn.reads.push_back(Ok(b"ls".to_vec()));
        let mut s = session(conn);
        assert!(kind(s.handshake(&protocol)).is_none());
        assert!(kind(s.step(&protocol)).is_none());
        assert_eq!(s.commands_processed(), 1);
    }

    #[test]
    fn terminated_session_does_no_io() {
        let protocol = Protocol::default();
        let mut s = session(ScriptedConnection::with_reads(["THANKS", "quit", "ls"]));
        assert!(kind(s.handshake(&protocol)).is_none());
        assert!(kind(s.step(&protocol)).is_some());
        let written = s.connection().written.len();

        assert_eq!(kind(s.step(&protocol)), Some(TerminationKind::Transport));
        assert_eq!(s.connection().written.len(), written);
        assert_eq!(s.connection().reads.len(), 1);
    }

    #[test]
    fn read_that_would_block_leaves_session_unchanged() {
        let protocol = Protocol::default();
        let mut conn = ScriptedConnection::with_reads(["THANKS"]);
        conn.reads
            .push_back(Err(io::Error::from(io::ErrorKind::WouldBlock)));
        conn.reads.push_back(Ok(b"ls".to_vec()));
        let mut s = session(conn);
        assert!(kind(s.handshake(&protocol)).is_none());
        let written_before = s.connection().written.len();

        assert!(kind(s.step(&protocol)).is_none());
        assert_eq!(s.state(), SessionState::ReadyForCommand);
        assert_eq!(s.commands_processed(), 0);
        assert_eq!(s.connection().written.len(), written_before);

        assert!(kind(s.step(&protocol)).is_none());
        assert_eq!(s.commands_processed(), 1);
    }

    #[test]
    fn full_outbound_buffer_terminates_session() {
        let protocol = Protocol::default();
        let mut s = session(ScriptedConnection::with_reads(["THANKS", "status"]));
        assert!(kind(s.handshake(&protocol)).is_none());

        s.connection.write_error = Some(io::ErrorKind::WouldBlock);
        assert_eq!(kind(s.step(&protocol)), Some(TerminationKind::Transport));
        assert!(s.is_terminated());
    }
}
