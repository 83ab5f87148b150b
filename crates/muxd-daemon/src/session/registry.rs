//! Session registry.
//!
//! An ordered collection of live sessions; insertion order is acceptance
//! order. Only the event loop mutates it.

use std::os::unix::net::UnixStream;

use tracing::debug;

use super::state::Session;
use super::types::SessionId;

/// The single record of which clients are connected.
///
/// A session is present if and only if its connection is open and it has
/// not terminated. Ids come from the registry and are never reused.
#[derive(Debug)]
pub struct SessionRegistry<C = UnixStream> {
    sessions: Vec<Session<C>>,
    last_id: u64,
}

impl<C> Default for SessionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> SessionRegistry<C> {
    pub const fn new() -> Self {
        Self {
            sessions: Vec::new(),
            last_id: 0,
        }
    }

    /// Hand out the next session id. Called once per accepted connection.
    pub const fn allocate_id(&mut self) -> SessionId {
        self.last_id += 1;
        SessionId::new(self.last_id)
    }

    /// Append a live session.
    ///
    /// Terminated sessions and duplicate ids are refused and handed back to
    /// the caller, who drops them.
    pub fn register(&mut self, session: Session<C>) -> Result<(), Session<C>> {
        if session.is_terminated() || self.contains(session.id()) {
            return Err(session);
        }
        debug!(session_id = %session.id(), live = self.sessions.len() + 1, "Session registered");
        self.sessions.push(session);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.iter().any(|s| s.id() == id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session<C>> {
        self.sessions.iter_mut().find(|s| s.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session<C>> {
        self.sessions.iter()
    }

    /// Ids of all live sessions, in registry order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(Session::id).collect()
    }

    /// Remove the given sessions and return them, keeping the relative order
    /// of the rest. Unknown ids are ignored.
    ///
    /// Dropping the returned sessions closes their connections.
    pub fn retire(&mut self, ids: &[SessionId]) -> Vec<Session<C>> {
        if ids.is_empty() {
            return Vec::new();
        }
        let (retired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.sessions)
            .into_iter()
            .partition(|s| ids.contains(&s.id()));
        self.sessions = kept;
        retired
    }

    /// Remove every session, in registry order.
    pub fn drain(&mut self) -> Vec<Session<C>> {
        std::mem::take(&mut self.sessions)
    }
}
