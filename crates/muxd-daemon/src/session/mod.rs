//! Sessions and their registry.
//!
//! A session is one accepted client connection plus its protocol state.

mod registry;
mod state;
mod types;

pub use registry::SessionRegistry;
pub use state::{Session, Step};
pub use types::{SessionId, SessionState, Termination, TerminationKind};
