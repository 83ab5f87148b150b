//! muxd Daemon Library
//!
//! The connection multiplexing core of the muxd session server:
//! - Listening endpoint with blocking/non-blocking accept modes
//! - Session registry, the single record of who is connected
//! - Readiness multiplexer over the endpoint and every session
//! - Per-session handshake and command state machine
//! - Event loop tying them together on one thread

pub mod server;
pub mod session;
