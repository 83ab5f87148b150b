//! muxd Client Library
//!
//! Blocking client for the muxd session protocol: connect, answer the
//! greeting, then alternate between reading prompts and sending commands.

pub mod connection;
pub mod input;

pub use connection::{ClientError, ConnectionConfig, SessionClient};
