//! `muxd` Core Library
//!
//! Shared functionality for `muxd` components:
//! - Configuration resolution and hierarchy
//! - Session protocol payloads (greeting, prompt, terminator)
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::Protocol;
