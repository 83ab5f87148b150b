//! Session protocol payloads.
//!
//! Every session runs the same exchange:
//!
//! ```text
//! server                          client
//!   | ---- greeting ("HELLO") ---->  |
//!   | <-- acknowledgment ("THANKS")  |
//!   | ---- prompt ("ENTERCMD") --->  |
//!   | <-------- command ---------    |   repeated until the terminator
//!   | ---- prompt ("ENTERCMD") --->  |
//!   | <-------- "quit" ----------    |
//!   x                                x
//! ```
//!
//! Payloads are raw bytes. Commands are bounded by `max_command_bytes` and
//! compared against the terminator with exact byte equality.

use std::borrow::Cow;

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};

/// Default greeting sent by the server right after accept.
pub const DEFAULT_GREETING: &[u8] = b"HELLO";
/// Default acknowledgment sent by the client in reply to the greeting.
pub const DEFAULT_ACKNOWLEDGMENT: &[u8] = b"THANKS";
/// Default prompt sent before every command read.
pub const DEFAULT_PROMPT: &[u8] = b"ENTERCMD";
/// Default reserved command that ends a session.
pub const DEFAULT_TERMINATOR: &[u8] = b"quit";
/// Default upper bound for a single command payload.
pub const DEFAULT_MAX_COMMAND_BYTES: usize = 100;

/// Fixed payloads exchanged on every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    /// Sent server -> client once, on accept.
    pub greeting: Vec<u8>,
    /// Expected client -> server after the greeting. Not validated.
    pub acknowledgment: Vec<u8>,
    /// Sent server -> client before each command read.
    pub prompt: Vec<u8>,
    /// Command that ends the session normally.
    pub terminator: Vec<u8>,
    /// Largest command accepted in one read.
    pub max_command_bytes: usize,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_vec(),
            acknowledgment: DEFAULT_ACKNOWLEDGMENT.to_vec(),
            prompt: DEFAULT_PROMPT.to_vec(),
            terminator: DEFAULT_TERMINATOR.to_vec(),
            max_command_bytes: DEFAULT_MAX_COMMAND_BYTES,
        }
    }
}

impl Protocol {
    /// Build the protocol from its configuration section, validating it.
    pub fn from_config(config: &ProtocolConfig) -> Result<Self> {
        let protocol = Self {
            greeting: config.greeting.as_bytes().to_vec(),
            acknowledgment: config.acknowledgment.as_bytes().to_vec(),
            prompt: config.prompt.as_bytes().to_vec(),
            terminator: config.terminator.as_bytes().to_vec(),
            max_command_bytes: config.max_command_bytes,
        };
        protocol.validate()?;
        Ok(protocol)
    }

    /// Check the payloads are usable on the wire.
    pub fn validate(&self) -> Result<()> {
        if self.max_command_bytes == 0 {
            return Err(Error::Config("max_command_bytes must be positive".into()));
        }
        if self.greeting.is_empty() {
            return Err(Error::Config("greeting must not be empty".into()));
        }
        if self.prompt.is_empty() {
            return Err(Error::Config("prompt must not be empty".into()));
        }
        if self.terminator.is_empty() {
            return Err(Error::Config("terminator must not be empty".into()));
        }
        if self.terminator.len() > self.max_command_bytes {
            return Err(Error::Config(format!(
                "terminator ({} bytes) exceeds max_command_bytes ({})",
                self.terminator.len(),
                self.max_command_bytes
            )));
        }
        Ok(())
    }

    /// Exact, case-sensitive comparison over the received bytes.
    pub fn is_terminator(&self, command: &[u8]) -> bool {
        command == self.terminator.as_slice()
    }
}

/// Render a payload for log output.
///
/// Cut at the first NUL (fixed-buffer clients pad with zeros) and decoded
/// lossily. Never use the result for protocol decisions.
pub fn display_payload(payload: &[u8]) -> Cow<'_, str> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end])
}
