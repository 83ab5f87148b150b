//! Error types for `muxd` core library.

use thiserror::Error;

/// Result type alias using `muxd` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `muxd` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error. Unreadable or malformed settings files land here
    /// with their path in the message.
    #[error("Configuration error: {0}")]
    Config(String),
}
