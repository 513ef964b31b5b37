//! Error types for the relay.

use thiserror::Error;

use crate::config::ConfigError;
use crate::pty::PtyError;

/// Usage line printed when no command is given
pub const USAGE: &str = "Usage: pty-relay [OPTIONS] <COMMAND> [ARGS]...";

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("no command given")]
    Usage,

    #[error("argument {index} contains an interior NUL byte")]
    InvalidArgument { index: usize },

    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
