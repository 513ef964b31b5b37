//! pty-relay
//!
//! Runs a command attached to a pseudoterminal and relays its output, so
//! tools that insist on an interactive terminal can be driven from scripts
//! and pipelines. The child's exit code is passed through; a child killed by
//! a signal is reported as exit code 1.
//!
//! - `command`: validated command line and child environment
//! - `pty`: PTY allocation, fork/exec, master I/O and reaping
//! - `relay`: the running / draining / terminated relay loop
//! - `status`: child termination status and exit code mapping
//! - `config`: CLI arguments and layered configuration

#[cfg(not(unix))]
compile_error!("pty-relay only supports Unix platforms");

pub mod command;
pub mod config;
pub mod error;
pub mod pty;
pub mod relay;
pub mod status;

pub use command::Command;
pub use config::{CliArgs, Config, ConfigError};
pub use error::{RelayError, RelayResult};
pub use pty::{Pty, PtyError, WindowSize};
pub use relay::{Relay, RelayOutcome, RelaySettings};
pub use status::ChildStatus;
