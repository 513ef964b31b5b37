//! Child termination status

use std::fmt;

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Exit code reported when the child did not exit normally
pub const ABNORMAL_EXIT_CODE: i32 = 1;

/// How the child process terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// Normal exit with the given code
    Exited(i32),
    /// Killed by a signal
    Signaled(Signal),
}

impl ChildStatus {
    /// Convert a `waitpid` result into a terminal status.
    ///
    /// Returns `None` for anything that does not mean the child is gone
    /// (still alive, stopped, continued, ptrace events).
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ChildStatus::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(ChildStatus::Signaled(signal)),
            _ => None,
        }
    }

    /// The exit code to propagate to our own caller
    pub fn exit_code(self) -> i32 {
        match self {
            ChildStatus::Exited(code) => code,
            ChildStatus::Signaled(_) => ABNORMAL_EXIT_CODE,
        }
    }

    pub fn success(self) -> bool {
        self == ChildStatus::Exited(0)
    }
}

impl fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildStatus::Exited(code) => write!(f, "exited with code {}", code),
            ChildStatus::Signaled(signal) => write!(f, "killed by {}", signal),
        }
    }
}
